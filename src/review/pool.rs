//! Per-guild review slot pool.

use crate::error::{EngineError, EngineResult};
use crate::ids::UserId;
use std::collections::HashSet;

/// Slots for one admin-started session.
///
/// `remaining` only ever decreases through [`SlotPool::consume`]: closing a
/// ticket releases the user but spends the slot for good. The bonus counter
/// is separate and is the only returnable one.
#[derive(Debug, Clone)]
pub struct SlotPool {
    pub id: u64,
    pub total: u32,
    pub remaining: u32,
    pub bonus_total: u32,
    pub bonus_remaining: u32,
    claimed: HashSet<UserId>,
}

impl SlotPool {
    pub fn new(id: u64, total: u32, bonus: u32) -> Self {
        Self {
            id,
            total,
            remaining: total,
            bonus_total: bonus,
            bonus_remaining: bonus,
            claimed: HashSet::new(),
        }
    }

    /// Take a slot for `user_id`. Nothing changes on failure.
    pub fn consume(&mut self, user_id: UserId) -> EngineResult<()> {
        if self.claimed.contains(&user_id) {
            return Err(EngineError::AlreadyActive);
        }
        if self.remaining == 0 {
            return Err(EngineError::PoolExhausted);
        }
        self.remaining -= 1;
        self.claimed.insert(user_id);
        Ok(())
    }

    /// Release a user after their ticket closed. The slot stays spent.
    pub fn release(&mut self, user_id: UserId) -> bool {
        self.claimed.remove(&user_id)
    }

    #[cfg(test)]
    pub fn is_claimed(&self, user_id: UserId) -> bool {
        self.claimed.contains(&user_id)
    }

    pub fn active_users(&self) -> usize {
        self.claimed.len()
    }

    pub fn take_bonus(&mut self) -> EngineResult<()> {
        if self.bonus_remaining == 0 {
            return Err(EngineError::BonusExhausted);
        }
        self.bonus_remaining -= 1;
        Ok(())
    }

    pub fn return_bonus(&mut self) {
        self.bonus_remaining = (self.bonus_remaining + 1).min(self.bonus_total);
    }
}
