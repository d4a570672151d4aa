//! Review ticket state machine.

use super::pricing::{PriceSchedule, Tier};
use crate::error::{EngineError, EngineResult};
use crate::ids::{ChannelId, GuildId, TicketId, UserId};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    OpenUnclaimed,
    Claimed,
    Closed,
}

/// One consumed slot with its own price.
///
/// The current price is never stored: it is always the initial price plus
/// the first `increments_applied` schedule entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTicket {
    pub id: TicketId,
    pub guild_id: GuildId,
    pub pool_id: u64,
    pub requester_id: UserId,
    pub tier: Tier,
    pub initial_price: Decimal,
    pub schedule: PriceSchedule,
    pub increments_applied: u32,
    pub claimant_id: Option<UserId>,
    pub state: TicketState,
    pub channel_id: Option<ChannelId>,
}

impl ReviewTicket {
    pub fn new(
        id: TicketId,
        guild_id: GuildId,
        pool_id: u64,
        requester_id: UserId,
        tier: Tier,
        initial_price: Decimal,
        schedule: PriceSchedule,
    ) -> Self {
        Self {
            id,
            guild_id,
            pool_id,
            requester_id,
            tier,
            initial_price,
            schedule,
            increments_applied: 0,
            claimant_id: None,
            state: TicketState::OpenUnclaimed,
            channel_id: None,
        }
    }

    pub fn current_price(&self) -> Decimal {
        self.initial_price + self.schedule.total(self.increments_applied)
    }

    pub fn is_closed(&self) -> bool {
        self.state == TicketState::Closed
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::AlreadyClosed);
        }
        Ok(())
    }

    /// First claim wins; later claims see who holds it.
    pub fn claim(&mut self, staff_id: UserId) -> EngineResult<()> {
        self.ensure_open()?;
        if let Some(holder) = self.claimant_id {
            return Err(EngineError::AlreadyClaimed(holder));
        }
        self.claimant_id = Some(staff_id);
        self.state = TicketState::Claimed;
        Ok(())
    }

    /// Amount the next increment would add.
    pub fn next_increment(&self) -> EngineResult<Decimal> {
        self.ensure_open()?;
        Ok(self.schedule.at(self.increments_applied))
    }

    /// Apply the next schedule entry. Returns the amount added.
    pub fn increment(&mut self) -> EngineResult<Decimal> {
        let step = self.next_increment()?;
        self.increments_applied += 1;
        Ok(step)
    }

    /// Reverse the most recent increment. Returns the amount removed.
    pub fn decrement(&mut self) -> EngineResult<Decimal> {
        self.ensure_open()?;
        if self.increments_applied == 0 {
            return Err(EngineError::AtMinimum);
        }
        self.increments_applied -= 1;
        Ok(self.schedule.at(self.increments_applied))
    }

    pub fn close(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        self.state = TicketState::Closed;
        Ok(())
    }
}
