//! Requester tiers and price schedules.

use crate::config::{ReviewConfig, TierPricing};
use crate::ids::RoleId;
use rust_decimal::Decimal;
use std::fmt;

/// Role-based requester classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Special,
    Vip,
    Normal,
}

impl Tier {
    /// Highest tier any of `roles` qualifies for.
    pub fn resolve(roles: &[RoleId], config: &ReviewConfig) -> Self {
        let holds = |tier_roles: &[u64]| roles.iter().any(|r| tier_roles.contains(r));
        if holds(&config.special_role_ids) {
            Self::Special
        } else if holds(&config.vip_role_ids) {
            Self::Vip
        } else {
            Self::Normal
        }
    }

    pub fn pricing<'a>(&self, config: &'a ReviewConfig) -> &'a TierPricing {
        match self {
            Self::Special => &config.tiers.special,
            Self::Vip => &config.tiers.vip,
            Self::Normal => &config.tiers.normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Special => "special",
            Self::Vip => "vip",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Increment amounts fixed when a ticket is created.
///
/// Indexing past the end yields the final entry, so the schedule repeats
/// its last value indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSchedule {
    steps: Vec<Decimal>,
}

impl PriceSchedule {
    pub fn new(steps: Vec<Decimal>) -> Self {
        Self { steps }
    }

    /// Amount of the increment at `index`. An empty schedule adds nothing.
    pub fn at(&self, index: u32) -> Decimal {
        let index = index as usize;
        self.steps
            .get(index)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of the first `count` increments.
    pub fn total(&self, count: u32) -> Decimal {
        (0..count).map(|i| self.at(i)).sum()
    }
}
