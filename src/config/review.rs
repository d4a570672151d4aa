//! Review session settings and tier pricing.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Review session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    /// Largest settlement staff may credit when closing a ticket (default: 100).
    #[serde(default = "default_max_settlement")]
    pub max_settlement: Decimal,
    /// Seconds a close prompt stays valid (default: 30).
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Countdown before a closed ticket's channel is deleted (default: 10).
    #[serde(default = "default_teardown_delay")]
    pub teardown_delay_secs: u64,
    /// Bonus reviews granted to a session when the start command omits it (default: 10).
    #[serde(default = "default_bonus_slots")]
    pub default_bonus_slots: u32,
    /// Roles allowed to claim, reprice and close tickets. Admins always can.
    #[serde(default)]
    pub staff_role_ids: Vec<u64>,
    /// Roles that put a requester in the "special" tier.
    #[serde(default)]
    pub special_role_ids: Vec<u64>,
    /// Roles that put a requester in the "vip" tier.
    #[serde(default)]
    pub vip_role_ids: Vec<u64>,
    /// Prices per tier.
    #[serde(default)]
    pub tiers: TierTable,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_settlement: default_max_settlement(),
            confirm_timeout_secs: default_confirm_timeout(),
            teardown_delay_secs: default_teardown_delay(),
            default_bonus_slots: default_bonus_slots(),
            staff_role_ids: Vec::new(),
            special_role_ids: Vec::new(),
            vip_role_ids: Vec::new(),
            tiers: TierTable::default(),
        }
    }
}

/// Initial price and increment schedule for one tier.
///
/// `schedule[i]` is added by the `i`-th price increment; the schedule
/// repeats its final entry once exhausted. The normal tier's default price
/// sequence is therefore 0.50, 1.25, 2.00 and so on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierPricing {
    pub initial: Decimal,
    pub schedule: Vec<Decimal>,
}

/// Pricing for every tier.
#[derive(Debug, Clone, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_special")]
    pub special: TierPricing,
    #[serde(default = "default_vip")]
    pub vip: TierPricing,
    #[serde(default = "default_normal")]
    pub normal: TierPricing,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            special: default_special(),
            vip: default_vip(),
            normal: default_normal(),
        }
    }
}

fn default_max_settlement() -> Decimal {
    Decimal::new(100, 0)
}

fn default_confirm_timeout() -> u64 {
    30
}

fn default_teardown_delay() -> u64 {
    10
}

fn default_bonus_slots() -> u32 {
    10
}

fn default_special() -> TierPricing {
    TierPricing {
        initial: Decimal::new(30, 2),
        schedule: vec![Decimal::new(50, 2)],
    }
}

fn default_vip() -> TierPricing {
    TierPricing {
        initial: Decimal::new(40, 2),
        schedule: vec![Decimal::new(60, 2)],
    }
}

fn default_normal() -> TierPricing {
    TierPricing {
        initial: Decimal::new(50, 2),
        schedule: vec![Decimal::new(75, 2)],
    }
}
