//! Currency display and bump tracker settings.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Currency configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EconomyConfig {
    /// Symbol prefixed to amounts in replies (default: "€").
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            currency_symbol: default_currency_symbol(),
        }
    }
}

impl EconomyConfig {
    /// Format an amount with the currency symbol and two decimals.
    pub fn format(&self, amount: Decimal) -> String {
        format!("{}{:.2}", self.currency_symbol, amount)
    }
}

fn default_currency_symbol() -> String {
    "€".to_string()
}

/// Bump tracker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BumpConfig {
    /// Seconds after a bump before the reminder is posted (default: 7200).
    #[serde(default = "default_reminder_secs")]
    pub reminder_secs: u64,
    /// Amount credited to the bumper (default: 0, disabled).
    #[serde(default)]
    pub reward: Decimal,
    /// Role pinged by the reminder.
    #[serde(default)]
    pub reminder_role_id: Option<u64>,
}

impl Default for BumpConfig {
    fn default() -> Self {
        Self {
            reminder_secs: default_reminder_secs(),
            reward: Decimal::ZERO,
            reminder_role_id: None,
        }
    }
}

fn default_reminder_secs() -> u64 {
    7200
}
