//! Leveling defaults and reset periods.

use crate::leveling::Formula;
use serde::Deserialize;

/// Leveling configuration.
///
/// The rate fields seed guilds that have no stored settings yet; once an
/// admin changes a setting the stored guild row wins.
#[derive(Debug, Clone, Deserialize)]
pub struct LevelingConfig {
    /// XP granted per qualifying message (default: 25).
    #[serde(default = "default_xp_per_message")]
    pub xp_per_message: u32,
    /// Seconds between qualifying messages per user (default: 60).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u32,
    /// Multiplier applied to `xp_per_message` (default: 1.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Level formula (default: exponential).
    #[serde(default)]
    pub formula: Formula,
    /// Days between weekly counter resets (default: 7).
    #[serde(default = "default_weekly_reset_days")]
    pub weekly_reset_days: u32,
    /// Days between monthly counter resets (default: 30).
    #[serde(default = "default_monthly_reset_days")]
    pub monthly_reset_days: u32,
    /// How often the reset task checks whether a window elapsed (default: 3600).
    #[serde(default = "default_reset_check_secs")]
    pub reset_check_secs: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            xp_per_message: default_xp_per_message(),
            cooldown_secs: default_cooldown_secs(),
            multiplier: default_multiplier(),
            formula: Formula::default(),
            weekly_reset_days: default_weekly_reset_days(),
            monthly_reset_days: default_monthly_reset_days(),
            reset_check_secs: default_reset_check_secs(),
        }
    }
}

fn default_xp_per_message() -> u32 {
    25
}

fn default_cooldown_secs() -> u32 {
    60
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_weekly_reset_days() -> u32 {
    7
}

fn default_monthly_reset_days() -> u32 {
    30
}

fn default_reset_check_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_correct() {
        let config = LevelingConfig::default();
        assert_eq!(config.xp_per_message, 25);
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.multiplier, 1.0);
        assert_eq!(config.formula, Formula::Exponential);
        assert_eq!(config.weekly_reset_days, 7);
        assert_eq!(config.monthly_reset_days, 30);
    }

    #[test]
    fn formula_parses_lowercase() {
        let config: LevelingConfig = toml::from_str("formula = \"logarithmic\"").unwrap();
        assert_eq!(config.formula, Formula::Logarithmic);
        assert_eq!(config.xp_per_message, 25);
    }
}
