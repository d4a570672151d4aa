//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, TierPricing};
use crate::leveling::limits;
use rust_decimal::Decimal;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("discord.token is required")]
    MissingToken,
    #[error("discord.api_base must be an http(s) URL, got '{0}'")]
    InvalidApiBase(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("leveling.xp_per_message must be within 1-1000, got {0}")]
    XpPerMessage(u32),
    #[error("leveling.cooldown_secs must be within 0-86400, got {0}")]
    Cooldown(u32),
    #[error("leveling.multiplier must be a finite value within 0-10, got {0}")]
    Multiplier(f64),
    #[error("leveling reset periods must be at least one day")]
    ResetPeriod,
    #[error("review.max_settlement must be positive, got {0}")]
    MaxSettlement(Decimal),
    #[error("review.tiers.{0}: initial price and schedule entries must be non-negative")]
    NegativePrice(&'static str),
    #[error("review.tiers.{0}: schedule must not be empty")]
    EmptySchedule(&'static str),
    #[error("bump.reward must not be negative")]
    NegativeBumpReward,
    #[error("bump.reminder_secs must be positive")]
    ReminderDelay,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.discord.token.trim().is_empty() {
        errors.push(ValidationError::MissingToken);
    }
    let api_base = &config.discord.api_base;
    if !(api_base.starts_with("https://") || api_base.starts_with("http://")) {
        errors.push(ValidationError::InvalidApiBase(api_base.clone()));
    }

    // Database path validation
    if let Some(ref db) = config.database {
        let db_path = Path::new(&db.path);
        if db.path != ":memory:"
            && let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(db.path.clone()));
        }
    }

    let leveling = &config.leveling;
    if !limits::XP_PER_MESSAGE.contains(&leveling.xp_per_message) {
        errors.push(ValidationError::XpPerMessage(leveling.xp_per_message));
    }
    if !limits::COOLDOWN_SECS.contains(&leveling.cooldown_secs) {
        errors.push(ValidationError::Cooldown(leveling.cooldown_secs));
    }
    if !limits::multiplier_in_range(leveling.multiplier) {
        errors.push(ValidationError::Multiplier(leveling.multiplier));
    }
    if leveling.weekly_reset_days == 0 || leveling.monthly_reset_days == 0 {
        errors.push(ValidationError::ResetPeriod);
    }

    let review = &config.review;
    if review.max_settlement <= Decimal::ZERO {
        errors.push(ValidationError::MaxSettlement(review.max_settlement));
    }
    check_tier("special", &review.tiers.special, &mut errors);
    check_tier("vip", &review.tiers.vip, &mut errors);
    check_tier("normal", &review.tiers.normal, &mut errors);

    if config.bump.reward < Decimal::ZERO {
        errors.push(ValidationError::NegativeBumpReward);
    }
    if config.bump.reminder_secs == 0 {
        errors.push(ValidationError::ReminderDelay);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tier(name: &'static str, tier: &TierPricing, errors: &mut Vec<ValidationError>) {
    if tier.schedule.is_empty() {
        errors.push(ValidationError::EmptySchedule(name));
    }
    if tier.initial < Decimal::ZERO || tier.schedule.iter().any(|step| *step < Decimal::ZERO) {
        errors.push(ValidationError::NegativePrice(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> String {
        r#"
[discord]
token = "bot-token"
"#
        .to_string()
    }

    #[test]
    fn test_valid_config_passes() {
        let config: Config = toml::from_str(&minimal_valid_config()).unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let config: Config = toml::from_str("[discord]\ntoken = \"  \"\n").unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingToken)));
    }

    #[test]
    fn test_leveling_ranges_fail_together() {
        let toml = r#"
[discord]
token = "t"

[leveling]
xp_per_message = 0
cooldown_secs = 100000
multiplier = -1.0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::XpPerMessage(0))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Cooldown(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Multiplier(_))));
    }

    #[test]
    fn test_empty_schedule_fails() {
        let toml = r#"
[discord]
token = "t"

[review.tiers.special]
initial = "0.30"
schedule = []
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptySchedule("special"))));
    }

    #[test]
    fn test_missing_database_parent_fails() {
        let toml = r#"
[discord]
token = "t"

[database]
path = "/nonexistent/dir/bot.db"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DatabasePathInvalid(_))));
    }

    #[test]
    fn test_memory_database_passes() {
        let toml = format!("{}\n[database]\npath = \":memory:\"\n", minimal_valid_config());
        let config: Config = toml::from_str(&toml).unwrap();
        assert!(validate(&config).is_ok());
    }
}
