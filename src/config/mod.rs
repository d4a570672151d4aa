//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, BotConfig, DiscordConfig, HttpConfig)
//! - [`leveling`]: Default leveling settings and reset periods (LevelingConfig)
//! - [`review`]: Review session settings and tier pricing (ReviewConfig, TierPricing)
//! - [`economy`]: Currency and bump settings (EconomyConfig, BumpConfig)
//! - [`validation`]: Startup validation of the whole config

mod economy;
mod leveling;
mod review;
mod types;
pub mod validation;

pub use economy::{BumpConfig, EconomyConfig};
pub use leveling::LevelingConfig;
pub use review::{ReviewConfig, TierPricing};
pub use types::{Config, DiscordConfig, HttpConfig, LogFormat};
