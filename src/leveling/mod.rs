//! Leveling: XP awards, level derivation and level-up side effects.

mod engine;
pub mod formula;
pub mod resets;

pub use engine::{Activity, LevelingEngine};
pub use formula::{Formula, calculate_level};

/// Accepted ranges for guild leveling settings.
pub mod limits {
    use std::ops::RangeInclusive;

    pub const XP_PER_MESSAGE: RangeInclusive<u32> = 1..=1000;
    pub const COOLDOWN_SECS: RangeInclusive<u32> = 0..=86_400;
    pub const MULTIPLIER_MAX: f64 = 10.0;
    pub const LEADERBOARD_LIMIT: RangeInclusive<u32> = 1..=25;
    pub const BADGE_MAX_LEN: usize = 32;

    pub fn multiplier_in_range(value: f64) -> bool {
        value.is_finite() && (0.0..=MULTIPLIER_MAX).contains(&value)
    }
}
