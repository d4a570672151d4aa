//! Leveling engine.
//!
//! Every XP mutation, organic or administrative, ends in
//! [`LevelingEngine::finish_transition`], which is the only place level-up
//! side effects are produced. They are produced only when the stored level
//! strictly increased, so recomputing an unchanged XP never repeats them.

use super::formula::{self, MAX_LEVEL, MAX_XP, xp_to_next_level};
use super::limits;
use crate::config::LevelingConfig;
use crate::db::{
    Board, ChannelMode, Database, GuildLevelConfig, GuildSetting, LevelRecord, ResetScope, XpChange,
};
use crate::effect::Effect;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ChannelId, GuildId, RoleId, UserId, mention, role_mention};
use crate::leveling::Formula;
use tracing::{debug, info};

/// One message eligible for XP.
#[derive(Debug, Clone)]
pub struct Activity {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Roles the author holds, when the event carried them.
    pub roles: Option<Vec<RoleId>>,
    /// Epoch seconds.
    pub now: i64,
}

/// Why a message earned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ChannelDisabled,
    Cooldown,
}

/// An upward level crossing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChange {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub previous_level: u32,
    pub level: u32,
    pub xp: u64,
    /// Role granted for the crossing, if one is mapped.
    pub role_id: Option<RoleId>,
}

/// Result of [`LevelingEngine::award_activity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    Ignored(IgnoreReason),
    Awarded { gain: u64, xp: u64, level: u32 },
    LevelUp(LevelChange),
}

/// Summary shown by the rank command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankInfo {
    pub level: u32,
    pub xp: u64,
    /// 1-based position by total XP; `None` before the first award.
    pub position: Option<u64>,
    pub xp_to_next: Option<u64>,
    pub weekly_xp: u64,
    pub monthly_xp: u64,
    pub total_messages: u64,
    pub badges: Vec<String>,
}

/// Awards XP and keeps levels, roles and announcements consistent.
pub struct LevelingEngine {
    db: Database,
    defaults: LevelingConfig,
}

impl LevelingEngine {
    pub fn new(db: Database, defaults: LevelingConfig) -> Self {
        Self { db, defaults }
    }

    /// Effective settings for a guild.
    pub async fn config(&self, guild_id: GuildId) -> EngineResult<GuildLevelConfig> {
        Ok(self.db.guild_configs().get(guild_id, &self.defaults).await?)
    }

    /// Award XP for a message, subject to channel gating and cooldown.
    pub async fn award_activity(
        &self,
        activity: &Activity,
    ) -> EngineResult<(AwardOutcome, Vec<Effect>)> {
        let config = self.config(activity.guild_id).await?;

        if !config.channel_allowed(activity.channel_id) {
            return Ok((AwardOutcome::Ignored(IgnoreReason::ChannelDisabled), Vec::new()));
        }

        let gain = config.gain();
        let change = self
            .db
            .levels()
            .record_activity(
                activity.guild_id,
                activity.user_id,
                gain,
                activity.now,
                config.cooldown_secs,
                config.formula,
            )
            .await?;

        let Some(change) = change else {
            debug!(guild = activity.guild_id, user = activity.user_id, "XP cooldown active");
            return Ok((AwardOutcome::Ignored(IgnoreReason::Cooldown), Vec::new()));
        };
        crate::metrics::record_xp_awarded(gain);

        let (level_change, effects) = self.finish_transition(
            &config,
            &change,
            activity.channel_id,
            activity.roles.as_deref(),
        );

        let outcome = match level_change {
            Some(level_change) => AwardOutcome::LevelUp(level_change),
            None => AwardOutcome::Awarded {
                gain,
                xp: change.record.xp,
                level: change.record.level,
            },
        };
        Ok((outcome, effects))
    }

    /// Overwrite a user's XP.
    pub async fn set_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        xp: u64,
        origin: ChannelId,
    ) -> EngineResult<(XpChange, Vec<Effect>)> {
        if xp > MAX_XP {
            return Err(EngineError::XpOutOfRange(xp.to_string()));
        }
        let config = self.config(guild_id).await?;
        let change = self
            .db
            .levels()
            .overwrite_xp(guild_id, user_id, xp, config.formula)
            .await?;
        info!(guild = guild_id, user = user_id, xp, level = change.record.level, "XP set");
        Ok(self.admin_transition(&config, change, origin))
    }

    /// Add XP to a user's total.
    pub async fn add_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delta: u64,
        origin: ChannelId,
    ) -> EngineResult<(XpChange, Vec<Effect>)> {
        if delta == 0 || delta > MAX_XP {
            return Err(EngineError::XpOutOfRange(delta.to_string()));
        }
        let config = self.config(guild_id).await?;
        let change = self
            .db
            .levels()
            .add_xp(guild_id, user_id, delta, config.formula)
            .await?;
        info!(guild = guild_id, user = user_id, delta, xp = change.record.xp, "XP added");
        Ok(self.admin_transition(&config, change, origin))
    }

    /// Set a user's XP to the threshold of `level`.
    pub async fn set_level(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        level: u32,
        origin: ChannelId,
    ) -> EngineResult<(XpChange, Vec<Effect>)> {
        if !(formula::MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(EngineError::LevelOutOfRange(level));
        }
        let config = self.config(guild_id).await?;
        if !formula::is_reachable(level, config.formula) {
            return Err(EngineError::LevelUnreachable {
                level,
                formula: config.formula,
            });
        }

        let xp = formula::xp_for_level(level, config.formula);
        let change = self
            .db
            .levels()
            .overwrite_xp(guild_id, user_id, xp, config.formula)
            .await?;
        info!(guild = guild_id, user = user_id, level, xp, "Level set");
        Ok(self.admin_transition(&config, change, origin))
    }

    fn admin_transition(
        &self,
        config: &GuildLevelConfig,
        change: XpChange,
        origin: ChannelId,
    ) -> (XpChange, Vec<Effect>) {
        let (_, effects) = self.finish_transition(config, &change, origin, None);
        (change, effects)
    }

    /// Level-up side effects for a committed XP change.
    ///
    /// Produces nothing unless the level strictly increased. On a crossing it
    /// announces the new level and, when a role is mapped to a level inside
    /// the crossed range, grants the highest such role and revokes every
    /// lower level role. With `held_roles` known only held roles are revoked.
    fn finish_transition(
        &self,
        config: &GuildLevelConfig,
        change: &XpChange,
        origin: ChannelId,
        held_roles: Option<&[RoleId]>,
    ) -> (Option<LevelChange>, Vec<Effect>) {
        if !change.leveled_up() {
            return (None, Vec::new());
        }

        let record = &change.record;
        let (guild_id, user_id) = (record.guild_id, record.user_id);
        let mut effects = Vec::new();

        let reward = config
            .level_roles
            .range(change.previous_level + 1..=record.level)
            .next_back()
            .map(|(level, role)| (*level, *role));

        let channel_id = config.announce_channel_id.unwrap_or(origin);
        effects.push(Effect::Notify {
            channel_id,
            text: level_up_text(user_id, record.level, reward.map(|(_, role)| role)),
        });

        if let Some((reward_level, role_id)) = reward {
            effects.push(Effect::GrantRole {
                guild_id,
                user_id,
                role_id,
            });
            for lower in config.lower_roles(reward_level) {
                let held = held_roles.is_none_or(|roles| roles.contains(&lower));
                if held && lower != role_id {
                    effects.push(Effect::RevokeRole {
                        guild_id,
                        user_id,
                        role_id: lower,
                    });
                }
            }
        }

        crate::metrics::record_level_up();
        info!(
            guild = guild_id,
            user = user_id,
            from = change.previous_level,
            to = record.level,
            "Level up"
        );

        let level_change = LevelChange {
            guild_id,
            user_id,
            previous_level: change.previous_level,
            level: record.level,
            xp: record.xp,
            role_id: reward.map(|(_, role)| role),
        };
        (Some(level_change), effects)
    }

    /// Rank summary for a user.
    pub async fn rank(&self, guild_id: GuildId, user_id: UserId) -> EngineResult<RankInfo> {
        let config = self.config(guild_id).await?;
        let levels = self.db.levels();
        let record = levels.get(guild_id, user_id).await?;
        let position = levels.rank_position(guild_id, user_id).await?;
        let badges = levels.badges(guild_id, user_id).await?;

        let (xp, weekly_xp, monthly_xp, total_messages) = record
            .as_ref()
            .map(|r| (r.xp, r.weekly_xp, r.monthly_xp, r.total_messages))
            .unwrap_or_default();
        let level = record.as_ref().map_or(formula::MIN_LEVEL, |r| r.level);

        Ok(RankInfo {
            level,
            xp,
            position,
            xp_to_next: xp_to_next_level(xp, config.formula),
            weekly_xp,
            monthly_xp,
            total_messages,
            badges,
        })
    }

    pub async fn leaderboard(
        &self,
        guild_id: GuildId,
        board: Board,
        limit: u32,
    ) -> EngineResult<Vec<LevelRecord>> {
        if !limits::LEADERBOARD_LIMIT.contains(&limit) {
            return Err(EngineError::LimitOutOfRange(limit));
        }
        Ok(self.db.levels().leaderboard(guild_id, board, limit).await?)
    }

    /// Give a user a badge. Returns false if they already had it.
    pub async fn award_badge(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        badge: &str,
        now: i64,
    ) -> EngineResult<bool> {
        let badge = badge.trim();
        let valid = !badge.is_empty()
            && badge.len() <= limits::BADGE_MAX_LEN
            && badge
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EngineError::InvalidBadge);
        }
        Ok(self.db.levels().add_badge(guild_id, user_id, badge, now).await?)
    }

    // ------------------------------------------------------------------
    // Guild configuration
    // ------------------------------------------------------------------

    pub async fn set_xp_rate(&self, guild_id: GuildId, xp_per_message: u32) -> EngineResult<()> {
        if !limits::XP_PER_MESSAGE.contains(&xp_per_message) {
            return Err(out_of_range("XP rate", xp_per_message));
        }
        self.apply_setting(guild_id, GuildSetting::XpPerMessage(xp_per_message))
            .await
    }

    pub async fn set_cooldown(&self, guild_id: GuildId, cooldown_secs: u32) -> EngineResult<()> {
        if !limits::COOLDOWN_SECS.contains(&cooldown_secs) {
            return Err(out_of_range("cooldown", cooldown_secs));
        }
        self.apply_setting(guild_id, GuildSetting::Cooldown(cooldown_secs))
            .await
    }

    pub async fn set_multiplier(&self, guild_id: GuildId, multiplier: f64) -> EngineResult<()> {
        if !limits::multiplier_in_range(multiplier) {
            return Err(out_of_range("multiplier", multiplier));
        }
        self.apply_setting(guild_id, GuildSetting::Multiplier(multiplier))
            .await
    }

    /// Switch formula and rewrite stored levels to match.
    ///
    /// Levels may move either way. No announcements or role changes follow.
    /// Returns how many records changed level.
    pub async fn set_formula(&self, guild_id: GuildId, formula: Formula) -> EngineResult<u64> {
        self.apply_setting(guild_id, GuildSetting::Formula(formula))
            .await?;
        let changed = self.db.levels().recompute_levels(guild_id, formula).await?;
        info!(guild = guild_id, formula = %formula, changed, "Formula changed");
        Ok(changed)
    }

    pub async fn set_announce_channel(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    ) -> EngineResult<()> {
        self.apply_setting(guild_id, GuildSetting::AnnounceChannel(channel_id))
            .await
    }

    async fn apply_setting(&self, guild_id: GuildId, setting: GuildSetting) -> EngineResult<()> {
        self.db
            .guild_configs()
            .apply(guild_id, &self.defaults, &setting)
            .await?;
        info!(guild = guild_id, setting = ?setting, "Leveling setting changed");
        Ok(())
    }

    pub async fn map_role(&self, guild_id: GuildId, level: u32, role_id: RoleId) -> EngineResult<()> {
        if !(formula::MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(EngineError::LevelOutOfRange(level));
        }
        self.db.guild_configs().map_role(guild_id, level, role_id).await?;
        info!(guild = guild_id, level, role = role_id, "Level role mapped");
        Ok(())
    }

    /// Returns false when no role was mapped to `level`.
    pub async fn unmap_role(&self, guild_id: GuildId, level: u32) -> EngineResult<bool> {
        if !(formula::MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(EngineError::LevelOutOfRange(level));
        }
        Ok(self.db.guild_configs().unmap_role(guild_id, level).await?)
    }

    /// Set or clear (`None`) XP gating for a channel.
    pub async fn set_channel_mode(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: Option<ChannelMode>,
    ) -> EngineResult<()> {
        self.db
            .guild_configs()
            .set_channel_mode(guild_id, channel_id, mode)
            .await?;
        Ok(())
    }

    /// Zero a windowed counter for one guild, or all guilds with `None`.
    pub async fn reset_counters(
        &self,
        scope: ResetScope,
        guild_id: Option<GuildId>,
    ) -> EngineResult<u64> {
        let cleared = self.db.levels().reset_counter(scope, guild_id).await?;
        info!(scope = scope.as_str(), guild = ?guild_id, cleared, "Counters reset");
        Ok(cleared)
    }
}

fn out_of_range(field: &'static str, value: impl ToString) -> EngineError {
    EngineError::SettingOutOfRange {
        field,
        value: value.to_string(),
    }
}

fn level_up_text(user_id: UserId, level: u32, role_id: Option<RoleId>) -> String {
    let who = mention(user_id);
    let mut text = if level >= MAX_LEVEL {
        format!("{} reached the maximum level ({})!", who, MAX_LEVEL)
    } else if level % 10 == 0 {
        format!("{} hit milestone level {}!", who, level)
    } else {
        format!("{} leveled up to level {}.", who, level)
    };
    if let Some(role_id) = role_id {
        text.push_str(&format!(" New role: {}.", role_mention(role_id)));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: GuildId = 1;
    const CH: ChannelId = 10;

    async fn engine() -> LevelingEngine {
        let db = Database::new(":memory:").await.unwrap();
        LevelingEngine::new(db, LevelingConfig::default())
    }

    fn message(user_id: UserId, now: i64) -> Activity {
        Activity {
            guild_id: G,
            channel_id: CH,
            user_id,
            roles: None,
            now,
        }
    }

    #[tokio::test]
    async fn cooldown_gates_awards() {
        let engine = engine().await;

        let (first, _) = engine.award_activity(&message(1, 1_000)).await.unwrap();
        assert_eq!(first, AwardOutcome::Awarded { gain: 25, xp: 25, level: 1 });

        let (second, effects) = engine.award_activity(&message(1, 1_030)).await.unwrap();
        assert_eq!(second, AwardOutcome::Ignored(IgnoreReason::Cooldown));
        assert!(effects.is_empty());

        let (third, effects) = engine.award_activity(&message(1, 1_091)).await.unwrap();
        let AwardOutcome::LevelUp(change) = third else {
            panic!("expected level up, got {:?}", third);
        };
        assert_eq!((change.previous_level, change.level, change.xp), (1, 2, 50));
        assert_eq!(effects.len(), 1);
    }

    #[tokio::test]
    async fn awards_keep_working_at_max_xp() {
        let engine = engine().await;
        engine.set_xp(G, 5, MAX_XP, CH).await.unwrap();

        for now in [0, 4_000] {
            let (outcome, effects) = engine.award_activity(&message(5, now)).await.unwrap();
            assert_eq!(
                outcome,
                AwardOutcome::Awarded { gain: 25, xp: MAX_XP, level: MAX_LEVEL }
            );
            assert!(effects.is_empty());
        }
        assert_eq!(engine.rank(G, 5).await.unwrap().total_messages, 2);
    }

    #[tokio::test]
    async fn scenario_reaches_level_three_at_200_xp() {
        let engine = engine().await;
        let mut now = 0;
        let mut ups = Vec::new();
        for _ in 0..8 {
            let (outcome, _) = engine.award_activity(&message(1, now)).await.unwrap();
            if let AwardOutcome::LevelUp(change) = outcome {
                ups.push((change.previous_level, change.level, change.xp));
            }
            now += 61;
        }

        let rank = engine.rank(G, 1).await.unwrap();
        assert_eq!(rank.xp, 200);
        assert_eq!(rank.level, 3);
        assert_eq!(rank.total_messages, 8);
        assert_eq!(ups, vec![(1, 2, 50), (2, 3, 200)]);
    }

    #[tokio::test]
    async fn level_up_fires_once_per_crossing() {
        let engine = engine().await;
        engine.set_announce_channel(G, Some(99)).await.unwrap();

        let (_, effects) = engine.add_xp(G, 1, 50, CH).await.unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Notify { channel_id: 99, .. }));

        // Same XP again: no crossing, no effects.
        let (change, effects) = engine.set_xp(G, 1, 50, CH).await.unwrap();
        assert!(!change.leveled_up());
        assert!(effects.is_empty());

        // Formula changes move levels silently.
        assert_eq!(engine.set_formula(G, Formula::Linear).await.unwrap(), 1);
        assert_eq!(engine.rank(G, 1).await.unwrap().level, 1);
        assert_eq!(engine.set_formula(G, Formula::Exponential).await.unwrap(), 1);
        let (change, effects) = engine.set_xp(G, 1, 50, CH).await.unwrap();
        assert_eq!(change.previous_level, 2);
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn disabled_channel_is_ignored() {
        let engine = engine().await;
        engine
            .set_channel_mode(G, CH, Some(ChannelMode::Disabled))
            .await
            .unwrap();

        let (outcome, _) = engine.award_activity(&message(1, 0)).await.unwrap();
        assert_eq!(outcome, AwardOutcome::Ignored(IgnoreReason::ChannelDisabled));
        assert_eq!(engine.rank(G, 1).await.unwrap().position, None);
    }

    #[tokio::test]
    async fn role_reward_grants_and_revokes_lower_roles() {
        let engine = engine().await;
        engine.map_role(G, 2, 502).await.unwrap();
        engine.map_role(G, 3, 503).await.unwrap();

        let (_, effects) = engine.set_level(G, 1, 2, CH).await.unwrap();
        assert!(effects.contains(&Effect::GrantRole { guild_id: G, user_id: 1, role_id: 502 }));

        let activity = Activity {
            roles: Some(vec![502]),
            ..message(1, 0)
        };
        engine.set_xp(G, 1, 190, CH).await.unwrap();
        let (outcome, effects) = engine.award_activity(&activity).await.unwrap();
        let AwardOutcome::LevelUp(change) = outcome else {
            panic!("expected level up, got {:?}", outcome);
        };
        assert_eq!(change.level, 3);
        assert_eq!(change.role_id, Some(503));
        assert_eq!(
            &effects[1..],
            &[
                Effect::GrantRole { guild_id: G, user_id: 1, role_id: 503 },
                Effect::RevokeRole { guild_id: G, user_id: 1, role_id: 502 },
            ]
        );
    }

    #[tokio::test]
    async fn known_roles_limit_revokes() {
        let engine = engine().await;
        engine.map_role(G, 2, 502).await.unwrap();
        engine.map_role(G, 3, 503).await.unwrap();

        let activity = Activity {
            roles: Some(vec![]),
            ..message(1, 0)
        };
        engine.set_xp(G, 1, 190, CH).await.unwrap();
        let (_, effects) = engine.award_activity(&activity).await.unwrap();
        assert!(!effects.iter().any(|e| matches!(e, Effect::RevokeRole { .. })));
    }

    #[tokio::test]
    async fn set_level_validates() {
        let engine = engine().await;
        assert!(matches!(
            engine.set_level(G, 1, 0, CH).await,
            Err(EngineError::LevelOutOfRange(0))
        ));
        assert!(matches!(
            engine.set_level(G, 1, 201, CH).await,
            Err(EngineError::LevelOutOfRange(201))
        ));

        engine.set_formula(G, Formula::Logarithmic).await.unwrap();
        assert!(matches!(
            engine.set_level(G, 1, 2, CH).await,
            Err(EngineError::LevelUnreachable { level: 2, .. })
        ));

        let (change, _) = engine.set_level(G, 1, 20, CH).await.unwrap();
        assert_eq!(change.record.level, 20);
    }

    #[tokio::test]
    async fn set_level_round_trips_and_lowering_is_silent() {
        let engine = engine().await;
        let (change, effects) = engine.set_level(G, 1, 50, CH).await.unwrap();
        assert_eq!(change.record.xp, 49 * 49 * 50);
        assert_eq!(change.record.level, 50);
        assert_eq!(effects.len(), 1);

        let (change, effects) = engine.set_level(G, 1, 5, CH).await.unwrap();
        assert_eq!(change.record.level, 5);
        assert!(effects.is_empty());
    }

    #[test]
    fn milestone_and_max_level_text() {
        assert!(level_up_text(1, 200, None).contains("maximum level"));
        assert!(level_up_text(1, 30, None).contains("milestone"));
        assert_eq!(level_up_text(1, 7, Some(9)), "<@1> leveled up to level 7. New role: <@&9>.");
    }

    #[tokio::test]
    async fn config_commands_validate_ranges() {
        let engine = engine().await;
        assert!(matches!(
            engine.set_xp_rate(G, 0).await,
            Err(EngineError::SettingOutOfRange { field: "XP rate", .. })
        ));
        assert!(engine.set_cooldown(G, 86_401).await.is_err());
        assert!(engine.set_multiplier(G, f64::NAN).await.is_err());
        assert!(engine.set_multiplier(G, 10.5).await.is_err());
        assert!(matches!(engine.map_role(G, 201, 1).await, Err(EngineError::LevelOutOfRange(201))));

        engine.set_xp_rate(G, 100).await.unwrap();
        engine.set_multiplier(G, 0.5).await.unwrap();
        assert_eq!(engine.config(G).await.unwrap().gain(), 50);
    }

    #[tokio::test]
    async fn leaderboard_limit_and_badges() {
        let engine = engine().await;
        assert!(matches!(
            engine.leaderboard(G, Board::Total, 0).await,
            Err(EngineError::LimitOutOfRange(0))
        ));
        assert!(engine.leaderboard(G, Board::Weekly, 26).await.is_err());

        assert!(engine.award_badge(G, 1, "helper", 0).await.unwrap());
        assert!(!engine.award_badge(G, 1, " helper ", 1).await.unwrap());
        assert!(matches!(engine.award_badge(G, 1, "no spaces", 1).await, Err(EngineError::InvalidBadge)));
        assert_eq!(engine.rank(G, 1).await.unwrap().badges, vec!["helper"]);
    }
}
