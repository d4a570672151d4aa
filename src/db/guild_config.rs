//! Per-guild leveling settings repository.
//!
//! Guilds without a stored row use the configured defaults. The first admin
//! change materialises a row seeded from those defaults.

use super::DbError;
use crate::config::LevelingConfig;
use crate::ids::{ChannelId, GuildId, RoleId, from_db, to_db};
use crate::leveling::Formula;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};

/// Effective leveling settings for a guild.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildLevelConfig {
    pub guild_id: GuildId,
    pub xp_per_message: u32,
    pub cooldown_secs: u32,
    pub multiplier: f64,
    pub formula: Formula,
    pub announce_channel_id: Option<ChannelId>,
    /// Sparse level -> role mapping.
    pub level_roles: BTreeMap<u32, RoleId>,
    pub enabled_channels: HashSet<ChannelId>,
    pub disabled_channels: HashSet<ChannelId>,
}

impl GuildLevelConfig {
    /// Settings for a guild that has never been configured.
    pub fn defaults(guild_id: GuildId, defaults: &LevelingConfig) -> Self {
        Self {
            guild_id,
            xp_per_message: defaults.xp_per_message,
            cooldown_secs: defaults.cooldown_secs,
            multiplier: defaults.multiplier,
            formula: defaults.formula,
            announce_channel_id: None,
            level_roles: BTreeMap::new(),
            enabled_channels: HashSet::new(),
            disabled_channels: HashSet::new(),
        }
    }

    /// Whether messages in `channel_id` earn XP.
    ///
    /// Disabled channels never do. A non-empty enabled set acts as an allowlist.
    pub fn channel_allowed(&self, channel_id: ChannelId) -> bool {
        if self.disabled_channels.contains(&channel_id) {
            return false;
        }
        self.enabled_channels.is_empty() || self.enabled_channels.contains(&channel_id)
    }

    /// XP granted per qualifying message.
    pub fn gain(&self) -> u64 {
        let gain = (self.xp_per_message as f64 * self.multiplier).floor();
        if gain.is_finite() && gain > 0.0 {
            gain as u64
        } else {
            0
        }
    }

    /// Role mapped to exactly `level`, if any.
    #[cfg(test)]
    pub fn role_for_level(&self, level: u32) -> Option<RoleId> {
        self.level_roles.get(&level).copied()
    }

    /// Roles mapped to levels strictly below `level`.
    pub fn lower_roles(&self, level: u32) -> impl Iterator<Item = RoleId> + '_ {
        self.level_roles.range(..level).map(|(_, role)| *role)
    }
}

/// Channel gating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Enabled,
    Disabled,
}

impl ChannelMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

/// A single scalar setting change.
#[derive(Debug, Clone, PartialEq)]
pub enum GuildSetting {
    XpPerMessage(u32),
    Cooldown(u32),
    Multiplier(f64),
    Formula(Formula),
    AnnounceChannel(Option<ChannelId>),
}

type ConfigRow = (i64, i64, f64, String, Option<i64>);

/// Repository for guild leveling settings.
pub struct GuildConfigRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GuildConfigRepository<'a> {
    /// Create a new guild config repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the effective settings for a guild.
    pub async fn get(
        &self,
        guild_id: GuildId,
        defaults: &LevelingConfig,
    ) -> Result<GuildLevelConfig, DbError> {
        let mut config = GuildLevelConfig::defaults(guild_id, defaults);

        let row = sqlx::query_as::<_, ConfigRow>(
            r#"
            SELECT xp_per_message, cooldown_secs, multiplier, formula, announce_channel_id
            FROM guild_level_config WHERE guild_id = ?
            "#,
        )
        .bind(to_db(guild_id))
        .fetch_optional(self.pool)
        .await?;

        if let Some((xp_per_message, cooldown_secs, multiplier, formula, announce)) = row {
            config.xp_per_message = xp_per_message.clamp(0, u32::MAX as i64) as u32;
            config.cooldown_secs = cooldown_secs.clamp(0, u32::MAX as i64) as u32;
            config.multiplier = multiplier;
            config.formula = formula.parse().map_err(|_| DbError::Corrupt {
                column: "guild_level_config.formula",
                value: formula.clone(),
            })?;
            config.announce_channel_id = announce.map(from_db);
        }

        let roles = sqlx::query_as::<_, (i64, i64)>(
            "SELECT level, role_id FROM level_roles WHERE guild_id = ?",
        )
        .bind(to_db(guild_id))
        .fetch_all(self.pool)
        .await?;
        config.level_roles = roles
            .into_iter()
            .map(|(level, role)| (level.clamp(0, u32::MAX as i64) as u32, from_db(role)))
            .collect();

        let channels = sqlx::query_as::<_, (i64, String)>(
            "SELECT channel_id, mode FROM level_channels WHERE guild_id = ?",
        )
        .bind(to_db(guild_id))
        .fetch_all(self.pool)
        .await?;
        for (channel_id, mode) in channels {
            match mode.as_str() {
                "enabled" => config.enabled_channels.insert(from_db(channel_id)),
                "disabled" => config.disabled_channels.insert(from_db(channel_id)),
                _ => {
                    return Err(DbError::Corrupt {
                        column: "level_channels.mode",
                        value: mode,
                    });
                }
            };
        }

        Ok(config)
    }

    /// Store one setting, seeding the guild row from `defaults` if needed.
    pub async fn apply(
        &self,
        guild_id: GuildId,
        defaults: &LevelingConfig,
        setting: &GuildSetting,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO guild_level_config
                (guild_id, xp_per_message, cooldown_secs, multiplier, formula, announce_channel_id)
            VALUES (?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(to_db(guild_id))
        .bind(defaults.xp_per_message as i64)
        .bind(defaults.cooldown_secs as i64)
        .bind(defaults.multiplier)
        .bind(defaults.formula.as_str())
        .execute(&mut *tx)
        .await?;

        let update = match setting {
            GuildSetting::XpPerMessage(value) => {
                sqlx::query("UPDATE guild_level_config SET xp_per_message = ? WHERE guild_id = ?")
                    .bind(*value as i64)
            }
            GuildSetting::Cooldown(value) => {
                sqlx::query("UPDATE guild_level_config SET cooldown_secs = ? WHERE guild_id = ?")
                    .bind(*value as i64)
            }
            GuildSetting::Multiplier(value) => {
                sqlx::query("UPDATE guild_level_config SET multiplier = ? WHERE guild_id = ?")
                    .bind(*value)
            }
            GuildSetting::Formula(formula) => {
                sqlx::query("UPDATE guild_level_config SET formula = ? WHERE guild_id = ?")
                    .bind(formula.as_str())
            }
            GuildSetting::AnnounceChannel(channel) => sqlx::query(
                "UPDATE guild_level_config SET announce_channel_id = ? WHERE guild_id = ?",
            )
            .bind(channel.map(to_db)),
        };
        update.bind(to_db(guild_id)).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Map a level to a role, replacing any previous mapping for that level.
    pub async fn map_role(
        &self,
        guild_id: GuildId,
        level: u32,
        role_id: RoleId,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO level_roles (guild_id, level, role_id) VALUES (?, ?, ?)
            ON CONFLICT(guild_id, level) DO UPDATE SET role_id = excluded.role_id
            "#,
        )
        .bind(to_db(guild_id))
        .bind(level as i64)
        .bind(to_db(role_id))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a level's role mapping. Returns false if none existed.
    pub async fn unmap_role(&self, guild_id: GuildId, level: u32) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM level_roles WHERE guild_id = ? AND level = ?")
            .bind(to_db(guild_id))
            .bind(level as i64)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set or clear (`None`) a channel's gating mode.
    pub async fn set_channel_mode(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: Option<ChannelMode>,
    ) -> Result<(), DbError> {
        match mode {
            Some(mode) => {
                sqlx::query(
                    r#"
                    INSERT INTO level_channels (guild_id, channel_id, mode) VALUES (?, ?, ?)
                    ON CONFLICT(guild_id, channel_id) DO UPDATE SET mode = excluded.mode
                    "#,
                )
                .bind(to_db(guild_id))
                .bind(to_db(channel_id))
                .bind(mode.as_str())
                .execute(self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM level_channels WHERE guild_id = ? AND channel_id = ?")
                    .bind(to_db(guild_id))
                    .bind(to_db(channel_id))
                    .execute(self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn unconfigured_guild_uses_defaults() {
        let db = Database::new(":memory:").await.unwrap();
        let defaults = LevelingConfig::default();
        let config = db.guild_configs().get(1, &defaults).await.unwrap();
        assert_eq!(config, GuildLevelConfig::defaults(1, &defaults));
        assert_eq!(config.gain(), 25);
    }

    #[tokio::test]
    async fn settings_persist_individually() {
        let db = Database::new(":memory:").await.unwrap();
        let defaults = LevelingConfig::default();
        let repo = db.guild_configs();

        repo.apply(1, &defaults, &GuildSetting::Multiplier(1.5)).await.unwrap();
        repo.apply(1, &defaults, &GuildSetting::Formula(Formula::Linear)).await.unwrap();
        repo.apply(1, &defaults, &GuildSetting::AnnounceChannel(Some(77))).await.unwrap();

        let config = repo.get(1, &defaults).await.unwrap();
        assert_eq!(config.xp_per_message, 25);
        assert_eq!(config.multiplier, 1.5);
        assert_eq!(config.formula, Formula::Linear);
        assert_eq!(config.announce_channel_id, Some(77));
        assert_eq!(config.gain(), 37);

        // Other guilds are unaffected.
        assert_eq!(repo.get(2, &defaults).await.unwrap().formula, Formula::Exponential);
    }

    #[tokio::test]
    async fn role_mapping_and_lower_roles() {
        let db = Database::new(":memory:").await.unwrap();
        let defaults = LevelingConfig::default();
        let repo = db.guild_configs();

        repo.map_role(1, 10, 1010).await.unwrap();
        repo.map_role(1, 20, 1020).await.unwrap();
        repo.map_role(1, 30, 1030).await.unwrap();
        repo.map_role(1, 20, 2020).await.unwrap();
        assert!(repo.unmap_role(1, 30).await.unwrap());
        assert!(!repo.unmap_role(1, 30).await.unwrap());

        let config = repo.get(1, &defaults).await.unwrap();
        assert_eq!(config.role_for_level(20), Some(2020));
        assert_eq!(config.role_for_level(30), None);
        assert_eq!(config.lower_roles(20).collect::<Vec<_>>(), vec![1010]);
    }

    #[tokio::test]
    async fn channel_gating() {
        let db = Database::new(":memory:").await.unwrap();
        let defaults = LevelingConfig::default();
        let repo = db.guild_configs();

        repo.set_channel_mode(1, 5, Some(ChannelMode::Disabled)).await.unwrap();
        let config = repo.get(1, &defaults).await.unwrap();
        assert!(!config.channel_allowed(5));
        assert!(config.channel_allowed(6));

        repo.set_channel_mode(1, 6, Some(ChannelMode::Enabled)).await.unwrap();
        let config = repo.get(1, &defaults).await.unwrap();
        assert!(config.channel_allowed(6));
        assert!(!config.channel_allowed(7));

        repo.set_channel_mode(1, 6, None).await.unwrap();
        repo.set_channel_mode(1, 5, None).await.unwrap();
        let config = repo.get(1, &defaults).await.unwrap();
        assert!(config.channel_allowed(5));
        assert!(config.channel_allowed(7));
    }
}
