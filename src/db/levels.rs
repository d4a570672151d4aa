//! Level record repository.
//!
//! XP and level are always written in the same database transaction, with
//! the level derived from the new XP by the guild's formula.

use super::DbError;
use crate::ids::{GuildId, UserId, from_db, to_db};
use crate::leveling::{Formula, calculate_level};
use sqlx::{SqliteConnection, SqlitePool};

/// Persisted leveling state for one user in one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRecord {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub xp: u64,
    pub level: u32,
    pub last_activity_at: Option<i64>,
    pub total_messages: u64,
    pub weekly_xp: u64,
    pub monthly_xp: u64,
}

type LevelRow = (i64, i64, i64, i64, Option<i64>, i64, i64, i64);

impl From<LevelRow> for LevelRecord {
    fn from(row: LevelRow) -> Self {
        let (guild_id, user_id, xp, level, last_activity_at, total_messages, weekly_xp, monthly_xp) =
            row;
        LevelRecord {
            guild_id: from_db(guild_id),
            user_id: from_db(user_id),
            xp: xp.max(0) as u64,
            level: level.clamp(1, u32::MAX as i64) as u32,
            last_activity_at,
            total_messages: total_messages.max(0) as u64,
            weekly_xp: weekly_xp.max(0) as u64,
            monthly_xp: monthly_xp.max(0) as u64,
        }
    }
}

const RECORD_COLUMNS: &str =
    "guild_id, user_id, xp, level, last_activity_at, total_messages, weekly_xp, monthly_xp";

/// An XP write together with the level stored before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpChange {
    pub previous_level: u32,
    pub record: LevelRecord,
}

impl XpChange {
    /// True when the stored level strictly increased.
    pub fn leveled_up(&self) -> bool {
        self.record.level > self.previous_level
    }
}

/// Leaderboard ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Board {
    #[default]
    Total,
    Weekly,
    Monthly,
}

impl Board {
    fn column(&self) -> &'static str {
        match self {
            Self::Total => "xp",
            Self::Weekly => "weekly_xp",
            Self::Monthly => "monthly_xp",
        }
    }
}

/// Which windowed counter a reset clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    Weekly,
    Monthly,
}

impl ResetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly_xp",
            Self::Monthly => "monthly_xp",
        }
    }
}

/// Repository for level records.
pub struct LevelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LevelRepository<'a> {
    /// Create a new level repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a record.
    pub async fn get(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<LevelRecord>, DbError> {
        let row = sqlx::query_as::<_, LevelRow>(&format!(
            "SELECT {} FROM level_records WHERE guild_id = ? AND user_id = ?",
            RECORD_COLUMNS
        ))
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(LevelRecord::from))
    }

    /// Award `gain` XP for a message at `now` unless the user is cooling down.
    ///
    /// The cooldown check and the increment are one conditional upsert, so
    /// two concurrent messages cannot both pass the same cooldown window.
    /// Totals saturate at `i64::MAX` instead of overflowing into REAL.
    /// Returns `None` when the cooldown rejected the award.
    pub async fn record_activity(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        gain: u64,
        now: i64,
        cooldown_secs: u32,
        formula: Formula,
    ) -> Result<Option<XpChange>, DbError> {
        let gain = gain.min(i64::MAX as u64) as i64;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LevelRow>(&format!(
            r#"
            INSERT INTO level_records
                (guild_id, user_id, xp, level, last_activity_at, total_messages, weekly_xp, monthly_xp)
            VALUES (?, ?, ?, 1, ?, 1, ?, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                xp = MIN(level_records.xp, {max} - excluded.xp) + excluded.xp,
                weekly_xp = MIN(level_records.weekly_xp, {max} - excluded.xp) + excluded.xp,
                monthly_xp = MIN(level_records.monthly_xp, {max} - excluded.xp) + excluded.xp,
                total_messages = level_records.total_messages + 1,
                last_activity_at = excluded.last_activity_at
            WHERE level_records.last_activity_at IS NULL
               OR excluded.last_activity_at - level_records.last_activity_at >= ?
            RETURNING {}
            "#,
            RECORD_COLUMNS,
            max = i64::MAX
        ))
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(gain)
        .bind(now)
        .bind(gain)
        .bind(gain)
        .bind(cooldown_secs as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Cooldown: nothing was written.
            tx.rollback().await?;
            return Ok(None);
        };

        let change = settle_level(&mut tx, LevelRecord::from(row), formula).await?;
        tx.commit().await?;
        Ok(Some(change))
    }

    /// Overwrite a user's XP (admin), keeping windowed counters untouched.
    pub async fn overwrite_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        xp: u64,
        formula: Formula,
    ) -> Result<XpChange, DbError> {
        self.write_xp(guild_id, user_id, formula, |_| xp).await
    }

    /// Add XP to a user's total (admin), saturating at the storage limit.
    pub async fn add_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delta: u64,
        formula: Formula,
    ) -> Result<XpChange, DbError> {
        self.write_xp(guild_id, user_id, formula, |current| {
            current.saturating_add(delta).min(i64::MAX as u64)
        })
        .await
    }

    async fn write_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        formula: Formula,
        next_xp: impl FnOnce(u64) -> u64,
    ) -> Result<XpChange, DbError> {
        let mut tx = self.pool.begin().await?;

        // Write first so the read below happens under the write lock.
        sqlx::query("INSERT OR IGNORE INTO level_records (guild_id, user_id) VALUES (?, ?)")
            .bind(to_db(guild_id))
            .bind(to_db(user_id))
            .execute(&mut *tx)
            .await?;

        let current = sqlx::query_scalar::<_, i64>(
            "SELECT xp FROM level_records WHERE guild_id = ? AND user_id = ?",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_one(&mut *tx)
        .await?;

        let xp = next_xp(current.max(0) as u64).min(i64::MAX as u64) as i64;
        let row = sqlx::query_as::<_, LevelRow>(&format!(
            "UPDATE level_records SET xp = ? WHERE guild_id = ? AND user_id = ? RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(xp)
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_one(&mut *tx)
        .await?;

        let change = settle_level(&mut tx, LevelRecord::from(row), formula).await?;
        tx.commit().await?;
        Ok(change)
    }

    /// Rewrite every stored level in a guild from its XP (formula change).
    ///
    /// Returns how many records changed. No level-up effects are implied.
    pub async fn recompute_levels(
        &self,
        guild_id: GuildId,
        formula: Formula,
    ) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT user_id, xp, level FROM level_records WHERE guild_id = ?",
        )
        .bind(to_db(guild_id))
        .fetch_all(&mut *tx)
        .await?;

        let mut changed = 0;
        for (user_id, xp, level) in rows {
            let derived = calculate_level(xp.max(0) as u64, formula) as i64;
            if derived != level {
                sqlx::query("UPDATE level_records SET level = ? WHERE guild_id = ? AND user_id = ?")
                    .bind(derived)
                    .bind(to_db(guild_id))
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                changed += 1;
            }
        }

        tx.commit().await?;
        Ok(changed)
    }

    /// Zero a windowed counter for one guild or, with `None`, every guild.
    ///
    /// Rows already at zero are not touched, so a repeated reset reports 0.
    pub async fn reset_counter(
        &self,
        scope: ResetScope,
        guild_id: Option<GuildId>,
    ) -> Result<u64, DbError> {
        let column = scope.column();
        let result = match guild_id {
            Some(guild_id) => {
                sqlx::query(&format!(
                    "UPDATE level_records SET {col} = 0 WHERE guild_id = ? AND {col} != 0",
                    col = column
                ))
                .bind(to_db(guild_id))
                .execute(self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE level_records SET {col} = 0 WHERE {col} != 0",
                    col = column
                ))
                .execute(self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    /// When a global reset of `scope` last ran.
    pub async fn last_reset(&self, scope: ResetScope) -> Result<Option<i64>, DbError> {
        let at = sqlx::query_scalar::<_, i64>(
            "SELECT last_reset_at FROM counter_resets WHERE scope = ?",
        )
        .bind(scope.as_str())
        .fetch_optional(self.pool)
        .await?;
        Ok(at)
    }

    /// Record that a global reset of `scope` ran at `at`.
    pub async fn mark_reset(&self, scope: ResetScope, at: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO counter_resets (scope, last_reset_at) VALUES (?, ?)
            ON CONFLICT(scope) DO UPDATE SET last_reset_at = excluded.last_reset_at
            "#,
        )
        .bind(scope.as_str())
        .bind(at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Top records for a guild on the given board.
    pub async fn leaderboard(
        &self,
        guild_id: GuildId,
        board: Board,
        limit: u32,
    ) -> Result<Vec<LevelRecord>, DbError> {
        let rows = sqlx::query_as::<_, LevelRow>(&format!(
            "SELECT {cols} FROM level_records WHERE guild_id = ? AND {col} > 0 \
             ORDER BY {col} DESC, user_id ASC LIMIT ?",
            cols = RECORD_COLUMNS,
            col = board.column()
        ))
        .bind(to_db(guild_id))
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(LevelRecord::from).collect())
    }

    /// 1-based position of a user by total XP, or `None` without a record.
    pub async fn rank_position(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<u64>, DbError> {
        let Some(record) = self.get(guild_id, user_id).await? else {
            return Ok(None);
        };

        let ahead = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM level_records WHERE guild_id = ? AND xp > ?",
        )
        .bind(to_db(guild_id))
        .bind(record.xp as i64)
        .fetch_one(self.pool)
        .await?;

        Ok(Some(ahead as u64 + 1))
    }

    /// Append a badge. Returns false when the user already had it.
    pub async fn add_badge(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        badge: &str,
        now: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO level_badges (guild_id, user_id, badge, awarded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(badge)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Badges held by a user, oldest first.
    pub async fn badges(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<String>, DbError> {
        let badges = sqlx::query_scalar::<_, String>(
            "SELECT badge FROM level_badges WHERE guild_id = ? AND user_id = ? ORDER BY awarded_at, badge",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_all(self.pool)
        .await?;
        Ok(badges)
    }
}

/// Bring the stored level in line with the record's XP inside `conn`'s transaction.
async fn settle_level(
    conn: &mut SqliteConnection,
    mut record: LevelRecord,
    formula: Formula,
) -> Result<XpChange, DbError> {
    let previous_level = record.level;
    let derived = calculate_level(record.xp, formula);

    if derived != previous_level {
        sqlx::query("UPDATE level_records SET level = ? WHERE guild_id = ? AND user_id = ?")
            .bind(derived as i64)
            .bind(to_db(record.guild_id))
            .bind(to_db(record.user_id))
            .execute(&mut *conn)
            .await?;
        record.level = derived;
    }

    Ok(XpChange {
        previous_level,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    const G: GuildId = 100;

    #[tokio::test]
    async fn first_activity_creates_record() {
        let db = Database::new(":memory:").await.unwrap();
        let change = db
            .levels()
            .record_activity(G, 1, 25, 1_000, 60, Formula::Exponential)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(change.previous_level, 1);
        assert_eq!(change.record.xp, 25);
        assert_eq!(change.record.level, 1);
        assert_eq!(change.record.total_messages, 1);
        assert_eq!(change.record.weekly_xp, 25);
        assert_eq!(change.record.monthly_xp, 25);
        assert_eq!(change.record.last_activity_at, Some(1_000));
        assert!(!change.leveled_up());
    }

    #[tokio::test]
    async fn cooldown_rejects_without_writing() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels
            .record_activity(G, 1, 25, 1_000, 60, Formula::Exponential)
            .await
            .unwrap();

        let rejected = levels
            .record_activity(G, 1, 25, 1_030, 60, Formula::Exponential)
            .await
            .unwrap();
        assert!(rejected.is_none());

        let record = levels.get(G, 1).await.unwrap().unwrap();
        assert_eq!(record.xp, 25);
        assert_eq!(record.total_messages, 1);
        assert_eq!(record.last_activity_at, Some(1_000));

        let accepted = levels
            .record_activity(G, 1, 25, 1_061, 60, Formula::Exponential)
            .await
            .unwrap();
        assert_eq!(accepted.unwrap().record.xp, 50);
    }

    #[tokio::test]
    async fn activity_saturates_at_storage_limit() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels
            .overwrite_xp(G, 1, i64::MAX as u64, Formula::Exponential)
            .await
            .unwrap();

        for (now, weekly) in [(0, 25), (4_000, 50)] {
            let change = levels
                .record_activity(G, 1, 25, now, 60, Formula::Exponential)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(change.record.xp, i64::MAX as u64);
            assert_eq!(change.record.weekly_xp, weekly);
        }
    }

    #[tokio::test]
    async fn level_persists_with_xp() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        let change = levels
            .record_activity(G, 1, 200, 0, 0, Formula::Exponential)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.previous_level, 1);
        assert_eq!(change.record.level, 3);
        assert!(change.leveled_up());

        let stored = levels.get(G, 1).await.unwrap().unwrap();
        assert_eq!(stored.level, 3);
    }

    #[tokio::test]
    async fn overwrite_can_lower_level() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels.overwrite_xp(G, 1, 5_000, Formula::Exponential).await.unwrap();
        let change = levels.overwrite_xp(G, 1, 60, Formula::Exponential).await.unwrap();
        assert_eq!(change.previous_level, 11);
        assert_eq!(change.record.level, 2);
        assert!(!change.leveled_up());
        assert_eq!(change.record.last_activity_at, None);
    }

    #[tokio::test]
    async fn add_xp_accumulates() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels.add_xp(G, 1, 100, Formula::Linear).await.unwrap();
        let change = levels.add_xp(G, 1, 10_000, Formula::Linear).await.unwrap();
        assert_eq!(change.record.xp, 10_100);
        assert_eq!(change.record.level, 2);
        assert!(change.leveled_up());
    }

    #[tokio::test]
    async fn resets_are_idempotent() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels.record_activity(G, 1, 25, 0, 60, Formula::Exponential).await.unwrap();
        levels.record_activity(G + 1, 2, 25, 0, 60, Formula::Exponential).await.unwrap();

        assert_eq!(levels.reset_counter(ResetScope::Weekly, Some(G)).await.unwrap(), 1);
        assert_eq!(levels.reset_counter(ResetScope::Weekly, Some(G)).await.unwrap(), 0);
        assert_eq!(levels.reset_counter(ResetScope::Weekly, None).await.unwrap(), 1);
        assert_eq!(levels.reset_counter(ResetScope::Weekly, None).await.unwrap(), 0);

        let record = levels.get(G, 1).await.unwrap().unwrap();
        assert_eq!(record.weekly_xp, 0);
        assert_eq!(record.monthly_xp, 25);
        assert_eq!(record.xp, 25);
    }

    #[tokio::test]
    async fn reset_markers_round_trip() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        assert_eq!(levels.last_reset(ResetScope::Monthly).await.unwrap(), None);
        levels.mark_reset(ResetScope::Monthly, 10).await.unwrap();
        levels.mark_reset(ResetScope::Monthly, 20).await.unwrap();
        assert_eq!(levels.last_reset(ResetScope::Monthly).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn leaderboard_and_rank() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels.overwrite_xp(G, 1, 300, Formula::Exponential).await.unwrap();
        levels.overwrite_xp(G, 2, 900, Formula::Exponential).await.unwrap();
        levels.overwrite_xp(G, 3, 100, Formula::Exponential).await.unwrap();

        let top = levels.leaderboard(G, Board::Total, 2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec![2, 1]);

        assert_eq!(levels.rank_position(G, 3).await.unwrap(), Some(3));
        assert_eq!(levels.rank_position(G, 99).await.unwrap(), None);

        // Admin overwrites do not feed the weekly board.
        assert!(levels.leaderboard(G, Board::Weekly, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recompute_levels_after_formula_change() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        levels.overwrite_xp(G, 1, 20_000, Formula::Exponential).await.unwrap();

        let changed = levels.recompute_levels(G, Formula::Linear).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(levels.get(G, 1).await.unwrap().unwrap().level, 3);
        assert_eq!(levels.recompute_levels(G, Formula::Linear).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn badges_are_append_only_sets() {
        let db = Database::new(":memory:").await.unwrap();
        let levels = db.levels();
        assert!(levels.add_badge(G, 1, "early", 1).await.unwrap());
        assert!(!levels.add_badge(G, 1, "early", 2).await.unwrap());
        assert!(levels.add_badge(G, 1, "helper", 3).await.unwrap());
        assert_eq!(levels.badges(G, 1).await.unwrap(), vec!["early", "helper"]);
    }
}
