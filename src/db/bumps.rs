//! Bump count repository.

use super::DbError;
use super::ledger::{Transaction, TransactionKind, write_delta};
use crate::ids::{GuildId, UserId, from_db, to_db};
use sqlx::SqlitePool;

/// Repository for per-user bump counts.
pub struct BumpRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BumpRepository<'a> {
    /// Create a new bump repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Count one bump and return the user's new total.
    ///
    /// A positive `reward_cents` is credited to the bumper in the same
    /// transaction, so the count and the reward land together or not at all.
    pub async fn record(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        now: i64,
        reward_cents: i64,
    ) -> Result<(u64, Option<Transaction>), DbError> {
        let mut tx = self.pool.begin().await?;

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO bumps (guild_id, user_id, count, last_bump_at) VALUES (?, ?, 1, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                count = bumps.count + 1,
                last_bump_at = excluded.last_bump_at
            RETURNING count
            "#,
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let reward = if reward_cents > 0 {
            let memo = format!("bump in guild {}", guild_id);
            let credited = write_delta(
                &mut tx,
                user_id,
                reward_cents,
                None,
                TransactionKind::BumpReward,
                Some(&memo),
                now,
            )
            .await?;
            Some(credited)
        } else {
            None
        };

        tx.commit().await?;
        Ok((count.max(0) as u64, reward))
    }

    /// Top bumpers in a guild.
    pub async fn top(&self, guild_id: GuildId, limit: u32) -> Result<Vec<(UserId, u64)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT user_id, count FROM bumps
            WHERE guild_id = ?
            ORDER BY count DESC, last_bump_at ASC
            LIMIT ?
            "#,
        )
        .bind(to_db(guild_id))
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user, count)| (from_db(user), count.max(0) as u64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::ledger::from_cents;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn counts_accumulate_and_rank() {
        let db = Database::new(":memory:").await.unwrap();
        let bumps = db.bumps();

        assert_eq!(bumps.record(1, 10, 100, 0).await.unwrap().0, 1);
        assert_eq!(bumps.record(1, 10, 200, 0).await.unwrap().0, 2);
        assert_eq!(bumps.record(1, 11, 150, 0).await.unwrap().0, 1);
        assert_eq!(bumps.record(1, 12, 120, 0).await.unwrap().0, 1);

        let top = bumps.top(1, 2).await.unwrap();
        assert_eq!(top, vec![(10, 2), (12, 1)]);
    }

    #[tokio::test]
    async fn reward_and_count_commit_together() {
        let db = Database::new(":memory:").await.unwrap();
        let (count, credited) = db.bumps().record(1, 10, 100, 25).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(credited.unwrap().amount, Decimal::new(25, 2));

        // A balance at the storage limit cannot take the reward; the bump
        // must not be counted either.
        db.ledger()
            .update_balance(10, from_cents(i64::MAX), None, TransactionKind::AdminSet, None)
            .await
            .unwrap();
        assert!(db.bumps().record(1, 10, 200, 25).await.is_err());
        assert_eq!(db.bumps().top(1, 10).await.unwrap(), vec![(10, 1)]);
        assert_eq!(db.ledger().balance(10).await.unwrap(), from_cents(i64::MAX));
    }
}
