//! Server bump tracker.
//!
//! Counts successful bumps per member, optionally pays a reward through the
//! ledger, and keeps one pending reminder per guild.

use crate::config::{BumpConfig, EconomyConfig};
use crate::db::{Database, to_cents};
use crate::effect::Effect;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ChannelId, GuildId, UserId, mention, role_mention};
use crate::scheduler::TaskKey;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::info;

/// Result of one recorded bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumpReceipt {
    pub count: u64,
    pub reward: Option<Decimal>,
}

pub struct BumpTracker {
    db: Database,
    config: BumpConfig,
    economy: EconomyConfig,
}

impl BumpTracker {
    pub fn new(db: Database, config: BumpConfig, economy: EconomyConfig) -> Self {
        Self { db, config, economy }
    }

    /// Record a bump by `user_id` in `channel_id`.
    ///
    /// The returned effects thank the bumper and (re)arm the guild's
    /// reminder; a newer bump replaces an older pending reminder.
    pub async fn record_bump(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        now: i64,
    ) -> EngineResult<(BumpReceipt, Vec<Effect>)> {
        let reward_cents = if self.config.reward > Decimal::ZERO {
            to_cents(self.config.reward)?
        } else {
            0
        };
        let (count, credited) = self
            .db
            .bumps()
            .record(guild_id, user_id, now, reward_cents)
            .await?;
        let reward = credited.map(|transaction| transaction.amount);

        crate::metrics::record_bump();
        info!(guild = guild_id, user = user_id, count, "Bump recorded");

        let mut thanks = format!("Thanks for bumping, {}! That makes {} bumps.", mention(user_id), count);
        if let Some(amount) = reward {
            thanks.push_str(&format!(" {} has been added to your balance.", self.economy.format(amount)));
        }

        let reminder = match self.config.reminder_role_id {
            Some(role_id) => format!("{} The server can be bumped again!", role_mention(role_id)),
            None => "The server can be bumped again!".to_string(),
        };

        let effects = vec![
            Effect::Notify {
                channel_id,
                text: thanks,
            },
            Effect::Delayed {
                key: TaskKey::BumpReminder(guild_id),
                after: Duration::from_secs(self.config.reminder_secs),
                effect: Box::new(Effect::Notify {
                    channel_id,
                    text: reminder,
                }),
            },
        ];

        Ok((BumpReceipt { count, reward }, effects))
    }

    /// Top bumpers, 1..=25 entries.
    pub async fn leaderboard(&self, guild_id: GuildId, limit: u32) -> EngineResult<Vec<(UserId, u64)>> {
        if !(1..=25).contains(&limit) {
            return Err(EngineError::LimitOutOfRange(limit));
        }
        Ok(self.db.bumps().top(guild_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransactionKind;

    async fn tracker(reward: Decimal) -> (Database, BumpTracker) {
        let db = Database::new(":memory:").await.unwrap();
        let config = BumpConfig {
            reward,
            reminder_role_id: Some(33),
            ..BumpConfig::default()
        };
        let tracker = BumpTracker::new(db.clone(), config, EconomyConfig::default());
        (db, tracker)
    }

    #[tokio::test]
    async fn bump_counts_and_schedules_reminder() {
        let (db, tracker) = tracker(Decimal::ZERO).await;
        let (first, _) = tracker.record_bump(1, 5, 10, 100).await.unwrap();
        let (second, effects) = tracker.record_bump(1, 5, 10, 200).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.reward.is_none());
        assert!(db.ledger().transactions(10, 10).await.unwrap().is_empty());

        match &effects[1] {
            Effect::Delayed { key, after, effect } => {
                assert_eq!(*key, TaskKey::BumpReminder(1));
                assert_eq!(*after, Duration::from_secs(7200));
                assert!(matches!(&**effect, Effect::Notify { channel_id: 5, text } if text.starts_with("<@&33>")));
            }
            other => panic!("expected reminder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reward_goes_through_ledger() {
        let (db, tracker) = tracker(Decimal::new(25, 2)).await;
        tracker.record_bump(1, 5, 10, 100).await.unwrap();
        tracker.record_bump(1, 5, 10, 200).await.unwrap();

        assert_eq!(db.ledger().balance(10).await.unwrap(), Decimal::new(50, 2));
        let rows = db.ledger().transactions(10, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|t| t.kind == TransactionKind::BumpReward));
    }

    #[tokio::test]
    async fn failed_reward_does_not_count_bump() {
        let (db, tracker) = tracker(Decimal::new(25, 2)).await;
        tracker.record_bump(1, 5, 10, 100).await.unwrap();
        db.ledger()
            .update_balance(10, Decimal::new(i64::MAX, 2), None, TransactionKind::AdminSet, None)
            .await
            .unwrap();

        assert!(matches!(
            tracker.record_bump(1, 5, 10, 200).await,
            Err(EngineError::Storage(_))
        ));
        assert_eq!(tracker.leaderboard(1, 10).await.unwrap(), vec![(10, 1)]);
    }

    #[tokio::test]
    async fn leaderboard_limits() {
        let (_, tracker) = tracker(Decimal::ZERO).await;
        tracker.record_bump(1, 5, 10, 100).await.unwrap();
        tracker.record_bump(1, 5, 11, 110).await.unwrap();
        tracker.record_bump(1, 5, 11, 120).await.unwrap();

        assert_eq!(tracker.leaderboard(1, 10).await.unwrap(), vec![(11, 2), (10, 1)]);
        assert!(matches!(tracker.leaderboard(1, 0).await, Err(EngineError::LimitOutOfRange(0))));
    }
}
