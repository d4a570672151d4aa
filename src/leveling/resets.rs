//! Scheduled weekly and monthly counter resets.
//!
//! A background task checks periodically whether a reset window has elapsed
//! since the last recorded global reset. Reset times live in the database,
//! so a restart neither skips nor repeats a window.

use super::LevelingEngine;
use crate::config::LevelingConfig;
use crate::db::{Database, ResetScope};
use crate::error::EngineResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

const DAY_SECS: i64 = 86_400;

/// Spawn the counter reset background task.
pub fn spawn_reset_task(
    engine: Arc<LevelingEngine>,
    db: Database,
    config: LevelingConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.reset_check_secs.max(1)));

        loop {
            interval.tick().await;
            let now = chrono::Utc::now().timestamp();
            let span = crate::telemetry::spans::job("counter_reset");
            if let Err(e) = run_due_resets(&engine, &db, &config, now)
                .instrument(span)
                .await
            {
                error!(error = %e, "Counter reset failed");
            }
        }
    })
}

/// Run every reset whose window has elapsed at `now`. Returns the scopes reset.
pub async fn run_due_resets(
    engine: &LevelingEngine,
    db: &Database,
    config: &LevelingConfig,
    now: i64,
) -> EngineResult<Vec<ResetScope>> {
    let windows = [
        (ResetScope::Weekly, config.weekly_reset_days),
        (ResetScope::Monthly, config.monthly_reset_days),
    ];

    let mut ran = Vec::new();
    for (scope, days) in windows {
        let period = i64::from(days.max(1)) * DAY_SECS;
        let levels = db.levels();

        match levels.last_reset(scope).await? {
            // First start: begin the window now rather than wiping counters.
            None => levels.mark_reset(scope, now).await?,
            Some(last) if now - last >= period => {
                engine.reset_counters(scope, None).await?;
                levels.mark_reset(scope, now).await?;
                info!(scope = scope.as_str(), "Scheduled reset complete");
                ran.push(scope);
            }
            Some(_) => {}
        }
    }
    Ok(ran)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leveling::Formula;

    #[tokio::test]
    async fn resets_follow_persisted_windows() {
        let db = Database::new(":memory:").await.unwrap();
        let config = LevelingConfig::default();
        let engine = LevelingEngine::new(db.clone(), config.clone());

        db.levels()
            .record_activity(1, 1, 25, 0, 60, Formula::Exponential)
            .await
            .unwrap();

        // First run only starts the windows.
        assert!(run_due_resets(&engine, &db, &config, 0).await.unwrap().is_empty());
        assert_eq!(db.levels().get(1, 1).await.unwrap().unwrap().weekly_xp, 25);

        let week = 7 * DAY_SECS;
        assert!(run_due_resets(&engine, &db, &config, week - 1).await.unwrap().is_empty());
        assert_eq!(
            run_due_resets(&engine, &db, &config, week).await.unwrap(),
            vec![ResetScope::Weekly]
        );

        let record = db.levels().get(1, 1).await.unwrap().unwrap();
        assert_eq!(record.weekly_xp, 0);
        assert_eq!(record.monthly_xp, 25);
        assert_eq!(record.xp, 25);

        // Same instant again: nothing is due.
        assert!(run_due_resets(&engine, &db, &config, week).await.unwrap().is_empty());

        let month = 30 * DAY_SECS;
        let ran = run_due_resets(&engine, &db, &config, month).await.unwrap();
        assert_eq!(ran, vec![ResetScope::Weekly, ResetScope::Monthly]);
        assert_eq!(db.levels().get(1, 1).await.unwrap().unwrap().monthly_xp, 0);
    }
}
