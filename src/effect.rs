//! Outbound effects and their application.
//!
//! Engines produce effects; the applier turns them into platform calls.
//! Effects are applied after the engine has committed its state, and a
//! failed effect is logged and counted but never undoes that state.

use crate::ids::{ChannelId, GuildId, RoleId, UserId, mention};
use crate::platform::{Platform, PlatformError};
use crate::scheduler::{Scheduler, TaskKey};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Unified effect type returned by engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Answer the acting user in the channel the event came from.
    Reply {
        channel_id: ChannelId,
        user_id: UserId,
        text: String,
    },

    /// Post a message to a channel (level-ups, ticket updates, reminders).
    Notify { channel_id: ChannelId, text: String },

    GrantRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },

    RevokeRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },

    DeleteChannel { channel_id: ChannelId },

    /// Apply `effect` after `after`, replacing anything pending under `key`.
    Delayed {
        key: TaskKey,
        after: Duration,
        effect: Box<Effect>,
    },
}

impl Effect {
    fn role_guild(&self) -> Option<GuildId> {
        match self {
            Self::GrantRole { guild_id, .. } | Self::RevokeRole { guild_id, .. } => Some(*guild_id),
            _ => None,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Reply { .. } => "reply",
            Self::Notify { .. } => "notify",
            Self::GrantRole { .. } => "grant_role",
            Self::RevokeRole { .. } => "revoke_role",
            Self::DeleteChannel { .. } => "delete_channel",
            Self::Delayed { .. } => "delayed",
        }
    }
}

/// Applies effects against a [`Platform`].
pub struct EffectApplier {
    platform: Arc<dyn Platform>,
    scheduler: Scheduler,
    /// Per-guild locks serialising role batches.
    role_locks: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl EffectApplier {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            scheduler: Scheduler::new(),
            role_locks: DashMap::new(),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Apply effects in order.
    ///
    /// Consecutive role changes for one guild run as a batch under that
    /// guild's role lock, so two level-ups cannot interleave their grants
    /// and revokes.
    pub async fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        let mut effects = effects.into_iter().peekable();

        while let Some(effect) = effects.next() {
            if let Some(guild_id) = effect.role_guild() {
                let lock = self.role_lock(guild_id);
                let _guard = lock.lock().await;

                self.apply_now(effect).await;
                while let Some(next) = effects.next_if(|next| next.role_guild() == Some(guild_id)) {
                    self.apply_now(next).await;
                }
                continue;
            }

            if let Effect::Delayed { key, after, effect } = effect {
                let applier = Arc::clone(self);
                self.scheduler.schedule(key, after, async move {
                    applier.apply_now(*effect).await;
                });
                continue;
            }

            // An immediate delete supersedes a pending teardown of the same channel.
            if let Effect::DeleteChannel { channel_id } = &effect
                && self.scheduler.cancel(&TaskKey::ChannelTeardown(*channel_id))
            {
                debug!(channel = *channel_id, "Pending teardown cancelled");
            }

            self.apply_now(effect).await;
        }
    }

    fn role_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.role_locks
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply one immediate effect. Failures are logged and counted.
    async fn apply_now(&self, effect: Effect) {
        let action = effect.action();
        let result: Result<(), PlatformError> = match &effect {
            Effect::Reply {
                channel_id,
                user_id,
                text,
            } => {
                let text = format!("{} {}", mention(*user_id), text);
                self.platform.send_message(*channel_id, &text).await
            }
            Effect::Notify { channel_id, text } => {
                self.platform.send_message(*channel_id, text).await
            }
            Effect::GrantRole {
                guild_id,
                user_id,
                role_id,
            } => self.platform.add_role(*guild_id, *user_id, *role_id).await,
            Effect::RevokeRole {
                guild_id,
                user_id,
                role_id,
            } => {
                self.platform
                    .remove_role(*guild_id, *user_id, *role_id)
                    .await
            }
            Effect::DeleteChannel { channel_id } => {
                self.platform.delete_channel(*channel_id).await
            }
            Effect::Delayed { key, .. } => {
                warn!(key = ?key, "Nested delayed effect dropped");
                Ok(())
            }
        };

        match result {
            Ok(()) => debug!(action, "Effect applied"),
            Err(e) => {
                warn!(action, effect = ?effect, error = %e, "Effect failed");
                crate::metrics::record_platform_failure(action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{Call, RecordingPlatform};

    fn applier() -> (Arc<RecordingPlatform>, Arc<EffectApplier>) {
        let platform = Arc::new(RecordingPlatform::default());
        let applier = Arc::new(EffectApplier::new(platform.clone()));
        (platform, applier)
    }

    #[tokio::test]
    async fn effects_apply_in_order() {
        let (platform, applier) = applier();
        applier
            .apply(vec![
                Effect::Notify {
                    channel_id: 1,
                    text: "hello".into(),
                },
                Effect::GrantRole {
                    guild_id: 5,
                    user_id: 6,
                    role_id: 7,
                },
                Effect::RevokeRole {
                    guild_id: 5,
                    user_id: 6,
                    role_id: 8,
                },
                Effect::Reply {
                    channel_id: 2,
                    user_id: 6,
                    text: "done".into(),
                },
            ])
            .await;

        assert_eq!(
            platform.calls(),
            vec![
                Call::Send(1, "hello".into()),
                Call::AddRole(5, 6, 7),
                Call::RemoveRole(5, 6, 8),
                Call::Send(2, "<@6> done".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_effects() {
        let (platform, applier) = applier();
        platform.fail_roles(true);
        applier
            .apply(vec![
                Effect::GrantRole {
                    guild_id: 5,
                    user_id: 6,
                    role_id: 7,
                },
                Effect::Notify {
                    channel_id: 1,
                    text: "after".into(),
                },
            ])
            .await;

        assert_eq!(platform.messages(), vec![(1, "after".to_string())]);
    }

    #[tokio::test]
    async fn delayed_effect_is_scheduled() {
        let (platform, applier) = applier();
        applier
            .apply(vec![Effect::Delayed {
                key: TaskKey::ChannelTeardown(44),
                after: Duration::from_millis(10),
                effect: Box::new(Effect::DeleteChannel { channel_id: 44 }),
            }])
            .await;

        assert!(platform.calls().is_empty());
        assert!(applier.scheduler().is_pending(&TaskKey::ChannelTeardown(44)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.calls(), vec![Call::DeleteChannel(44)]);
    }

    #[tokio::test]
    async fn immediate_delete_cancels_pending_teardown() {
        let (platform, applier) = applier();
        applier
            .apply(vec![Effect::Delayed {
                key: TaskKey::ChannelTeardown(44),
                after: Duration::from_millis(50),
                effect: Box::new(Effect::DeleteChannel { channel_id: 44 }),
            }])
            .await;
        applier
            .apply(vec![Effect::DeleteChannel { channel_id: 44 }])
            .await;
        assert!(!applier.scheduler().is_pending(&TaskKey::ChannelTeardown(44)));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(platform.calls(), vec![Call::DeleteChannel(44)]);
    }
}
