//! Inbound event dispatch.
//!
//! [`Bot`] owns the engines and the effect applier. Each event is routed to
//! a per-feature handler which returns effects; engine errors are turned
//! into a reply to the acting member (interactive events) or a log line
//! (passive events such as messages and bumps).

mod bump;
mod economy;
mod event;
mod leveling;
mod review;

pub use event::{ButtonAction, Command, Event};

use crate::bump::BumpTracker;
use crate::config::{Config, EconomyConfig};
use crate::db::Database;
use crate::effect::{Effect, EffectApplier};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::ids::{Actor, ChannelId, GuildId};
use crate::leveling::LevelingEngine;
use crate::review::ReviewEngine;
use crate::telemetry::{EventTimer, spans};
use std::sync::Arc;
use tracing::{Instrument, debug, error};

/// Result of a handler: effects to apply, or the reason nothing happened.
pub type HandlerResult = EngineResult<Vec<Effect>>;

/// Where an interactive event came from.
#[derive(Debug, Clone)]
pub struct Context {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub actor: Actor,
}

impl Context {
    /// Answer the acting member in the originating channel.
    pub fn reply(&self, text: impl Into<String>) -> Effect {
        Effect::Reply {
            channel_id: self.channel_id,
            user_id: self.actor.user_id,
            text: text.into(),
        }
    }

    fn require_admin(&self) -> EngineResult<()> {
        if self.actor.is_admin {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied)
        }
    }
}

/// Event dispatcher.
pub struct Bot {
    db: Database,
    leveling: Arc<LevelingEngine>,
    review: ReviewEngine,
    bumps: BumpTracker,
    economy: EconomyConfig,
    applier: Arc<EffectApplier>,
}

impl Bot {
    pub fn new(
        db: Database,
        config: &Config,
        leveling: Arc<LevelingEngine>,
        applier: Arc<EffectApplier>,
    ) -> Self {
        Self {
            review: ReviewEngine::new(db.clone(), config.review.clone(), config.economy.clone()),
            bumps: BumpTracker::new(db.clone(), config.bump.clone(), config.economy.clone()),
            economy: config.economy.clone(),
            db,
            leveling,
            applier,
        }
    }

    #[cfg(test)]
    pub fn review(&self) -> &ReviewEngine {
        &self.review
    }

    /// Handle one event and apply its effects.
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();
        let _timer = EventTimer::new(kind);
        let span = spans::event(kind, event.guild_id(), event.user_id());

        async {
            let effects = self.route(event).await;
            self.applier.apply(effects).await;
        }
        .instrument(span)
        .await
    }

    async fn route(&self, event: Event) -> Vec<Effect> {
        match event {
            Event::MessageCreated {
                guild_id,
                channel_id,
                user_id,
                roles,
                bot,
                timestamp,
            } => {
                if bot {
                    return Vec::new();
                }
                let now = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
                let result = self
                    .on_message(guild_id, channel_id, user_id, roles, now)
                    .await;
                self.finish(None, result)
            }
            Event::BumpSucceeded {
                guild_id,
                channel_id,
                user_id,
                timestamp,
            } => {
                let now = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
                let result = self.on_bump(guild_id, channel_id, user_id, now).await;
                self.finish(None, result)
            }
            Event::Button {
                guild_id,
                channel_id,
                actor,
                action,
            } => {
                let ctx = Context {
                    guild_id,
                    channel_id,
                    actor,
                };
                let result = self.on_button(&ctx, action).await;
                self.finish(Some(&ctx), result)
            }
            Event::SettlementSubmitted {
                guild_id,
                channel_id,
                actor,
                ticket_id,
                amount,
            } => {
                let ctx = Context {
                    guild_id,
                    channel_id,
                    actor,
                };
                let result = self.on_settlement(&ctx, ticket_id, &amount).await;
                self.finish(Some(&ctx), result)
            }
            Event::Command {
                guild_id,
                channel_id,
                actor,
                command,
            } => {
                let ctx = Context {
                    guild_id,
                    channel_id,
                    actor,
                };
                let result = self.on_command(&ctx, command).await;
                self.finish(Some(&ctx), result)
            }
        }
    }

    async fn on_command(&self, ctx: &Context, command: Command) -> HandlerResult {
        match command {
            Command::StartReview { .. }
            | Command::CloseReview { .. }
            | Command::ResetReview
            | Command::ReviewStatus => self.review_command(ctx, command).await,

            Command::Balance { .. }
            | Command::SetBalance { .. }
            | Command::Pay { .. }
            | Command::Transactions { .. } => self.economy_command(ctx, command).await,

            Command::BumpLeaderboard { limit } => self.bump_leaderboard(ctx, limit).await,

            other => self.leveling_command(ctx, other).await,
        }
    }

    /// Turn a handler result into the effects to apply.
    fn finish(&self, ctx: Option<&Context>, result: HandlerResult) -> Vec<Effect> {
        let err = match result {
            Ok(effects) => return effects,
            Err(err) => err,
        };

        crate::metrics::record_engine_error(kind_label(err.kind()), err.error_code());
        match err.kind() {
            ErrorKind::Persistence => error!(error = %err, "Event failed"),
            _ => debug!(error = %err, code = err.error_code(), "Event rejected"),
        }

        match ctx {
            Some(ctx) => vec![ctx.reply(err.user_message())],
            None => Vec::new(),
        }
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "validation",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Persistence => "persistence",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::platform::testing::RecordingPlatform;

    pub struct Harness {
        pub db: Database,
        pub platform: Arc<RecordingPlatform>,
        pub applier: Arc<EffectApplier>,
        pub bot: Bot,
    }

    pub const GUILD: GuildId = 1;
    pub const STAFF_ROLE: u64 = 77;

    pub async fn harness() -> Harness {
        let db = Database::new(":memory:").await.unwrap();
        let config: Config = toml::from_str(
            r#"
[discord]
token = "test"

[review]
staff_role_ids = [77]
"#,
        )
        .unwrap();

        let platform = Arc::new(RecordingPlatform::default());
        let applier = Arc::new(EffectApplier::new(platform.clone()));
        let leveling = Arc::new(LevelingEngine::new(db.clone(), config.leveling.clone()));
        let bot = Bot::new(db.clone(), &config, leveling, applier.clone());
        Harness {
            db,
            platform,
            applier,
            bot,
        }
    }

    pub fn admin() -> Actor {
        Actor {
            user_id: 900,
            roles: vec![],
            is_admin: true,
        }
    }

    pub fn staff(user_id: u64) -> Actor {
        Actor {
            user_id,
            roles: vec![STAFF_ROLE],
            is_admin: false,
        }
    }

    pub fn member(user_id: u64) -> Actor {
        Actor {
            user_id,
            ..Actor::default()
        }
    }

    pub fn command(actor: Actor, command: Command) -> Event {
        Event::Command {
            guild_id: GUILD,
            channel_id: 100,
            actor,
            command,
        }
    }

    pub fn button(actor: Actor, channel_id: ChannelId, action: ButtonAction) -> Event {
        Event::Button {
            guild_id: GUILD,
            channel_id,
            actor,
            action,
        }
    }
}
