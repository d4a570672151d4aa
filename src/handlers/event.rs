//! Inbound events as delivered by the gateway bridge.
//!
//! The bridge translates platform gateway traffic (messages, bump bot
//! confirmations, button presses, modal submissions, slash commands) into
//! one JSON object per event.

use crate::db::{Board, ChannelMode, ResetScope};
use crate::ids::{Actor, ChannelId, GuildId, RoleId, TicketId, UserId};
use crate::leveling::Formula;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A member posted a message.
    MessageCreated {
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        /// Author roles, when the bridge had them cached.
        #[serde(default)]
        roles: Option<Vec<RoleId>>,
        #[serde(default)]
        bot: bool,
        /// Epoch seconds; receive time when absent.
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// The bump bot confirmed a successful bump.
    BumpSucceeded {
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        #[serde(default)]
        timestamp: Option<i64>,
    },

    Button {
        guild_id: GuildId,
        channel_id: ChannelId,
        actor: Actor,
        action: ButtonAction,
    },

    /// The settlement form opened by the close button was submitted.
    SettlementSubmitted {
        guild_id: GuildId,
        channel_id: ChannelId,
        actor: Actor,
        ticket_id: TicketId,
        amount: String,
    },

    Command {
        guild_id: GuildId,
        channel_id: ChannelId,
        actor: Actor,
        command: Command,
    },
}

impl Event {
    /// Metric and span label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message",
            Self::BumpSucceeded { .. } => "bump",
            Self::Button { .. } => "button",
            Self::SettlementSubmitted { .. } => "settlement",
            Self::Command { .. } => "command",
        }
    }

    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::MessageCreated { guild_id, .. }
            | Self::BumpSucceeded { guild_id, .. }
            | Self::Button { guild_id, .. }
            | Self::SettlementSubmitted { guild_id, .. }
            | Self::Command { guild_id, .. } => *guild_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Self::MessageCreated { user_id, .. } | Self::BumpSucceeded { user_id, .. } => *user_id,
            Self::Button { actor, .. }
            | Self::SettlementSubmitted { actor, .. }
            | Self::Command { actor, .. } => actor.user_id,
        }
    }
}

/// Buttons on the session panel and on ticket channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ButtonAction {
    RequestSlot,
    Claim { ticket_id: TicketId },
    Increment { ticket_id: TicketId },
    Decrement { ticket_id: TicketId },
    Close { ticket_id: TicketId },
}

/// Slash commands. Amounts arrive as text and are parsed by the handler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    // Review sessions
    StartReview {
        slots: u32,
        #[serde(default)]
        bonus: Option<u32>,
    },
    CloseReview {
        user_id: UserId,
        amount: String,
    },
    ResetReview,
    ReviewStatus,

    // Leveling overrides
    SetXp {
        user_id: UserId,
        xp: u64,
    },
    AddXp {
        user_id: UserId,
        xp: u64,
    },
    SetLevel {
        user_id: UserId,
        level: u32,
    },

    // Leveling configuration
    XpRate {
        value: u32,
    },
    XpCooldown {
        seconds: u32,
    },
    XpMultiplier {
        value: f64,
    },
    XpFormula {
        formula: Formula,
    },
    AnnounceChannel {
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },
    MapRole {
        level: u32,
        role_id: RoleId,
    },
    UnmapRole {
        level: u32,
    },
    XpChannel {
        channel_id: ChannelId,
        /// `None` clears the channel from both sets.
        #[serde(default)]
        mode: Option<ChannelMode>,
    },
    ResetCounters {
        scope: ResetScope,
    },

    // Leveling queries
    Rank {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Leaderboard {
        #[serde(default)]
        board: Board,
        #[serde(default = "default_limit")]
        limit: u32,
    },
    Badge {
        user_id: UserId,
        badge: String,
    },

    // Economy
    Balance {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    SetBalance {
        user_id: UserId,
        amount: String,
        #[serde(default)]
        confirm: bool,
    },
    Pay {
        user_id: UserId,
        amount: String,
    },
    Transactions {
        #[serde(default)]
        user_id: Option<UserId>,
        #[serde(default = "default_limit")]
        limit: u32,
    },

    BumpLeaderboard {
        #[serde(default = "default_limit")]
        limit: u32,
    },
}

fn default_limit() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_event_from_json() {
        let event: Event = serde_json::from_str(
            r#"{"type":"message_created","guild_id":1,"channel_id":2,"user_id":3,"roles":[7]}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), "message");
        assert_eq!(event.guild_id(), 1);
        assert_eq!(event.user_id(), 3);
        let Event::MessageCreated { roles, bot, timestamp, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(roles, Some(vec![7]));
        assert!(!bot);
        assert!(timestamp.is_none());
    }

    #[test]
    fn button_and_command_from_json() {
        let event: Event = serde_json::from_str(
            r#"{"type":"button","guild_id":1,"channel_id":2,
                "actor":{"user_id":5,"roles":[9]},
                "action":{"kind":"claim","ticket_id":12}}"#,
        )
        .unwrap();
        let Event::Button { actor, action, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(actor.roles, vec![9]);
        assert!(!actor.is_admin);
        assert_eq!(action, ButtonAction::Claim { ticket_id: 12 });

        let event: Event = serde_json::from_str(
            r#"{"type":"command","guild_id":1,"channel_id":2,
                "actor":{"user_id":5,"is_admin":true},
                "command":{"name":"leaderboard","board":"weekly"}}"#,
        )
        .unwrap();
        let Event::Command { command, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(
            command,
            Command::Leaderboard {
                board: Board::Weekly,
                limit: 10
            }
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let result: Result<Event, _> = serde_json::from_str(
            r#"{"type":"command","guild_id":1,"channel_id":2,"actor":{"user_id":5},"command":{"name":"nope"}}"#,
        );
        assert!(result.is_err());
    }
}
