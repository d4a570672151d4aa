//! Unified error handling for guildkeeper.
//!
//! Engine operations return [`EngineError`] for every outcome that is not a
//! success. Errors are grouped into the kinds reported to users and metrics:
//! validation problems (nothing changed), concurrency conflicts (a distinct
//! user-facing condition) and persistence failures (the operation failed as
//! a whole). Outbound platform failures never appear here; they are logged
//! where the effect is applied.

use crate::db::DbError;
use crate::ids::{TicketId, UserId};
use crate::leveling::Formula;
use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Persistence,
}

/// Errors produced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    #[error("slot count {0} out of range (1-50)")]
    SlotCountOutOfRange(u32),

    #[error("bonus slot count {0} out of range (0-100)")]
    BonusSlotsOutOfRange(u32),

    #[error("level {0} out of range (1-200)")]
    LevelOutOfRange(u32),

    #[error("level {level} cannot be reached with the {formula} formula")]
    LevelUnreachable { level: u32, formula: Formula },

    #[error("xp value out of range: {0}")]
    XpOutOfRange(String),

    #[error("{field} out of range: {value}")]
    SettingOutOfRange { field: &'static str, value: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("settlement {amount} outside 0-{max}")]
    SettlementOutOfRange { amount: Decimal, max: Decimal },

    #[error("leaderboard limit {0} out of range (1-25)")]
    LimitOutOfRange(u32),

    #[error("invalid badge name")]
    InvalidBadge,

    #[error("permission denied")]
    PermissionDenied,

    #[error("no review session is active")]
    NoActiveSession,

    #[error("no such ticket: {0}")]
    TicketNotFound(TicketId),

    #[error("user {0} has no open review ticket")]
    NoActiveTicket(UserId),

    #[error("confirmation expired")]
    ConfirmationExpired,

    #[error("cannot transfer to yourself")]
    SelfTransfer,

    #[error("balance would become negative ({0}); confirmation required")]
    NegativeBalanceNeedsConfirmation(Decimal),

    // ------------------------------------------------------------------
    // Concurrency conflicts
    // ------------------------------------------------------------------
    #[error("a review session is already active")]
    SessionAlreadyActive,

    #[error("user already holds an active review")]
    AlreadyActive,

    #[error("no review slots remain")]
    PoolExhausted,

    #[error("ticket already claimed by {0}")]
    AlreadyClaimed(UserId),

    #[error("ticket is closed")]
    AlreadyClosed,

    #[error("price is already at its minimum")]
    AtMinimum,

    #[error("no bonus reviews remain in this session")]
    BonusExhausted,

    #[error("insufficient funds: balance {balance}, needed {needed}")]
    InsufficientFunds { balance: Decimal, needed: Decimal },

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl EngineError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionAlreadyActive
            | Self::AlreadyActive
            | Self::PoolExhausted
            | Self::AlreadyClaimed(_)
            | Self::AlreadyClosed
            | Self::AtMinimum
            | Self::BonusExhausted
            | Self::InsufficientFunds { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Persistence,
            _ => ErrorKind::Validation,
        }
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SlotCountOutOfRange(_) => "slot_count_out_of_range",
            Self::BonusSlotsOutOfRange(_) => "bonus_slots_out_of_range",
            Self::LevelOutOfRange(_) => "level_out_of_range",
            Self::LevelUnreachable { .. } => "level_unreachable",
            Self::XpOutOfRange(_) => "xp_out_of_range",
            Self::SettingOutOfRange { .. } => "setting_out_of_range",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::SettlementOutOfRange { .. } => "settlement_out_of_range",
            Self::LimitOutOfRange(_) => "limit_out_of_range",
            Self::InvalidBadge => "invalid_badge",
            Self::PermissionDenied => "permission_denied",
            Self::NoActiveSession => "no_active_session",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::NoActiveTicket(_) => "no_active_ticket",
            Self::ConfirmationExpired => "confirmation_expired",
            Self::SelfTransfer => "self_transfer",
            Self::NegativeBalanceNeedsConfirmation(_) => "negative_balance",
            Self::SessionAlreadyActive => "session_already_active",
            Self::AlreadyActive => "already_active",
            Self::PoolExhausted => "pool_exhausted",
            Self::AlreadyClaimed(_) => "already_claimed",
            Self::AlreadyClosed => "already_closed",
            Self::AtMinimum => "at_minimum",
            Self::BonusExhausted => "bonus_exhausted",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Storage(_) => "storage",
        }
    }

    /// Text shown to the acting user.
    ///
    /// Storage failures are not described in detail; they are logged instead.
    pub fn user_message(&self) -> String {
        match self {
            Self::Storage(_) => "Something went wrong while saving. Nothing was changed, please try again.".to_string(),
            Self::PermissionDenied => "You are not allowed to do that.".to_string(),
            Self::PoolExhausted => "All review slots for this session are taken.".to_string(),
            Self::AlreadyActive => "You already have an open review.".to_string(),
            Self::AlreadyClaimed(staff) => {
                format!("This ticket was already claimed by {}.", crate::ids::mention(*staff))
            }
            Self::AtMinimum => "The price is already at its starting value.".to_string(),
            Self::ConfirmationExpired => {
                "The confirmation window expired. Press close again to retry.".to_string()
            }
            other => {
                let mut text = other.to_string();
                if let Some(first) = text.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                text.push('.');
                text
            }
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_classified() {
        assert_eq!(EngineError::PoolExhausted.kind(), ErrorKind::Conflict);
        assert_eq!(EngineError::AlreadyClaimed(1).kind(), ErrorKind::Conflict);
        assert_eq!(EngineError::AtMinimum.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn validation_is_default_kind() {
        assert_eq!(EngineError::SlotCountOutOfRange(0).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::LevelOutOfRange(201).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::ConfirmationExpired.kind(), ErrorKind::Validation);
    }

    #[test]
    fn storage_is_persistence() {
        let err = EngineError::from(DbError::Internal("boom".into()));
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(!err.user_message().contains("boom"));
    }

    #[test]
    fn user_message_is_capitalized_sentence() {
        let msg = EngineError::SlotCountOutOfRange(51).user_message();
        assert_eq!(msg, "Slot count 51 out of range (1-50).");
    }
}
