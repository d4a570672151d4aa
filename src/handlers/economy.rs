//! Balance, payment and history commands.

use super::{Bot, Command, Context, HandlerResult};
use crate::db::TransactionKind;
use crate::error::{EngineError, EngineResult};
use crate::ids::mention;
use crate::leveling::limits::LEADERBOARD_LIMIT;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

/// Parse a user-entered amount such as `2.80`, `2,80` or `€2.80`.
///
/// At most two decimal places are accepted.
pub fn parse_amount(text: &str) -> EngineResult<Decimal> {
    let cleaned = text.trim().trim_start_matches(['€', '$']).trim().replace(',', ".");
    let amount =
        Decimal::from_str(&cleaned).map_err(|_| EngineError::InvalidAmount(text.trim().to_string()))?;
    if amount.normalize().scale() > 2 {
        return Err(EngineError::InvalidAmount(text.trim().to_string()));
    }
    Ok(amount.round_dp(2))
}

impl Bot {
    pub(super) async fn economy_command(&self, ctx: &Context, command: Command) -> HandlerResult {
        let ledger = self.db.ledger();
        let fmt = |amount: Decimal| self.economy.format(amount);

        match command {
            Command::Balance { user_id } => {
                let user_id = user_id.unwrap_or(ctx.actor.user_id);
                let balance = ledger.balance(user_id).await?;
                Ok(vec![ctx.reply(format!("{} has {}.", mention(user_id), fmt(balance)))])
            }

            Command::SetBalance {
                user_id,
                amount,
                confirm,
            } => {
                ctx.require_admin()?;
                let amount = parse_amount(&amount)?;
                if amount < Decimal::ZERO && !confirm {
                    return Err(EngineError::NegativeBalanceNeedsConfirmation(amount));
                }
                let record = ledger
                    .update_balance(
                        user_id,
                        amount,
                        Some(ctx.actor.user_id),
                        TransactionKind::AdminSet,
                        None,
                    )
                    .await?;
                info!(user = user_id, admin = ctx.actor.user_id, balance = %record.balance_after, "Balance set");
                Ok(vec![ctx.reply(format!(
                    "Balance of {} set to {}.",
                    mention(user_id),
                    fmt(record.balance_after)
                ))])
            }

            Command::Pay { user_id, amount } => {
                let amount = parse_amount(&amount)?;
                if amount <= Decimal::ZERO {
                    return Err(EngineError::InvalidAmount(amount.to_string()));
                }
                if user_id == ctx.actor.user_id {
                    return Err(EngineError::SelfTransfer);
                }
                let Some((debit, _)) = ledger.transfer(ctx.actor.user_id, user_id, amount, None).await? else {
                    let balance = ledger.balance(ctx.actor.user_id).await?;
                    return Err(EngineError::InsufficientFunds {
                        balance,
                        needed: amount,
                    });
                };
                info!(from = ctx.actor.user_id, to = user_id, amount = %amount, "Payment sent");
                Ok(vec![ctx.reply(format!(
                    "Sent {} to {}. Your balance is now {}.",
                    fmt(amount),
                    mention(user_id),
                    fmt(debit.balance_after)
                ))])
            }

            Command::Transactions { user_id, limit } => {
                let user_id = user_id.unwrap_or(ctx.actor.user_id);
                if user_id != ctx.actor.user_id {
                    ctx.require_admin()?;
                }
                if !LEADERBOARD_LIMIT.contains(&limit) {
                    return Err(EngineError::LimitOutOfRange(limit));
                }
                let rows = ledger.transactions(user_id, limit).await?;
                if rows.is_empty() {
                    return Ok(vec![ctx.reply(format!("{} has no transactions.", mention(user_id)))]);
                }
                let lines: Vec<String> = rows
                    .iter()
                    .map(|t| {
                        let when = chrono::DateTime::from_timestamp(t.created_at, 0)
                            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default();
                        format!(
                            "{} {} {} (balance {})",
                            when,
                            t.kind,
                            fmt(t.amount),
                            fmt(t.balance_after)
                        )
                    })
                    .collect();
                Ok(vec![ctx.reply(format!(
                    "Transactions for {}:\n{}",
                    mention(user_id),
                    lines.join("\n")
                ))])
            }

            other => {
                tracing::debug!(command = ?other, "Not an economy command");
                Ok(Vec::new())
            }
        }
    }
}
