//! Review session commands, ticket buttons and the settlement form.

use super::economy::parse_amount;
use super::{Bot, ButtonAction, Command, Context, HandlerResult};
use crate::effect::Effect;
use crate::ids::{TicketId, mention};
use crate::review::{PriceChange, ReviewTicket};
use std::time::Instant;
use tracing::warn;

impl Bot {
    pub(super) async fn review_command(&self, ctx: &Context, command: Command) -> HandlerResult {
        let guild_id = ctx.guild_id;
        match command {
            Command::StartReview { slots, bonus } => {
                let status = self.review.start_session(guild_id, &ctx.actor, slots, bonus)?;
                Ok(vec![ctx.reply(format!(
                    "Review session started: {} slots, {} bonus reviews.",
                    status.total, status.bonus_total
                ))])
            }

            Command::CloseReview { user_id, amount } => {
                let amount = parse_amount(&amount)?;
                let (settlement, mut effects) = self
                    .review
                    .close_for_user(guild_id, user_id, &ctx.actor, amount)
                    .await?;
                effects.insert(
                    0,
                    ctx.reply(format!(
                        "Closed ticket #{} for {}. Paid {}, balance now {}.",
                        settlement.ticket_id,
                        mention(user_id),
                        self.economy.format(settlement.amount),
                        self.economy.format(settlement.balance_after)
                    )),
                );
                Ok(effects)
            }

            Command::ResetReview => {
                let (abandoned, mut effects) = self.review.reset_session(guild_id, &ctx.actor).await?;
                effects.insert(
                    0,
                    ctx.reply(format!(
                        "Review session reset. {} open tickets were discarded.",
                        abandoned
                    )),
                );
                Ok(effects)
            }

            Command::ReviewStatus => {
                let status = self.review.status(guild_id)?;
                Ok(vec![ctx.reply(format!(
                    "{}/{} slots left, {}/{} bonus reviews left, {} open tickets.",
                    status.remaining,
                    status.total,
                    status.bonus_remaining,
                    status.bonus_total,
                    status.active_tickets
                ))])
            }

            other => {
                tracing::debug!(command = ?other, "Not a review command");
                Ok(Vec::new())
            }
        }
    }

    pub(super) async fn on_button(&self, ctx: &Context, action: ButtonAction) -> HandlerResult {
        match action {
            ButtonAction::RequestSlot => self.request_slot(ctx).await,

            ButtonAction::Claim { ticket_id } => {
                let ticket = self.review.claim(ctx.guild_id, ticket_id, &ctx.actor).await?;
                Ok(vec![ticket_notice(
                    ctx,
                    &ticket,
                    format!("{} claimed this review.", mention(ctx.actor.user_id)),
                )])
            }

            ButtonAction::Increment { ticket_id } => {
                let change = self
                    .review
                    .increment_price(ctx.guild_id, ticket_id, &ctx.actor)
                    .await?;
                Ok(vec![self.price_notice(ctx, &change, '+')])
            }

            ButtonAction::Decrement { ticket_id } => {
                let change = self
                    .review
                    .decrement_price(ctx.guild_id, ticket_id, &ctx.actor)
                    .await?;
                Ok(vec![self.price_notice(ctx, &change, '-')])
            }

            ButtonAction::Close { ticket_id } => {
                let prompt = self
                    .review
                    .begin_close(ctx.guild_id, ticket_id, &ctx.actor, Instant::now())
                    .await?;
                Ok(vec![ctx.reply(format!(
                    "Enter the payment for {} on ticket #{} (current price {}, at most {}). \
                     You have {} seconds.",
                    mention(prompt.requester_id),
                    prompt.ticket_id,
                    self.economy.format(prompt.current_price),
                    self.economy.format(prompt.max_settlement),
                    prompt.expires_in.as_secs()
                ))])
            }
        }
    }

    pub(super) async fn on_settlement(
        &self,
        ctx: &Context,
        ticket_id: TicketId,
        amount: &str,
    ) -> HandlerResult {
        let amount = parse_amount(amount)?;
        let (settlement, mut effects) = self
            .review
            .confirm_close(ctx.guild_id, ticket_id, &ctx.actor, amount, Instant::now())
            .await?;
        effects.insert(
            0,
            ctx.reply(format!(
                "Paid {} to {}. Their balance is now {}.",
                self.economy.format(settlement.amount),
                mention(settlement.requester_id),
                self.economy.format(settlement.balance_after)
            )),
        );
        Ok(effects)
    }

    /// Consume a slot, then ask the platform for the ticket channel.
    ///
    /// The channel call happens inline because its id must be bound to the
    /// ticket. If it fails the ticket stays open without a channel.
    async fn request_slot(&self, ctx: &Context) -> HandlerResult {
        let ticket = self.review.request_slot(ctx.guild_id, &ctx.actor)?;
        let name = format!("review-{}", ticket.id);

        let channel_id = match self
            .applier
            .platform()
            .create_channel(ctx.guild_id, &name, ctx.actor.user_id)
            .await
        {
            Ok(channel_id) => channel_id,
            Err(e) => {
                warn!(ticket = ticket.id, error = %e, "Ticket channel creation failed");
                crate::metrics::record_platform_failure("create_channel");
                return Ok(vec![ctx.reply(format!(
                    "Your review slot is reserved (ticket #{}), but the ticket channel could not \
                     be created. Please contact staff.",
                    ticket.id
                ))]);
            }
        };
        self.review.bind_channel(ticket.id, channel_id).await?;

        Ok(vec![
            ctx.reply(format!("Your review ticket is open in <#{}>.", channel_id)),
            Effect::Notify {
                channel_id,
                text: format!(
                    "Review ticket #{} for {} ({} tier). Current price: {}. Staff can claim it below.",
                    ticket.id,
                    mention(ticket.requester_id),
                    ticket.tier,
                    self.economy.format(ticket.current_price())
                ),
            },
        ])
    }

    fn price_notice(&self, ctx: &Context, change: &PriceChange, sign: char) -> Effect {
        ticket_notice(
            ctx,
            &change.ticket,
            format!(
                "Price is now {} ({}{}). Bonus reviews left: {}.",
                self.economy.format(change.ticket.current_price()),
                sign,
                self.economy.format(change.step),
                change.bonus_remaining
            ),
        )
    }
}

/// Post in the ticket's channel, or the originating one if it has none.
fn ticket_notice(ctx: &Context, ticket: &ReviewTicket, text: String) -> Effect {
    Effect::Notify {
        channel_id: ticket.channel_id.unwrap_or(ctx.channel_id),
        text,
    }
}
