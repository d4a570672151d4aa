//! Review session engine.
//!
//! Pools and tickets live in maps owned by the engine. A pool is mutated
//! only while its `DashMap` entry is held, so slot consumption is a single
//! check-and-set. Each ticket sits behind its own async mutex: claims,
//! price changes and closes on one ticket run strictly one at a time, while
//! different tickets proceed independently. When both are needed the
//! ticket lock is taken first, then the pool entry.

use super::pool::SlotPool;
use super::pricing::{PriceSchedule, Tier};
use super::ticket::ReviewTicket;
use crate::config::{EconomyConfig, ReviewConfig};
use crate::db::{Database, TransactionKind, to_cents};
use crate::effect::Effect;
use crate::error::{EngineError, EngineResult};
use crate::ids::{Actor, ChannelId, GuildId, TicketId, UserId, mention};
use crate::scheduler::TaskKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

/// Largest slot count a session may start with.
pub const MAX_SLOTS: u32 = 50;
/// Largest bonus review count a session may start with.
pub const MAX_BONUS_SLOTS: u32 = 100;

/// Snapshot of a guild's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub total: u32,
    pub remaining: u32,
    pub bonus_total: u32,
    pub bonus_remaining: u32,
    pub active_tickets: usize,
}

impl From<&SlotPool> for SessionStatus {
    fn from(pool: &SlotPool) -> Self {
        Self {
            total: pool.total,
            remaining: pool.remaining,
            bonus_total: pool.bonus_total,
            bonus_remaining: pool.bonus_remaining,
            active_tickets: pool.active_users(),
        }
    }
}

/// A price change on a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceChange {
    pub ticket: ReviewTicket,
    pub step: Decimal,
    pub bonus_remaining: u32,
}

/// What staff sees when opening the settlement prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePrompt {
    pub ticket_id: TicketId,
    pub requester_id: UserId,
    pub current_price: Decimal,
    pub max_settlement: Decimal,
    pub expires_in: Duration,
}

/// Outcome of a closed ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub ticket_id: TicketId,
    pub requester_id: UserId,
    pub amount: Decimal,
    pub balance_after: Decimal,
    /// Price displayed at close time. Informational only.
    pub final_price: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct PendingClose {
    staff_id: UserId,
    deadline: Instant,
}

/// Runs review sessions for every guild.
pub struct ReviewEngine {
    db: Database,
    config: ReviewConfig,
    economy: EconomyConfig,
    pools: DashMap<GuildId, SlotPool>,
    tickets: DashMap<TicketId, Arc<Mutex<ReviewTicket>>>,
    by_requester: DashMap<(GuildId, UserId), TicketId>,
    pending_closes: DashMap<TicketId, PendingClose>,
    next_id: AtomicU64,
}

impl ReviewEngine {
    pub fn new(db: Database, config: ReviewConfig, economy: EconomyConfig) -> Self {
        Self {
            db,
            config,
            economy,
            pools: DashMap::new(),
            tickets: DashMap::new(),
            by_requester: DashMap::new(),
            pending_closes: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn require_admin(actor: &Actor) -> EngineResult<()> {
        if actor.is_admin {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied)
        }
    }

    fn require_staff(&self, actor: &Actor) -> EngineResult<()> {
        if actor.is_staff(&self.config.staff_role_ids) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied)
        }
    }

    fn ticket_handle(&self, ticket_id: TicketId) -> EngineResult<Arc<Mutex<ReviewTicket>>> {
        self.tickets
            .get(&ticket_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::TicketNotFound(ticket_id))
    }

    /// Lock a ticket of `guild_id`. Another guild's ticket counts as missing.
    async fn lock_ticket(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
    ) -> EngineResult<OwnedMutexGuard<ReviewTicket>> {
        let ticket = self.ticket_handle(ticket_id)?.lock_owned().await;
        if ticket.guild_id != guild_id {
            return Err(EngineError::TicketNotFound(ticket_id));
        }
        Ok(ticket)
    }

    fn settlement_cents(&self, amount: Decimal) -> EngineResult<i64> {
        let max = self.config.max_settlement;
        if amount < Decimal::ZERO || amount > max {
            return Err(EngineError::SettlementOutOfRange { amount, max });
        }
        Ok(to_cents(amount)?)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Open a session with `slots` reviews and `bonus` extra paid reviews.
    pub fn start_session(
        &self,
        guild_id: GuildId,
        actor: &Actor,
        slots: u32,
        bonus: Option<u32>,
    ) -> EngineResult<SessionStatus> {
        Self::require_admin(actor)?;
        if !(1..=MAX_SLOTS).contains(&slots) {
            return Err(EngineError::SlotCountOutOfRange(slots));
        }
        let bonus = bonus.unwrap_or(self.config.default_bonus_slots);
        if bonus > MAX_BONUS_SLOTS {
            return Err(EngineError::BonusSlotsOutOfRange(bonus));
        }

        match self.pools.entry(guild_id) {
            Entry::Occupied(_) => Err(EngineError::SessionAlreadyActive),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pool = vacant.insert(SlotPool::new(id, slots, bonus));
                info!(guild = guild_id, slots, bonus, admin = actor.user_id, "Review session started");
                Ok(SessionStatus::from(&*pool))
            }
        }
    }

    /// Drop the session and abandon its open tickets without settlement.
    ///
    /// Returns how many tickets were abandoned plus channel teardown effects.
    pub async fn reset_session(
        &self,
        guild_id: GuildId,
        actor: &Actor,
    ) -> EngineResult<(usize, Vec<Effect>)> {
        Self::require_admin(actor)?;
        let (_, pool) = self
            .pools
            .remove(&guild_id)
            .ok_or(EngineError::NoActiveSession)?;

        let handles: Vec<_> = self
            .tickets
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut abandoned = 0;
        let mut effects = Vec::new();
        for (ticket_id, handle) in handles {
            let mut ticket = handle.lock().await;
            if ticket.pool_id != pool.id || ticket.close().is_err() {
                continue;
            }
            self.forget(&ticket);
            abandoned += 1;
            if let Some(channel_id) = ticket.channel_id {
                effects.push(Effect::DeleteChannel { channel_id });
            }
            info!(guild = guild_id, ticket = ticket_id, "Review ticket abandoned");
        }

        crate::metrics::record_tickets_discarded(abandoned);
        info!(guild = guild_id, abandoned, admin = actor.user_id, "Review session reset");
        Ok((abandoned, effects))
    }

    pub fn status(&self, guild_id: GuildId) -> EngineResult<SessionStatus> {
        self.pools
            .get(&guild_id)
            .map(|pool| SessionStatus::from(&*pool))
            .ok_or(EngineError::NoActiveSession)
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Consume a slot for `requester` and open their ticket.
    pub fn request_slot(&self, guild_id: GuildId, requester: &Actor) -> EngineResult<ReviewTicket> {
        let user_id = requester.user_id;
        let pool_id = {
            let mut pool = self
                .pools
                .get_mut(&guild_id)
                .ok_or(EngineError::NoActiveSession)?;
            pool.consume(user_id)?;
            pool.id
        };

        let tier = Tier::resolve(&requester.roles, &self.config);
        let pricing = tier.pricing(&self.config);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ticket = ReviewTicket::new(
            id,
            guild_id,
            pool_id,
            user_id,
            tier,
            pricing.initial,
            PriceSchedule::new(pricing.schedule.clone()),
        );

        self.tickets.insert(id, Arc::new(Mutex::new(ticket.clone())));
        self.by_requester.insert((guild_id, user_id), id);
        crate::metrics::record_ticket_opened();
        info!(guild = guild_id, user = user_id, ticket = id, tier = %tier, "Review ticket opened");
        Ok(ticket)
    }

    /// Attach the ticket's private channel once the platform created it.
    pub async fn bind_channel(&self, ticket_id: TicketId, channel_id: ChannelId) -> EngineResult<()> {
        let handle = self.ticket_handle(ticket_id)?;
        let mut ticket = handle.lock().await;
        ticket.channel_id = Some(channel_id);
        Ok(())
    }

    #[cfg(test)]
    pub async fn ticket(&self, ticket_id: TicketId) -> EngineResult<ReviewTicket> {
        let handle = self.ticket_handle(ticket_id)?;
        let ticket = handle.lock().await;
        Ok(ticket.clone())
    }

    /// Open ticket held by `user_id` in a guild.
    pub fn ticket_for(&self, guild_id: GuildId, user_id: UserId) -> EngineResult<TicketId> {
        self.by_requester
            .get(&(guild_id, user_id))
            .map(|entry| *entry.value())
            .ok_or(EngineError::NoActiveTicket(user_id))
    }

    /// Claim a ticket. Exactly one concurrent claimant succeeds.
    pub async fn claim(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
    ) -> EngineResult<ReviewTicket> {
        self.require_staff(staff)?;
        let mut ticket = self.lock_ticket(guild_id, ticket_id).await?;
        ticket.claim(staff.user_id)?;
        info!(ticket = ticket_id, staff = staff.user_id, "Review ticket claimed");
        Ok(ticket.clone())
    }

    /// Grant one bonus review: take a unit from the session's bonus counter
    /// and apply the next schedule entry.
    pub async fn increment_price(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
    ) -> EngineResult<PriceChange> {
        self.require_staff(staff)?;
        let mut ticket = self.lock_ticket(guild_id, ticket_id).await?;
        ticket.next_increment()?;

        let bonus_remaining = {
            let mut pool = self
                .pools
                .get_mut(&ticket.guild_id)
                .filter(|pool| pool.id == ticket.pool_id)
                .ok_or(EngineError::NoActiveSession)?;
            pool.take_bonus()?;
            pool.bonus_remaining
        };
        let step = ticket.increment()?;

        info!(
            ticket = ticket_id,
            staff = staff.user_id,
            step = %step,
            price = %ticket.current_price(),
            "Review price increased"
        );
        Ok(PriceChange {
            ticket: ticket.clone(),
            step,
            bonus_remaining,
        })
    }

    /// Reverse the most recent increment and return its bonus unit.
    pub async fn decrement_price(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
    ) -> EngineResult<PriceChange> {
        self.require_staff(staff)?;
        let mut ticket = self.lock_ticket(guild_id, ticket_id).await?;
        let step = ticket.decrement()?;

        let bonus_remaining = match self.pools.get_mut(&ticket.guild_id) {
            Some(mut pool) if pool.id == ticket.pool_id => {
                pool.return_bonus();
                pool.bonus_remaining
            }
            _ => 0,
        };

        info!(
            ticket = ticket_id,
            staff = staff.user_id,
            step = %step,
            price = %ticket.current_price(),
            "Review price decreased"
        );
        Ok(PriceChange {
            ticket: ticket.clone(),
            step,
            bonus_remaining,
        })
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Start the close flow: the settlement must follow before the deadline.
    pub async fn begin_close(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
        now: Instant,
    ) -> EngineResult<ClosePrompt> {
        self.require_staff(staff)?;
        let ticket = self.lock_ticket(guild_id, ticket_id).await?;
        if ticket.is_closed() {
            return Err(EngineError::AlreadyClosed);
        }

        let expires_in = Duration::from_secs(self.config.confirm_timeout_secs);
        self.pending_closes.insert(
            ticket_id,
            PendingClose {
                staff_id: staff.user_id,
                deadline: now + expires_in,
            },
        );

        Ok(ClosePrompt {
            ticket_id,
            requester_id: ticket.requester_id,
            current_price: ticket.current_price(),
            max_settlement: self.config.max_settlement,
            expires_in,
        })
    }

    /// Finish the close flow started by the same staff member.
    ///
    /// A missing or expired prompt fails with `ConfirmationExpired` and
    /// leaves everything untouched. An out-of-range amount is rejected
    /// before the prompt is consumed, so staff can correct it.
    pub async fn confirm_close(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
        amount: Decimal,
        now: Instant,
    ) -> EngineResult<(Settlement, Vec<Effect>)> {
        self.require_staff(staff)?;
        let cents = self.settlement_cents(amount)?;
        let mut ticket = self.lock_ticket(guild_id, ticket_id).await?;
        let pending = self
            .pending_closes
            .remove_if(&ticket_id, |_, pending| pending.staff_id == staff.user_id)
            .map(|(_, pending)| pending);

        match pending {
            Some(pending) if now < pending.deadline => {
                self.settle(&mut ticket, staff, amount, cents).await
            }
            _ => Err(EngineError::ConfirmationExpired),
        }
    }

    /// Close a user's open ticket directly (admin command).
    pub async fn close_for_user(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        admin: &Actor,
        amount: Decimal,
    ) -> EngineResult<(Settlement, Vec<Effect>)> {
        Self::require_admin(admin)?;
        let ticket_id = self.ticket_for(guild_id, user_id)?;
        self.close_ticket(guild_id, ticket_id, admin, amount).await
    }

    /// Credit the settlement, release the requester and close the ticket.
    ///
    /// The ledger write happens first; if it fails the ticket stays open.
    /// The slot is not returned to the pool.
    pub async fn close_ticket(
        &self,
        guild_id: GuildId,
        ticket_id: TicketId,
        staff: &Actor,
        amount: Decimal,
    ) -> EngineResult<(Settlement, Vec<Effect>)> {
        self.require_staff(staff)?;
        let cents = self.settlement_cents(amount)?;
        let mut ticket = self.lock_ticket(guild_id, ticket_id).await?;
        self.settle(&mut ticket, staff, amount, cents).await
    }

    /// Settle a locked ticket.
    async fn settle(
        &self,
        ticket: &mut ReviewTicket,
        staff: &Actor,
        amount: Decimal,
        cents: i64,
    ) -> EngineResult<(Settlement, Vec<Effect>)> {
        let ticket_id = ticket.id;
        if ticket.is_closed() {
            return Err(EngineError::AlreadyClosed);
        }

        let memo = format!("review ticket #{}", ticket_id);
        let transaction = self
            .db
            .ledger()
            .adjust_balance(
                ticket.requester_id,
                amount,
                Some(staff.user_id),
                TransactionKind::ReviewPayment,
                Some(&memo),
            )
            .await?;

        ticket.close()?;
        if let Some(mut pool) = self.pools.get_mut(&ticket.guild_id)
            && pool.id == ticket.pool_id
        {
            pool.release(ticket.requester_id);
        }
        self.forget(ticket);
        crate::metrics::record_ticket_closed(cents);

        let settlement = Settlement {
            ticket_id,
            requester_id: ticket.requester_id,
            amount: transaction.amount,
            balance_after: transaction.balance_after,
            final_price: ticket.current_price(),
        };
        info!(
            ticket = ticket_id,
            staff = staff.user_id,
            requester = ticket.requester_id,
            amount = %settlement.amount,
            "Review ticket closed"
        );

        let mut effects = Vec::new();
        if let Some(channel_id) = ticket.channel_id {
            let delay = self.config.teardown_delay_secs;
            effects.push(Effect::Notify {
                channel_id,
                text: format!(
                    "Review closed by {}. {} credited to {}. This channel closes in {} seconds.",
                    mention(staff.user_id),
                    self.economy.format(settlement.amount),
                    mention(ticket.requester_id),
                    delay
                ),
            });
            effects.push(Effect::Delayed {
                key: TaskKey::ChannelTeardown(channel_id),
                after: Duration::from_secs(delay),
                effect: Box::new(Effect::DeleteChannel { channel_id }),
            });
        }

        Ok((settlement, effects))
    }

    fn forget(&self, ticket: &ReviewTicket) {
        self.tickets.remove(&ticket.id);
        self.pending_closes.remove(&ticket.id);
        self.by_requester
            .remove_if(&(ticket.guild_id, ticket.requester_id), |_, id| *id == ticket.id);
    }
}
