//! Ledger repository: user balances and their audit trail.
//!
//! Every balance change goes through [`write_delta`], which updates the
//! balance and appends exactly one `transactions` row in the same database
//! transaction. A balance is therefore always the sum of its rows' deltas.

use super::DbError;
use crate::ids::{UserId, from_db, to_db};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Convert an amount to integer cents, rounding to two decimals.
pub fn to_cents(amount: Decimal) -> Result<i64, DbError> {
    amount
        .round_dp(2)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|c| c.to_i64())
        .ok_or_else(|| DbError::AmountOverflow(amount.to_string()))
}

/// Convert stored cents to a two-decimal amount.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Settlement credited when a review ticket closes.
    ReviewPayment,
    /// Admin overwrote the balance.
    AdminSet,
    /// Incoming side of a user-to-user payment.
    TransferIn,
    /// Outgoing side of a user-to-user payment.
    TransferOut,
    /// Reward for bumping the server.
    BumpReward,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReviewPayment => "review_payment",
            Self::AdminSet => "admin_set",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::BumpReward => "bump_reward",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review_payment" => Ok(Self::ReviewPayment),
            "admin_set" => Ok(Self::AdminSet),
            "transfer_in" => Ok(Self::TransferIn),
            "transfer_out" => Ok(Self::TransferOut),
            "bump_reward" => Ok(Self::BumpReward),
            other => Err(DbError::Corrupt {
                column: "transactions.kind",
                value: other.to_string(),
            }),
        }
    }
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub reference: String,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed change applied to the balance.
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub actor_id: Option<UserId>,
    pub memo: Option<String>,
    pub created_at: i64,
}

type TransactionRow = (
    i64,
    String,
    i64,
    String,
    i64,
    i64,
    Option<i64>,
    Option<String>,
    i64,
);

impl TryFrom<TransactionRow> for Transaction {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let (id, reference, user_id, kind, amount, balance_after, actor_id, memo, created_at) = row;
        Ok(Transaction {
            id,
            reference,
            user_id: from_db(user_id),
            kind: kind.parse()?,
            amount: from_cents(amount),
            balance_after: from_cents(balance_after),
            actor_id: actor_id.map(from_db),
            memo,
            created_at,
        })
    }
}

/// Repository for ledger operations.
pub struct LedgerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LedgerRepository<'a> {
    /// Create a new ledger repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Current balance; users without an account have zero.
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal, DbError> {
        let cents = sqlx::query_scalar::<_, i64>(
            "SELECT balance_cents FROM accounts WHERE user_id = ?",
        )
        .bind(to_db(user_id))
        .fetch_optional(self.pool)
        .await?;

        Ok(from_cents(cents.unwrap_or(0)))
    }

    /// Overwrite a balance, recording the difference as one transaction.
    pub async fn update_balance(
        &self,
        user_id: UserId,
        new_balance: Decimal,
        actor_id: Option<UserId>,
        kind: TransactionKind,
        memo: Option<&str>,
    ) -> Result<Transaction, DbError> {
        let target = to_cents(new_balance)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        // Write first so this transaction holds the write lock before reading.
        sqlx::query(
            "INSERT OR IGNORE INTO accounts (user_id, balance_cents, updated_at) VALUES (?, 0, ?)",
        )
        .bind(to_db(user_id))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let current = sqlx::query_scalar::<_, i64>(
            "SELECT balance_cents FROM accounts WHERE user_id = ?",
        )
        .bind(to_db(user_id))
        .fetch_one(&mut *tx)
        .await?;

        let delta = target
            .checked_sub(current)
            .ok_or_else(|| DbError::AmountOverflow(new_balance.to_string()))?;
        let record = write_delta(&mut tx, user_id, delta, actor_id, kind, memo, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Add a signed amount to a balance.
    pub async fn adjust_balance(
        &self,
        user_id: UserId,
        delta: Decimal,
        actor_id: Option<UserId>,
        kind: TransactionKind,
        memo: Option<&str>,
    ) -> Result<Transaction, DbError> {
        let delta = to_cents(delta)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        let record = write_delta(&mut tx, user_id, delta, actor_id, kind, memo, now).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Move `amount` from one user to another.
    ///
    /// Returns `Ok(None)` without writing anything when the payer's balance
    /// would go negative.
    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<Option<(Transaction, Transaction)>, DbError> {
        let cents = to_cents(amount)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let debit = write_delta(
            &mut tx,
            from,
            -cents,
            Some(from),
            TransactionKind::TransferOut,
            memo,
            now,
        )
        .await?;

        if debit.balance_after < Decimal::ZERO {
            tx.rollback().await?;
            return Ok(None);
        }

        let credit = write_delta(
            &mut tx,
            to,
            cents,
            Some(from),
            TransactionKind::TransferIn,
            memo,
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(Some((debit, credit)))
    }

    /// Most recent transactions for a user, newest first.
    pub async fn transactions(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<Transaction>, DbError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, reference, user_id, kind, amount_cents, balance_after_cents, actor_id, memo, created_at
            FROM transactions
            WHERE user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(to_db(user_id))
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    /// Sum of every recorded delta for a user.
    #[cfg(test)]
    pub async fn transaction_sum(&self, user_id: UserId) -> Result<Decimal, DbError> {
        let cents = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions WHERE user_id = ?",
        )
        .bind(to_db(user_id))
        .fetch_one(self.pool)
        .await?;

        Ok(from_cents(cents))
    }
}

/// Apply a signed cent delta and append its transaction row.
pub(super) async fn write_delta(
    conn: &mut SqliteConnection,
    user_id: UserId,
    delta_cents: i64,
    actor_id: Option<UserId>,
    kind: TransactionKind,
    memo: Option<&str>,
    now: i64,
) -> Result<Transaction, DbError> {
    let balance_after = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO accounts (user_id, balance_cents, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            balance_cents = accounts.balance_cents + excluded.balance_cents,
            updated_at = excluded.updated_at
        RETURNING balance_cents
        "#,
    )
    .bind(to_db(user_id))
    .bind(delta_cents)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let reference = uuid::Uuid::new_v4().to_string();
    let result = sqlx::query(
        r#"
        INSERT INTO transactions
            (reference, user_id, kind, amount_cents, balance_after_cents, actor_id, memo, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&reference)
    .bind(to_db(user_id))
    .bind(kind.as_str())
    .bind(delta_cents)
    .bind(balance_after)
    .bind(actor_id.map(to_db))
    .bind(memo)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(Transaction {
        id: result.last_insert_rowid(),
        reference,
        user_id,
        kind,
        amount: from_cents(delta_cents),
        balance_after: from_cents(balance_after),
        actor_id,
        memo: memo.map(String::from),
        created_at: now,
    })
}
