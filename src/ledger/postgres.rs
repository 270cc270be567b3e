use crate::config::DatabaseConfig;
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::models::{
    BankAccount, NewLedgerEntry, Payable, Payment, PaymentMirror, PaymentStatus, PaymentTarget,
    RelatedEntity, Transaction, WalletBalance, Withdrawal, WithdrawalStatus,
};
use crate::ledger::store::{LedgerStore, PaymentUpdate, TransitionOutcome, WithdrawalUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_before, \
     balance_after, status, reference, related_type, related_id, description, created_at";

const PAYMENT_COLUMNS: &str = "id, user_id, payment_type, booking_id, order_id, recipient_id, \
     amount, currency, reference, gateway_reference, authorization_code, status, escrow_status, \
     commission_rate, platform_fee, vendor_amount, failure_reason, refund_reason, refunded_by, \
     initiated_at, paid_at, escrowed_at, released_at, refunded_at, updated_at";

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount, fee, net_amount, account_name, \
     account_number, bank_code, reference, status, gateway_recipient_code, \
     gateway_transfer_code, failure_reason, created_at, processed_at, completed_at, updated_at";

/// Opens the connection pool and checks that a connection can be acquired.
pub async fn init_pool(config: &DatabaseConfig) -> LedgerResult<PgPool> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connection_timeout_secs = config.connection_timeout,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to initialize database pool");
            LedgerError::from_sqlx(e)
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(LedgerError::from_sqlx)?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool, path: &str) -> LedgerResult<()> {
    let migrator = sqlx::migrate::Migrator::new(Path::new(path))
        .await
        .map_err(|e| LedgerError::storage(format!("failed to load migrations: {}", e)))?;
    migrator
        .run(pool)
        .await
        .map_err(|e| LedgerError::storage(format!("migration failed: {}", e)))?;
    info!(path = path, "Database migrations applied");
    Ok(())
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    transaction_type: String,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    status: String,
    reference: String,
    related_type: Option<String>,
    related_id: Option<Uuid>,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let related = match (row.related_type.as_deref(), row.related_id) {
            (Some(kind), Some(id)) => Some(RelatedEntity::from_parts(kind, id)?),
            _ => None,
        };
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            transaction_type: row.transaction_type.parse()?,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            status: row.status.parse()?,
            reference: row.reference,
            related,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    payment_type: String,
    booking_id: Option<Uuid>,
    order_id: Option<Uuid>,
    recipient_id: Option<Uuid>,
    amount: Decimal,
    currency: String,
    reference: String,
    gateway_reference: Option<String>,
    authorization_code: Option<String>,
    status: String,
    escrow_status: String,
    commission_rate: Decimal,
    platform_fee: Decimal,
    vendor_amount: Decimal,
    failure_reason: Option<String>,
    refund_reason: Option<String>,
    refunded_by: Option<Uuid>,
    initiated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    escrowed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = LedgerError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let target = PaymentTarget::from_parts(
            row.booking_id,
            row.order_id,
            row.payment_type == "wallet_funding",
        )
        .map_err(|e| LedgerError::storage(format!("payment {}: {}", row.reference, e)))?;
        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            target,
            recipient_id: row.recipient_id,
            amount: row.amount,
            currency: row.currency,
            reference: row.reference,
            gateway_reference: row.gateway_reference,
            authorization_code: row.authorization_code,
            status: row.status.parse()?,
            escrow_status: row.escrow_status.parse()?,
            commission_rate: row.commission_rate,
            platform_fee: row.platform_fee,
            vendor_amount: row.vendor_amount,
            failure_reason: row.failure_reason,
            refund_reason: row.refund_reason,
            refunded_by: row.refunded_by,
            initiated_at: row.initiated_at,
            paid_at: row.paid_at,
            escrowed_at: row.escrowed_at,
            released_at: row.released_at,
            refunded_at: row.refunded_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    fee: Decimal,
    net_amount: Decimal,
    account_name: String,
    account_number: String,
    bank_code: String,
    reference: String,
    status: String,
    gateway_recipient_code: Option<String>,
    gateway_transfer_code: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = LedgerError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        Ok(Withdrawal {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            fee: row.fee,
            net_amount: row.net_amount,
            destination: BankAccount {
                account_name: row.account_name,
                account_number: row.account_number,
                bank_code: row.bank_code,
            },
            reference: row.reference,
            status: row.status.parse()?,
            gateway_recipient_code: row.gateway_recipient_code,
            gateway_transfer_code: row.gateway_transfer_code,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PayableRow {
    payer_id: Uuid,
    recipient_id: Uuid,
    amount: Decimal,
}

fn payable_key(target: PaymentTarget) -> Option<(&'static str, Uuid)> {
    match target {
        PaymentTarget::Booking(id) => Some(("booking", id)),
        PaymentTarget::Order(id) => Some(("order", id)),
        PaymentTarget::WalletFunding => None,
    }
}

/// Applies entries inside an open SQL transaction. Wallet rows are locked in
/// user-id order so concurrent units touching the same wallets cannot deadlock.
async fn apply_entries(
    conn: &mut PgConnection,
    entries: Vec<NewLedgerEntry>,
) -> LedgerResult<Vec<Transaction>> {
    let mut users: Vec<Uuid> = entries.iter().map(|e| e.user_id).collect();
    users.sort();
    users.dedup();

    for user_id in &users {
        sqlx::query("INSERT INTO wallet_balances (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .map_err(LedgerError::from_sqlx)?;
        sqlx::query("SELECT balance FROM wallet_balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .map_err(LedgerError::from_sqlx)?;
    }

    let mut applied = Vec::with_capacity(entries.len());
    for entry in entries {
        entry.validate()?;
        let balance_before: Decimal =
            sqlx::query_scalar("SELECT balance FROM wallet_balances WHERE user_id = $1")
                .bind(entry.user_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(LedgerError::from_sqlx)?;

        if !entry.transaction_type.is_credit() && balance_before < entry.amount {
            return Err(LedgerError::InsufficientFunds {
                user_id: entry.user_id,
                balance: balance_before,
                requested: entry.amount,
            });
        }

        let reference = entry.reference.clone();
        let tx = entry.into_transaction(balance_before, Utc::now());

        sqlx::query("UPDATE wallet_balances SET balance = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(tx.user_id)
            .bind(tx.balance_after)
            .execute(&mut *conn)
            .await
            .map_err(LedgerError::from_sqlx)?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO ledger_transactions ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {cols}",
            cols = TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.amount)
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(tx.status.as_str())
        .bind(&tx.reference)
        .bind(tx.related.map(|r| r.kind()))
        .bind(tx.related.map(|r| r.id()))
        .bind(&tx.description)
        .bind(tx.created_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match LedgerError::from_sqlx(e) {
            LedgerError::DuplicateReference { .. } => LedgerError::DuplicateReference {
                reference: reference.clone(),
            },
            other => other,
        })?;

        applied.push(Transaction::try_from(row)?);
    }

    Ok(applied)
}

/// Locks the payable row so concurrent inserts for one booking or order run
/// one at a time, then refuses a second paid payment.
async fn ensure_target_unpaid(conn: &mut PgConnection, target: PaymentTarget) -> LedgerResult<()> {
    let Some((kind, id)) = payable_key(target) else {
        return Ok(());
    };
    sqlx::query("SELECT 1 FROM payables WHERE target_type = $1 AND target_id = $2 FOR UPDATE")
        .bind(kind)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(LedgerError::from_sqlx)?;

    let column = if kind == "booking" { "booking_id" } else { "order_id" };
    let paid: Option<(String, String)> = sqlx::query_as(&format!(
        "SELECT reference, status FROM payments \
         WHERE {} = $1 AND status IN ('completed', 'released', 'refunded') LIMIT 1",
        column
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(LedgerError::from_sqlx)?;

    match paid {
        Some((reference, status)) => Err(LedgerError::AlreadyPaid {
            target: target.to_string(),
            reference,
            status,
        }),
        None => Ok(()),
    }
}

async fn insert_payment_row(conn: &mut PgConnection, payment: &Payment) -> LedgerResult<Payment> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "INSERT INTO payments ({cols}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
          $20, $21, $22, $23, $24, $25) RETURNING {cols}",
        cols = PAYMENT_COLUMNS
    ))
    .bind(payment.id)
    .bind(payment.user_id)
    .bind(payment.target.kind())
    .bind(payment.target.booking_id())
    .bind(payment.target.order_id())
    .bind(payment.recipient_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(&payment.reference)
    .bind(&payment.gateway_reference)
    .bind(&payment.authorization_code)
    .bind(payment.status.as_str())
    .bind(payment.escrow_status.as_str())
    .bind(payment.commission_rate)
    .bind(payment.platform_fee)
    .bind(payment.vendor_amount)
    .bind(&payment.failure_reason)
    .bind(&payment.refund_reason)
    .bind(payment.refunded_by)
    .bind(payment.initiated_at)
    .bind(payment.paid_at)
    .bind(payment.escrowed_at)
    .bind(payment.released_at)
    .bind(payment.refunded_at)
    .bind(payment.updated_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match LedgerError::from_sqlx(e) {
        LedgerError::DuplicateReference { .. } => LedgerError::DuplicateReference {
            reference: payment.reference.clone(),
        },
        other => other,
    })?;
    Payment::try_from(row)
}

/// Postgres-backed store. Each unit runs in one SQL transaction with row
/// locks on the wallets and the payment or withdrawal it touches.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn apply_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<Transaction> {
        entry.validate()?;
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;
        let applied = apply_entries(&mut tx, vec![entry]).await?;
        tx.commit().await.map_err(LedgerError::from_sqlx)?;
        applied
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::storage("ledger entry was not applied"))
    }

    async fn wallet_balance(&self, user_id: Uuid) -> LedgerResult<WalletBalance> {
        let row: Option<(Decimal, DateTime<Utc>)> =
            sqlx::query_as("SELECT balance, updated_at FROM wallet_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(LedgerError::from_sqlx)?;
        Ok(match row {
            Some((balance, updated_at)) => WalletBalance {
                user_id,
                balance,
                updated_at,
            },
            None => WalletBalance::empty(user_id),
        })
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM ledger_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM ledger_transactions WHERE reference = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn find_payable(&self, target: PaymentTarget) -> LedgerResult<Option<Payable>> {
        let Some((kind, id)) = payable_key(target) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, PayableRow>(
            "SELECT payer_id, recipient_id, amount FROM payables \
             WHERE target_type = $1 AND target_id = $2",
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        Ok(row.map(|r| Payable {
            target,
            payer_id: r.payer_id,
            recipient_id: r.recipient_id,
            amount: r.amount,
        }))
    }

    async fn commission_rate(&self, vendor_id: Uuid) -> LedgerResult<Option<Decimal>> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT rate FROM vendor_commission_rates WHERE vendor_id = $1",
        )
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn update_payable_mirror(
        &self,
        target: PaymentTarget,
        mirror: PaymentMirror,
    ) -> LedgerResult<()> {
        let (kind, id) = payable_key(target)
            .ok_or_else(|| LedgerError::not_found("payable", target.to_string()))?;
        let result = sqlx::query(
            "UPDATE payables SET payment_status = $3, escrow_status = $4, is_paid = $5, \
             paid_at = $6, released_at = $7, refunded_at = $8, payment_reference = $9 \
             WHERE target_type = $1 AND target_id = $2",
        )
        .bind(kind)
        .bind(id)
        .bind(mirror.payment_status.as_str())
        .bind(mirror.escrow_status.as_str())
        .bind(mirror.is_paid)
        .bind(mirror.paid_at)
        .bind(mirror.released_at)
        .bind(mirror.refunded_at)
        .bind(&mirror.payment_reference)
        .execute(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("payable", target.to_string()));
        }
        Ok(())
    }

    async fn insert_payment(
        &self,
        payment: Payment,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<(Payment, Vec<Transaction>)> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;
        ensure_target_unpaid(&mut tx, payment.target).await?;
        let applied = apply_entries(&mut tx, entries).await?;
        let stored = insert_payment_row(&mut tx, &payment).await?;
        tx.commit().await.map_err(LedgerError::from_sqlx)?;
        Ok((stored, applied))
    }

    async fn find_payment_by_reference(&self, reference: &str) -> LedgerResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE reference = $1",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_for_target(
        &self,
        target: PaymentTarget,
    ) -> LedgerResult<Option<Payment>> {
        let (column, id) = match target {
            PaymentTarget::Booking(id) => ("booking_id", id),
            PaymentTarget::Order(id) => ("order_id", id),
            PaymentTarget::WalletFunding => return Ok(None),
        };
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE {} = $1 \
             ORDER BY (status IN ('completed', 'released', 'refunded')) DESC, initiated_at DESC \
             LIMIT 1",
            PAYMENT_COLUMNS, column
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' AND initiated_at < $1 \
             AND reference <> ALL($2) ORDER BY initiated_at ASC LIMIT $3",
            PAYMENT_COLUMNS
        ))
        .bind(older_than)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn transition_payment(
        &self,
        reference: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Payment>> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;

        let current = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE reference = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()?
        .ok_or_else(|| LedgerError::not_found("payment", reference))?;

        if !expected.contains(&current.status) {
            tx.rollback().await.map_err(LedgerError::from_sqlx)?;
            return Ok(TransitionOutcome::Rejected { current });
        }

        let transactions = apply_entries(&mut tx, entries).await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = $2, escrow_status = $3, \
             gateway_reference = COALESCE($4, gateway_reference), \
             authorization_code = COALESCE($5, authorization_code), \
             failure_reason = COALESCE($6, failure_reason), \
             refund_reason = COALESCE($7, refund_reason), \
             refunded_by = COALESCE($8, refunded_by), \
             paid_at = COALESCE($9, paid_at), \
             escrowed_at = COALESCE($10, escrowed_at), \
             released_at = COALESCE($11, released_at), \
             refunded_at = COALESCE($12, refunded_at), \
             updated_at = NOW() \
             WHERE reference = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .bind(update.status.as_str())
        .bind(update.escrow_status.as_str())
        .bind(&update.gateway_reference)
        .bind(&update.authorization_code)
        .bind(&update.failure_reason)
        .bind(&update.refund_reason)
        .bind(update.refunded_by)
        .bind(update.paid_at)
        .bind(update.escrowed_at)
        .bind(update.released_at)
        .bind(update.refunded_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?;

        tx.commit().await.map_err(LedgerError::from_sqlx)?;

        Ok(TransitionOutcome::Applied {
            record: Payment::try_from(row)?,
            transactions,
        })
    }

    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
        reservation: NewLedgerEntry,
    ) -> LedgerResult<(Withdrawal, Transaction)> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;
        let reservation = apply_entries(&mut tx, vec![reservation])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::storage("reservation entry was not applied"))?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "INSERT INTO withdrawals ({cols}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {cols}",
            cols = WITHDRAWAL_COLUMNS
        ))
        .bind(withdrawal.id)
        .bind(withdrawal.user_id)
        .bind(withdrawal.amount)
        .bind(withdrawal.fee)
        .bind(withdrawal.net_amount)
        .bind(&withdrawal.destination.account_name)
        .bind(&withdrawal.destination.account_number)
        .bind(&withdrawal.destination.bank_code)
        .bind(&withdrawal.reference)
        .bind(withdrawal.status.as_str())
        .bind(&withdrawal.gateway_recipient_code)
        .bind(&withdrawal.gateway_transfer_code)
        .bind(&withdrawal.failure_reason)
        .bind(withdrawal.created_at)
        .bind(withdrawal.processed_at)
        .bind(withdrawal.completed_at)
        .bind(withdrawal.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match LedgerError::from_sqlx(e) {
            LedgerError::DuplicateReference { .. } => LedgerError::DuplicateReference {
                reference: withdrawal.reference.clone(),
            },
            other => other,
        })?;

        tx.commit().await.map_err(LedgerError::from_sqlx)?;
        Ok((Withdrawal::try_from(row)?, reservation))
    }

    async fn find_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Withdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawals WHERE reference = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        row.map(Withdrawal::try_from).transpose()
    }

    async fn withdrawals_in_status(
        &self,
        status: WithdrawalStatus,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawals WHERE status = $1 AND updated_at < $2 \
             AND reference <> ALL($3) ORDER BY updated_at ASC LIMIT $4",
            WITHDRAWAL_COLUMNS
        ))
        .bind(status.as_str())
        .bind(older_than)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        rows.into_iter().map(Withdrawal::try_from).collect()
    }

    async fn transition_withdrawal(
        &self,
        reference: &str,
        expected: &[WithdrawalStatus],
        update: WithdrawalUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Withdrawal>> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;

        let current = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawals WHERE reference = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?
        .map(Withdrawal::try_from)
        .transpose()?
        .ok_or_else(|| LedgerError::not_found("withdrawal", reference))?;

        if !expected.contains(&current.status) {
            tx.rollback().await.map_err(LedgerError::from_sqlx)?;
            return Ok(TransitionOutcome::Rejected { current });
        }

        let transactions = apply_entries(&mut tx, entries).await?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "UPDATE withdrawals SET status = $2, \
             gateway_recipient_code = COALESCE($3, gateway_recipient_code), \
             gateway_transfer_code = COALESCE($4, gateway_transfer_code), \
             failure_reason = COALESCE($5, failure_reason), \
             processed_at = COALESCE($6, processed_at), \
             completed_at = COALESCE($7, completed_at), \
             updated_at = NOW() \
             WHERE reference = $1 RETURNING {}",
            WITHDRAWAL_COLUMNS
        ))
        .bind(reference)
        .bind(update.status.as_str())
        .bind(&update.gateway_recipient_code)
        .bind(&update.gateway_transfer_code)
        .bind(&update.failure_reason)
        .bind(update.processed_at)
        .bind(update.completed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?;

        tx.commit().await.map_err(LedgerError::from_sqlx)?;

        Ok(TransitionOutcome::Applied {
            record: Withdrawal::try_from(row)?,
            transactions,
        })
    }
}
