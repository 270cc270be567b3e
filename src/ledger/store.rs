use crate::ledger::error::LedgerResult;
use crate::ledger::models::{
    EscrowStatus, NewLedgerEntry, Payable, Payment, PaymentMirror, PaymentStatus, PaymentTarget,
    Transaction, WalletBalance, Withdrawal, WithdrawalStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Result of a compare-and-swap transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome<T> {
    /// The record was in an expected state; the update and all entries committed.
    Applied {
        record: T,
        transactions: Vec<Transaction>,
    },
    /// The record was in some other state; nothing was written.
    Rejected { current: T },
}

impl<T> TransitionOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn record(&self) -> &T {
        match self {
            TransitionOutcome::Applied { record, .. } => record,
            TransitionOutcome::Rejected { current } => current,
        }
    }
}

/// Changes applied to a payment when a transition wins. `None` keeps the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    pub gateway_reference: Option<String>,
    pub authorization_code: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PaymentUpdate {
    pub fn to(status: PaymentStatus, escrow_status: EscrowStatus) -> Self {
        Self {
            status,
            escrow_status,
            gateway_reference: None,
            authorization_code: None,
            failure_reason: None,
            refund_reason: None,
            refunded_by: None,
            paid_at: None,
            escrowed_at: None,
            released_at: None,
            refunded_at: None,
        }
    }

    pub fn apply(&self, payment: &mut Payment, now: DateTime<Utc>) {
        payment.status = self.status;
        payment.escrow_status = self.escrow_status;
        fn keep<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }
        keep(&mut payment.gateway_reference, &self.gateway_reference);
        keep(&mut payment.authorization_code, &self.authorization_code);
        keep(&mut payment.failure_reason, &self.failure_reason);
        keep(&mut payment.refund_reason, &self.refund_reason);
        keep(&mut payment.refunded_by, &self.refunded_by);
        keep(&mut payment.paid_at, &self.paid_at);
        keep(&mut payment.escrowed_at, &self.escrowed_at);
        keep(&mut payment.released_at, &self.released_at);
        keep(&mut payment.refunded_at, &self.refunded_at);
        payment.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalUpdate {
    pub status: WithdrawalStatus,
    pub gateway_recipient_code: Option<String>,
    pub gateway_transfer_code: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WithdrawalUpdate {
    pub fn to(status: WithdrawalStatus) -> Self {
        Self {
            status,
            gateway_recipient_code: None,
            gateway_transfer_code: None,
            failure_reason: None,
            processed_at: None,
            completed_at: None,
        }
    }

    pub fn apply(&self, withdrawal: &mut Withdrawal, now: DateTime<Utc>) {
        withdrawal.status = self.status;
        if self.gateway_recipient_code.is_some() {
            withdrawal.gateway_recipient_code = self.gateway_recipient_code.clone();
        }
        if self.gateway_transfer_code.is_some() {
            withdrawal.gateway_transfer_code = self.gateway_transfer_code.clone();
        }
        if self.failure_reason.is_some() {
            withdrawal.failure_reason = self.failure_reason.clone();
        }
        if self.processed_at.is_some() {
            withdrawal.processed_at = self.processed_at;
        }
        if self.completed_at.is_some() {
            withdrawal.completed_at = self.completed_at;
        }
        withdrawal.updated_at = now;
    }
}

/// Durable state of wallets, ledger entries, payments and withdrawals.
///
/// Every method is one atomic unit: either all of its writes commit or none
/// do. Balance changes for a user are serialized, and the `transition_*`
/// methods are linearizable per reference.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Applies one balance movement and records its transaction.
    async fn apply_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<Transaction>;

    async fn wallet_balance(&self, user_id: Uuid) -> LedgerResult<WalletBalance>;

    /// Newest first.
    async fn transactions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Transaction>>;

    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>>;

    async fn find_payable(&self, target: PaymentTarget) -> LedgerResult<Option<Payable>>;

    /// Current commission rate for a vendor, if one is on file.
    async fn commission_rate(&self, vendor_id: Uuid) -> LedgerResult<Option<Decimal>>;

    async fn update_payable_mirror(
        &self,
        target: PaymentTarget,
        mirror: PaymentMirror,
    ) -> LedgerResult<()>;

    /// Inserts a payment together with any ledger entries that fund it.
    async fn insert_payment(
        &self,
        payment: Payment,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<(Payment, Vec<Transaction>)>;

    async fn find_payment_by_reference(&self, reference: &str) -> LedgerResult<Option<Payment>>;

    /// Payment for a booking or order: the paid one if any, otherwise the latest.
    async fn find_payment_for_target(&self, target: PaymentTarget)
        -> LedgerResult<Option<Payment>>;

    /// Oldest pending payments first, skipping the references in `exclude`.
    async fn stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Payment>>;

    async fn transition_payment(
        &self,
        reference: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Payment>>;

    /// Inserts a withdrawal and debits the reserved amount in one unit.
    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
        reservation: NewLedgerEntry,
    ) -> LedgerResult<(Withdrawal, Transaction)>;

    async fn find_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Withdrawal>>;

    async fn withdrawals_in_status(
        &self,
        status: WithdrawalStatus,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Withdrawal>>;

    async fn transition_withdrawal(
        &self,
        reference: &str,
        expected: &[WithdrawalStatus],
        update: WithdrawalUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Withdrawal>>;
}
