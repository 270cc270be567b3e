use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::models::{
    NewLedgerEntry, Payable, Payment, PaymentMirror, PaymentStatus, PaymentTarget, Transaction,
    WalletBalance, Withdrawal, WithdrawalStatus,
};
use crate::ledger::store::{
    LedgerStore, PaymentUpdate, TransitionOutcome, WithdrawalUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    balances: HashMap<Uuid, WalletBalance>,
    transactions: Vec<Transaction>,
    transaction_refs: HashSet<String>,
    payments: HashMap<String, Payment>,
    withdrawals: HashMap<String, Withdrawal>,
    payables: HashMap<PaymentTarget, Payable>,
    mirrors: HashMap<PaymentTarget, PaymentMirror>,
    commission_rates: HashMap<Uuid, Decimal>,
}

impl State {
    fn balance_of(&self, user_id: Uuid) -> Decimal {
        self.balances
            .get(&user_id)
            .map(|b| b.balance)
            .unwrap_or(Decimal::ZERO)
    }

    /// Checks every entry against a scratch copy of the balances, so a failing
    /// entry leaves the state untouched.
    fn stage(
        &self,
        entries: Vec<NewLedgerEntry>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut scratch: HashMap<Uuid, Decimal> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut staged = Vec::with_capacity(entries.len());

        for entry in entries {
            entry.validate()?;
            if self.transaction_refs.contains(&entry.reference) || !seen.insert(entry.reference.clone())
            {
                return Err(LedgerError::DuplicateReference {
                    reference: entry.reference,
                });
            }

            let before = *scratch
                .entry(entry.user_id)
                .or_insert_with(|| self.balance_of(entry.user_id));
            if !entry.transaction_type.is_credit() && before < entry.amount {
                return Err(LedgerError::InsufficientFunds {
                    user_id: entry.user_id,
                    balance: before,
                    requested: entry.amount,
                });
            }

            let tx = entry.into_transaction(before, now);
            scratch.insert(tx.user_id, tx.balance_after);
            staged.push(tx);
        }

        Ok(staged)
    }

    fn commit(&mut self, staged: &[Transaction], now: DateTime<Utc>) {
        for tx in staged {
            let balance = self
                .balances
                .entry(tx.user_id)
                .or_insert_with(|| WalletBalance::empty(tx.user_id));
            debug_assert_eq!(
                balance.balance, tx.balance_before,
                "staged entry out of sync with wallet balance"
            );
            balance.balance = tx.balance_after;
            balance.updated_at = now;
            debug_assert!(
                balance.balance >= Decimal::ZERO,
                "Invariant violated: wallet balance went negative: {}",
                balance.balance
            );
            self.transaction_refs.insert(tx.reference.clone());
            self.transactions.push(tx.clone());
        }
    }
}

/// Process-local store. One lock guards all state, so every trait method is
/// a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
    fail_mirror_updates: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a booking or order so payments can be initialized against it.
    pub async fn register_payable(&self, payable: Payable) {
        let mut state = self.state.lock().await;
        state.payables.insert(payable.target, payable);
    }

    pub async fn set_commission_rate(&self, vendor_id: Uuid, rate: Decimal) {
        let mut state = self.state.lock().await;
        state.commission_rates.insert(vendor_id, rate);
    }

    pub async fn payable_mirror(&self, target: PaymentTarget) -> Option<PaymentMirror> {
        self.state.lock().await.mirrors.get(&target).cloned()
    }

    /// Makes subsequent mirror writes fail, to exercise post-commit failure paths.
    pub fn set_mirror_failure(&self, fail: bool) {
        self.fail_mirror_updates.store(fail, Ordering::SeqCst);
    }

    /// Sum of signed completed entries per user, for conservation checks.
    pub async fn ledger_sum(&self, user_id: Uuid) -> Decimal {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .map(|tx| tx.transaction_type.signed(tx.amount))
            .sum()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn apply_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<Transaction> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let staged = state.stage(vec![entry], now)?;
        state.commit(&staged, now);
        staged
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::storage("ledger entry was not staged"))
    }

    async fn wallet_balance(&self, user_id: Uuid) -> LedgerResult<WalletBalance> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| WalletBalance::empty(user_id)))
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .find(|tx| tx.reference == reference)
            .cloned())
    }

    async fn find_payable(&self, target: PaymentTarget) -> LedgerResult<Option<Payable>> {
        Ok(self.state.lock().await.payables.get(&target).cloned())
    }

    async fn commission_rate(&self, vendor_id: Uuid) -> LedgerResult<Option<Decimal>> {
        Ok(self
            .state
            .lock()
            .await
            .commission_rates
            .get(&vendor_id)
            .copied())
    }

    async fn update_payable_mirror(
        &self,
        target: PaymentTarget,
        mirror: PaymentMirror,
    ) -> LedgerResult<()> {
        if self.fail_mirror_updates.load(Ordering::SeqCst) {
            return Err(LedgerError::storage(format!(
                "mirror update rejected for {}",
                target
            )));
        }
        let mut state = self.state.lock().await;
        if !state.payables.contains_key(&target) {
            return Err(LedgerError::not_found("payable", target.to_string()));
        }
        state.mirrors.insert(target, mirror);
        Ok(())
    }

    async fn insert_payment(
        &self,
        payment: Payment,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<(Payment, Vec<Transaction>)> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&payment.reference) {
            return Err(LedgerError::DuplicateReference {
                reference: payment.reference,
            });
        }
        if !payment.target.is_wallet_funding() {
            if let Some(paid) = state
                .payments
                .values()
                .find(|p| p.target == payment.target && p.status.is_paid())
            {
                return Err(LedgerError::AlreadyPaid {
                    target: payment.target.to_string(),
                    reference: paid.reference.clone(),
                    status: paid.status.to_string(),
                });
            }
        }
        let now = Utc::now();
        let staged = state.stage(entries, now)?;
        state.commit(&staged, now);
        state
            .payments
            .insert(payment.reference.clone(), payment.clone());
        Ok((payment, staged))
    }

    async fn find_payment_by_reference(&self, reference: &str) -> LedgerResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(reference).cloned())
    }

    async fn find_payment_for_target(
        &self,
        target: PaymentTarget,
    ) -> LedgerResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.target == target)
            .max_by_key(|p| (p.status.is_paid(), p.initiated_at))
            .cloned())
    }

    async fn stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut stale: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.initiated_at < older_than)
            .filter(|p| !exclude.contains(&p.reference))
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.initiated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn transition_payment(
        &self,
        reference: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Payment>> {
        let mut state = self.state.lock().await;
        let current = state
            .payments
            .get(reference)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("payment", reference))?;
        if !expected.contains(&current.status) {
            return Ok(TransitionOutcome::Rejected { current });
        }
        debug_assert!(
            current.status.can_transition_to(update.status),
            "illegal payment transition {} -> {}",
            current.status,
            update.status
        );
        debug_assert!(current.escrow_status.can_advance_to(update.escrow_status));

        let now = Utc::now();
        let staged = state.stage(entries, now)?;
        state.commit(&staged, now);

        let mut updated = current;
        update.apply(&mut updated, now);
        state.payments.insert(reference.to_string(), updated.clone());

        Ok(TransitionOutcome::Applied {
            record: updated,
            transactions: staged,
        })
    }

    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
        reservation: NewLedgerEntry,
    ) -> LedgerResult<(Withdrawal, Transaction)> {
        let mut state = self.state.lock().await;
        if state.withdrawals.contains_key(&withdrawal.reference) {
            return Err(LedgerError::DuplicateReference {
                reference: withdrawal.reference,
            });
        }
        let now = Utc::now();
        let staged = state.stage(vec![reservation], now)?;
        state.commit(&staged, now);
        state
            .withdrawals
            .insert(withdrawal.reference.clone(), withdrawal.clone());
        let reservation = staged
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::storage("reservation entry was not staged"))?;
        Ok((withdrawal, reservation))
    }

    async fn find_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Withdrawal>> {
        Ok(self.state.lock().await.withdrawals.get(reference).cloned())
    }

    async fn withdrawals_in_status(
        &self,
        status: WithdrawalStatus,
        older_than: DateTime<Utc>,
        exclude: &[String],
        limit: i64,
    ) -> LedgerResult<Vec<Withdrawal>> {
        let state = self.state.lock().await;
        let mut matching: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| w.status == status && w.updated_at < older_than)
            .filter(|w| !exclude.contains(&w.reference))
            .cloned()
            .collect();
        matching.sort_by_key(|w| w.updated_at);
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn transition_withdrawal(
        &self,
        reference: &str,
        expected: &[WithdrawalStatus],
        update: WithdrawalUpdate,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<TransitionOutcome<Withdrawal>> {
        let mut state = self.state.lock().await;
        let current = state
            .withdrawals
            .get(reference)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("withdrawal", reference))?;
        if !expected.contains(&current.status) {
            return Ok(TransitionOutcome::Rejected { current });
        }
        // Processing -> processing only records gateway codes.
        debug_assert!(
            current.status == update.status || current.status.can_transition_to(update.status),
            "illegal withdrawal transition {} -> {}",
            current.status,
            update.status
        );

        let now = Utc::now();
        let staged = state.stage(entries, now)?;
        state.commit(&staged, now);

        let mut updated = current;
        update.apply(&mut updated, now);
        state
            .withdrawals
            .insert(reference.to_string(), updated.clone());

        Ok(TransitionOutcome::Applied {
            record: updated,
            transactions: staged,
        })
    }
}
