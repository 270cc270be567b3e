use crate::config::ReconcilerConfig;
use crate::escrow::EscrowEngine;
use crate::ledger::{LedgerStore, PaymentStatus, WithdrawalStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Exponential backoff schedule for re-verification attempts.
///
/// | attempt | delay   |
/// |---------|---------|
/// | 0       | 0 s     |
/// | 1       | 10 s    |
/// | 2       | 30 s    |
/// | 3       | 2 min   |
/// | 4       | 5 min   |
/// | ≥ 5     | 10 min  |
pub fn backoff_delay(attempts: u32) -> Duration {
    match attempts {
        0 => Duration::from_secs(0),
        1 => Duration::from_secs(10),
        2 => Duration::from_secs(30),
        3 => Duration::from_secs(120),
        4 => Duration::from_secs(300),
        _ => Duration::from_secs(600),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Payment,
    Withdrawal,
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    kind: ItemKind,
    count: u32,
    last_at: DateTime<Utc>,
}

/// Per-reference attempt bookkeeping. Lives in memory: a restart simply
/// re-verifies everything once. Entries are dropped once their item leaves
/// the stuck state, so the map only holds what is still unresolved.
#[derive(Debug, Default)]
struct AttemptTracker {
    attempts: HashMap<String, Attempt>,
}

impl AttemptTracker {
    fn is_ready(&self, reference: &str, now: DateTime<Utc>, max_attempts: u32) -> bool {
        match self.attempts.get(reference) {
            None => true,
            Some(attempt) => attempt.is_ready(now, max_attempts),
        }
    }

    /// References of `kind` that must not be fetched this cycle: still in
    /// backoff, or out of attempts.
    fn waiting(&self, kind: ItemKind, now: DateTime<Utc>, max_attempts: u32) -> Vec<String> {
        self.attempts
            .iter()
            .filter(|(_, a)| a.kind == kind && !a.is_ready(now, max_attempts))
            .map(|(reference, _)| reference.clone())
            .collect()
    }

    /// Records an unresolved attempt and returns the new count.
    fn record(&mut self, reference: &str, kind: ItemKind, now: DateTime<Utc>) -> u32 {
        let entry = self
            .attempts
            .entry(reference.to_string())
            .or_insert(Attempt {
                kind,
                count: 0,
                last_at: now,
            });
        entry.count += 1;
        entry.last_at = now;
        entry.count
    }

    fn resolve(&mut self, reference: &str) {
        self.attempts.remove(reference);
    }

    fn tracked(&self) -> Vec<(String, ItemKind)> {
        self.attempts
            .iter()
            .map(|(reference, a)| (reference.clone(), a.kind))
            .collect()
    }

    fn len(&self) -> usize {
        self.attempts.len()
    }
}

impl Attempt {
    fn is_ready(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        if self.count >= max_attempts {
            return false;
        }
        let delay = chrono::Duration::from_std(backoff_delay(self.count))
            .unwrap_or_else(|_| chrono::Duration::zero());
        now - self.last_at >= delay
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub payments_checked: usize,
    pub payments_resolved: usize,
    pub withdrawals_checked: usize,
    pub withdrawals_resolved: usize,
    /// Unresolved references still held for backoff or manual review.
    pub tracked: usize,
}

/// Re-verifies payments stuck in `pending` and payouts stuck in `processing`
/// through the same engine transitions as webhooks. A gateway error or an
/// unknown outcome never fails anything; the item is simply tried again later.
pub struct PaymentReconcilerWorker {
    engine: Arc<EscrowEngine>,
    store: Arc<dyn LedgerStore>,
    config: ReconcilerConfig,
    tracker: AttemptTracker,
}

impl PaymentReconcilerWorker {
    pub fn new(
        engine: Arc<EscrowEngine>,
        store: Arc<dyn LedgerStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            tracker: AttemptTracker::default(),
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "payment reconciler worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciler worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.payments_checked + report.withdrawals_checked > 0 => {
                            info!(
                                payments_checked = report.payments_checked,
                                payments_resolved = report.payments_resolved,
                                withdrawals_checked = report.withdrawals_checked,
                                withdrawals_resolved = report.withdrawals_resolved,
                                "reconciliation cycle finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("payment reconciler worker stopped");
    }

    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();
        let stale_after = chrono::Duration::from_std(self.config.stale_after)?;
        let cutoff = Utc::now() - stale_after;
        self.forget_settled().await?;

        // Items in backoff or out of attempts are excluded from the query so
        // they never crowd newer work out of the batch.
        let waiting = self
            .tracker
            .waiting(ItemKind::Payment, Utc::now(), self.config.max_attempts);
        let pending = self
            .store
            .stale_pending_payments(cutoff, &waiting, self.config.batch_size)
            .await?;
        for payment in pending {
            let now = Utc::now();
            if !self
                .tracker
                .is_ready(&payment.reference, now, self.config.max_attempts)
            {
                continue;
            }
            report.payments_checked += 1;

            match self.engine.verify_payment(&payment.reference).await {
                Ok(verified) if verified.payment.status != PaymentStatus::Pending => {
                    info!(
                        reference = %payment.reference,
                        status = %verified.payment.status,
                        "stale payment reconciled"
                    );
                    self.tracker.resolve(&payment.reference);
                    report.payments_resolved += 1;
                }
                Ok(_) => self.note_unresolved(&payment.reference, ItemKind::Payment, now, None),
                Err(e) => self.note_unresolved(
                    &payment.reference,
                    ItemKind::Payment,
                    now,
                    Some(e.to_string()),
                ),
            }
        }

        let waiting = self
            .tracker
            .waiting(ItemKind::Withdrawal, Utc::now(), self.config.max_attempts);
        let processing = self
            .store
            .withdrawals_in_status(
                WithdrawalStatus::Processing,
                cutoff,
                &waiting,
                self.config.batch_size,
            )
            .await?;
        for withdrawal in processing {
            let now = Utc::now();
            if !self
                .tracker
                .is_ready(&withdrawal.reference, now, self.config.max_attempts)
            {
                continue;
            }
            report.withdrawals_checked += 1;

            match self.engine.verify_withdrawal(&withdrawal.reference).await {
                Ok(verified) if verified.status != WithdrawalStatus::Processing => {
                    info!(
                        reference = %withdrawal.reference,
                        status = %verified.status,
                        "processing withdrawal reconciled"
                    );
                    self.tracker.resolve(&withdrawal.reference);
                    report.withdrawals_resolved += 1;
                }
                Ok(_) => {
                    self.note_unresolved(&withdrawal.reference, ItemKind::Withdrawal, now, None)
                }
                Err(e) => self.note_unresolved(
                    &withdrawal.reference,
                    ItemKind::Withdrawal,
                    now,
                    Some(e.to_string()),
                ),
            }
        }

        report.tracked = self.tracker.len();
        Ok(report)
    }

    /// Drops tracked references that a webhook, a manual verify or an admin
    /// settled since they were last seen.
    async fn forget_settled(&mut self) -> anyhow::Result<()> {
        for (reference, kind) in self.tracker.tracked() {
            let still_stuck = match kind {
                ItemKind::Payment => self
                    .store
                    .find_payment_by_reference(&reference)
                    .await?
                    .is_some_and(|p| p.status == PaymentStatus::Pending),
                ItemKind::Withdrawal => self
                    .store
                    .find_withdrawal_by_reference(&reference)
                    .await?
                    .is_some_and(|w| w.status == WithdrawalStatus::Processing),
            };
            if !still_stuck {
                self.tracker.resolve(&reference);
            }
        }
        Ok(())
    }

    fn note_unresolved(
        &mut self,
        reference: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
        error: Option<String>,
    ) {
        let attempts = self.tracker.record(reference, kind, now);
        if attempts >= self.config.max_attempts {
            warn!(
                reference = %reference,
                attempts,
                error = ?error,
                "reconciliation attempts exhausted, manual review required"
            );
        } else {
            warn!(
                reference = %reference,
                attempts,
                error = ?error,
                next_retry_after_secs = backoff_delay(attempts).as_secs(),
                "reference still unresolved"
            );
        }
    }
}
