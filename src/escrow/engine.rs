//! Escrow engine: the only writer of payments, withdrawals and payment mirrors.
//!
//! Every transition goes through a compare-and-swap on the stored status, so
//! the webhook, the manual verify call and the reconciler can all race on the
//! same reference and money moves exactly once.

use crate::config::EscrowConfig;
use crate::escrow::error::{EscrowError, EscrowResult};
use crate::escrow::fees::{FeeBreakdown, WithdrawalCharge};
use crate::ledger::reference::{
    generate_reference, BOOKING_PAYMENT_PREFIX, ORDER_PAYMENT_PREFIX, WALLET_FUNDING_PREFIX,
    WALLET_PAYMENT_PREFIX, WITHDRAWAL_PREFIX,
};
use crate::ledger::{
    BankAccount, EscrowStatus, LedgerStore, NewLedgerEntry, Payable, Payment, PaymentMirror,
    PaymentStatus, PaymentTarget, PaymentUpdate, Transaction, TransactionType, TransitionOutcome,
    WalletBalance, Withdrawal, WithdrawalStatus, WithdrawalUpdate,
};
use crate::payments::types::{
    ChargeRequest, ChargeStatus, ChargeVerification, PayoutRecipientRequest, PayoutRequest,
    TransferStatus,
};
use crate::payments::PaymentGateway;
use crate::services::notification::{LedgerEvent, Notifier, TransitionKind};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InitializePayment {
    pub payer_id: Uuid,
    pub payer_email: String,
    pub target: PaymentTarget,
    /// When given, must match the payable's amount.
    pub amount: Option<Decimal>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializedPayment {
    pub payment: Payment,
    pub redirect_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReport {
    pub payment: Payment,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSummary {
    pub balance: WalletBalance,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Credit,
    Debit,
}

pub struct EscrowEngine {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    config: EscrowConfig,
}

impl EscrowEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        config: EscrowConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    // ---------------------------------------------------------------------
    // Charges
    // ---------------------------------------------------------------------

    pub async fn initialize_payment(
        &self,
        request: InitializePayment,
    ) -> EscrowResult<InitializedPayment> {
        let prefix = match request.target {
            PaymentTarget::Booking(_) => BOOKING_PAYMENT_PREFIX,
            PaymentTarget::Order(_) => ORDER_PAYMENT_PREFIX,
            PaymentTarget::WalletFunding => {
                return Err(EscrowError::validation(
                    "wallet funding is initialized through the wallet",
                ))
            }
        };
        validate_email(&request.payer_email)?;

        let payable = self.payable_for(request.payer_id, request.target).await?;
        if let Some(amount) = request.amount {
            if amount != payable.amount {
                return Err(EscrowError::invalid_field(
                    "amount",
                    format!("amount {} does not match payable amount {}", amount, payable.amount),
                ));
            }
        }
        self.ensure_not_paid(request.target).await?;

        // The rate is fixed here; later tier changes do not touch this payment.
        let rate = self
            .store
            .commission_rate(payable.recipient_id)
            .await?
            .unwrap_or(self.config.default_commission_rate);
        let fees = FeeBreakdown::compute(payable.amount, rate)?;

        let payment = self.new_payment(
            request.payer_id,
            request.target,
            Some(payable.recipient_id),
            fees,
            generate_reference(prefix),
        );
        self.start_charge(payment, request.payer_email, request.callback_url)
            .await
    }

    pub async fn initialize_wallet_funding(
        &self,
        user_id: Uuid,
        email: &str,
        amount: Decimal,
        callback_url: Option<String>,
    ) -> EscrowResult<InitializedPayment> {
        validate_email(email)?;
        let fees = FeeBreakdown::fee_free(amount)?;
        let payment = self.new_payment(
            user_id,
            PaymentTarget::WalletFunding,
            None,
            fees,
            generate_reference(WALLET_FUNDING_PREFIX),
        );
        self.start_charge(payment, email.to_string(), callback_url)
            .await
    }

    /// Pays a booking or order from the payer's wallet. The debit and the held
    /// payment are written as one unit.
    pub async fn pay_with_wallet(
        &self,
        payer_id: Uuid,
        target: PaymentTarget,
    ) -> EscrowResult<PaymentReport> {
        if target.is_wallet_funding() {
            return Err(EscrowError::validation(
                "wallet payments require a booking or an order",
            ));
        }
        let payable = self.payable_for(payer_id, target).await?;
        self.ensure_not_paid(target).await?;

        let rate = self
            .store
            .commission_rate(payable.recipient_id)
            .await?
            .unwrap_or(self.config.default_commission_rate);
        let fees = FeeBreakdown::compute(payable.amount, rate)?;

        let now = Utc::now();
        let mut payment = self.new_payment(
            payer_id,
            target,
            Some(payable.recipient_id),
            fees,
            generate_reference(WALLET_PAYMENT_PREFIX),
        );
        payment.status = PaymentStatus::Completed;
        payment.escrow_status = EscrowStatus::Held;
        payment.paid_at = Some(now);
        payment.escrowed_at = Some(now);

        let debit = NewLedgerEntry::new(payer_id, TransactionType::Payment, payment.amount)
            .related(payment.related_entity())
            .description(format!("Wallet payment for {}", target));
        let (payment, transactions) = self.store.insert_payment(payment, vec![debit]).await?;

        info!(
            reference = %payment.reference,
            user_id = %payer_id,
            amount = %payment.amount,
            target = %target,
            "wallet payment held in escrow"
        );
        self.publish_entries(TransitionKind::WalletPayment, &payment.reference, &transactions);
        self.sync_mirror(&payment).await?;

        Ok(PaymentReport {
            payment,
            transactions,
        })
    }

    /// Applies a successful gateway outcome. Safe to call any number of times
    /// from any entry point; only the first call moves the payment.
    pub async fn confirm_charge(
        &self,
        reference: &str,
        verification: ChargeVerification,
    ) -> EscrowResult<Payment> {
        let payment = self.payment(reference).await?;
        match payment.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Failed => {
                warn!(
                    reference = %reference,
                    "successful charge reported for a failed payment, manual review required"
                );
                return Ok(payment);
            }
            _ => return Ok(payment),
        }

        if let Some(paid) = verification.amount {
            if paid != payment.amount {
                warn!(
                    reference = %reference,
                    expected = %payment.amount,
                    reported = %paid,
                    "charge amount mismatch, payment left pending"
                );
                return Err(EscrowError::invalid_field(
                    "amount",
                    format!(
                        "gateway reported {} but payment expects {}",
                        paid, payment.amount
                    ),
                ));
            }
        }

        let now = Utc::now();
        let wallet_funding = payment.target.is_wallet_funding();
        let (mut update, entries) = if wallet_funding {
            let mut update = PaymentUpdate::to(PaymentStatus::Released, EscrowStatus::Released);
            update.released_at = Some(now);
            let credit =
                NewLedgerEntry::new(payment.user_id, TransactionType::WalletCredit, payment.amount)
                    .related(payment.related_entity())
                    .description("Wallet funding");
            (update, vec![credit])
        } else {
            let mut update = PaymentUpdate::to(PaymentStatus::Completed, EscrowStatus::Held);
            update.escrowed_at = Some(now);
            (update, vec![])
        };
        update.paid_at = Some(now);
        update.gateway_reference = verification.gateway_reference.clone();
        update.authorization_code = verification.authorization_code.clone();

        match self
            .store
            .transition_payment(reference, &[PaymentStatus::Pending], update, entries)
            .await?
        {
            TransitionOutcome::Applied {
                record,
                transactions,
            } => {
                info!(
                    reference = %reference,
                    user_id = %record.user_id,
                    amount = %record.amount,
                    status = %record.status,
                    "charge confirmed"
                );
                if wallet_funding {
                    self.publish_entries(TransitionKind::WalletFunded, reference, &transactions);
                } else {
                    self.notifier.publish(LedgerEvent::new(
                        TransitionKind::PaymentHeld,
                        record.user_id,
                        record.amount,
                        None,
                        reference,
                    ));
                }
                self.sync_mirror(&record).await?;
                Ok(record)
            }
            TransitionOutcome::Rejected { current } => {
                if current.status == PaymentStatus::Failed {
                    warn!(
                        reference = %reference,
                        "successful charge reported for a failed payment, manual review required"
                    );
                }
                Ok(current)
            }
        }
    }

    /// Marks a pending payment failed. No funds move.
    pub async fn fail_charge(&self, reference: &str, reason: &str) -> EscrowResult<Payment> {
        let payment = self.payment(reference).await?;
        if payment.status != PaymentStatus::Pending {
            if payment.status != PaymentStatus::Failed {
                warn!(
                    reference = %reference,
                    status = %payment.status,
                    reason = reason,
                    "charge failure reported for a payment that is no longer pending, ignored"
                );
            }
            return Ok(payment);
        }

        let mut update = PaymentUpdate::to(PaymentStatus::Failed, EscrowStatus::Pending);
        update.failure_reason = Some(reason.to_string());

        match self
            .store
            .transition_payment(reference, &[PaymentStatus::Pending], update, vec![])
            .await?
        {
            TransitionOutcome::Applied { record, .. } => {
                info!(reference = %reference, reason = reason, "charge failed");
                self.notifier.publish(LedgerEvent::new(
                    TransitionKind::PaymentFailed,
                    record.user_id,
                    record.amount,
                    None,
                    reference,
                ));
                self.sync_mirror(&record).await?;
                Ok(record)
            }
            TransitionOutcome::Rejected { current } => Ok(current),
        }
    }

    /// Routes a gateway-reported charge outcome to the matching transition.
    pub async fn reconcile_charge(
        &self,
        reference: &str,
        verification: ChargeVerification,
    ) -> EscrowResult<Payment> {
        match verification.status {
            ChargeStatus::Success => self.confirm_charge(reference, verification).await,
            ChargeStatus::Failed | ChargeStatus::Abandoned | ChargeStatus::Reversed => {
                let reason = verification
                    .gateway_response
                    .clone()
                    .unwrap_or_else(|| format!("{:?}", verification.status).to_lowercase());
                self.fail_charge(reference, &reason).await
            }
            ChargeStatus::Pending | ChargeStatus::Unknown => self.payment(reference).await,
        }
    }

    /// Manual verification: asks the gateway for the charge outcome and feeds
    /// it through the same transitions as the webhook.
    pub async fn verify_payment(&self, reference: &str) -> EscrowResult<PaymentReport> {
        let mut payment = self.payment(reference).await?;
        if payment.status == PaymentStatus::Pending {
            let verification = self.gateway.verify_charge(reference).await.map_err(|e| {
                warn!(reference = %reference, error = %e, "charge verification failed");
                EscrowError::Gateway(e)
            })?;
            payment = self.reconcile_charge(reference, verification).await?;
        }
        let transactions = self.payment_transactions(&payment).await?;
        Ok(PaymentReport {
            payment,
            transactions,
        })
    }

    // ---------------------------------------------------------------------
    // Escrow release and refund
    // ---------------------------------------------------------------------

    /// Pays the held funds out: the snapshotted vendor amount to the recipient
    /// and the platform fee to the platform account, in one unit.
    pub async fn release_to_recipient(&self, reference: &str) -> EscrowResult<Payment> {
        let payment = self.payment(reference).await?;
        match payment.status {
            PaymentStatus::Released => return Ok(payment),
            PaymentStatus::Completed => {}
            other => return Err(EscrowError::invalid_transition(reference, other, "release")),
        }
        let recipient_id = payment.recipient_id.ok_or_else(|| {
            EscrowError::Storage {
                message: format!("payment {} has no recipient", reference),
            }
        })?;

        let mut entries = Vec::with_capacity(2);
        if payment.vendor_amount > Decimal::ZERO {
            entries.push(
                NewLedgerEntry::new(recipient_id, TransactionType::Earning, payment.vendor_amount)
                    .related(payment.related_entity())
                    .description(format!("Earnings for {}", payment.target)),
            );
        }
        if payment.platform_fee > Decimal::ZERO {
            entries.push(
                NewLedgerEntry::new(
                    self.config.platform_account_id,
                    TransactionType::Commission,
                    payment.platform_fee,
                )
                .related(payment.related_entity())
                .description(format!("Commission on {}", payment.target)),
            );
        }

        let mut update = PaymentUpdate::to(PaymentStatus::Released, EscrowStatus::Released);
        update.released_at = Some(Utc::now());

        match self
            .store
            .transition_payment(reference, &[PaymentStatus::Completed], update, entries)
            .await?
        {
            TransitionOutcome::Applied {
                record,
                transactions,
            } => {
                info!(
                    reference = %reference,
                    recipient_id = %recipient_id,
                    vendor_amount = %record.vendor_amount,
                    platform_fee = %record.platform_fee,
                    "escrow released"
                );
                for tx in &transactions {
                    let kind = if tx.transaction_type == TransactionType::Commission {
                        TransitionKind::CommissionEarned
                    } else {
                        TransitionKind::EscrowReleased
                    };
                    self.notifier.publish(event_for(kind, tx, reference));
                }
                self.sync_mirror(&record).await?;
                Ok(record)
            }
            TransitionOutcome::Rejected { current } if current.status == PaymentStatus::Released => {
                Ok(current)
            }
            TransitionOutcome::Rejected { current } => Err(EscrowError::invalid_transition(
                reference,
                current.status,
                "release",
            )),
        }
    }

    /// Returns the full held amount to the payer.
    pub async fn refund(
        &self,
        reference: &str,
        reason: &str,
        actor: Option<Uuid>,
    ) -> EscrowResult<Payment> {
        if reason.trim().is_empty() {
            return Err(EscrowError::invalid_field("reason", "refund reason is required"));
        }
        let payment = self.payment(reference).await?;
        match payment.status {
            PaymentStatus::Refunded => return Ok(payment),
            PaymentStatus::Completed => {}
            other => return Err(EscrowError::invalid_transition(reference, other, "refund")),
        }

        let credit = NewLedgerEntry::new(payment.user_id, TransactionType::Refund, payment.amount)
            .related(payment.related_entity())
            .description(format!("Refund for {}: {}", payment.target, reason.trim()));
        let mut update = PaymentUpdate::to(PaymentStatus::Refunded, EscrowStatus::Refunded);
        update.refunded_at = Some(Utc::now());
        update.refund_reason = Some(reason.trim().to_string());
        update.refunded_by = actor;

        match self
            .store
            .transition_payment(reference, &[PaymentStatus::Completed], update, vec![credit])
            .await?
        {
            TransitionOutcome::Applied {
                record,
                transactions,
            } => {
                info!(
                    reference = %reference,
                    user_id = %record.user_id,
                    amount = %record.amount,
                    reason = reason,
                    actor = ?actor,
                    "escrow refunded"
                );
                self.publish_entries(TransitionKind::EscrowRefunded, reference, &transactions);
                self.sync_mirror(&record).await?;
                Ok(record)
            }
            TransitionOutcome::Rejected { current } if current.status == PaymentStatus::Refunded => {
                Ok(current)
            }
            TransitionOutcome::Rejected { current } => Err(EscrowError::invalid_transition(
                reference,
                current.status,
                "refund",
            )),
        }
    }

    pub async fn release_for_target(&self, target: PaymentTarget) -> EscrowResult<Payment> {
        let payment = self.payment_for_target(target).await?;
        self.release_to_recipient(&payment.reference).await
    }

    pub async fn refund_for_target(
        &self,
        target: PaymentTarget,
        reason: &str,
        actor: Option<Uuid>,
    ) -> EscrowResult<Payment> {
        let payment = self.payment_for_target(target).await?;
        self.refund(&payment.reference, reason, actor).await
    }

    /// Rewrites the booking/order mirror from the stored payment.
    pub async fn resync_mirror(&self, reference: &str) -> EscrowResult<Payment> {
        let payment = self.payment(reference).await?;
        if payment.target.is_wallet_funding() {
            return Err(EscrowError::validation(
                "wallet funding payments have no payable to resync",
            ));
        }
        self.store
            .update_payable_mirror(payment.target, PaymentMirror::from(&payment))
            .await?;
        info!(reference = %reference, target = %payment.target, "payable mirror resynced");
        Ok(payment)
    }

    // ---------------------------------------------------------------------
    // Withdrawals
    // ---------------------------------------------------------------------

    /// Reserves the full amount from the wallet and records a pending payout.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        destination: BankAccount,
    ) -> EscrowResult<Withdrawal> {
        validate_bank_account(&destination)?;
        let charge = WithdrawalCharge::compute(
            amount,
            self.config.withdrawal_fee,
            self.config.min_withdrawal_amount,
        )?;

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            amount: charge.amount,
            fee: charge.fee,
            net_amount: charge.net_amount,
            destination,
            reference: generate_reference(WITHDRAWAL_PREFIX),
            status: WithdrawalStatus::Pending,
            gateway_recipient_code: None,
            gateway_transfer_code: None,
            failure_reason: None,
            created_at: now,
            processed_at: None,
            completed_at: None,
            updated_at: now,
        };
        let reservation = NewLedgerEntry::new(user_id, TransactionType::Withdrawal, charge.amount)
            .related(withdrawal.related_entity())
            .description(format!("Withdrawal to {}", withdrawal.destination.account_number));

        let (withdrawal, reserved) = self.store.insert_withdrawal(withdrawal, reservation).await?;
        info!(
            reference = %withdrawal.reference,
            user_id = %user_id,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            "withdrawal requested"
        );
        self.notifier.publish(event_for(
            TransitionKind::WithdrawalRequested,
            &reserved,
            &withdrawal.reference,
        ));
        Ok(withdrawal)
    }

    /// Moves a pending withdrawal to processing and starts the payout. The
    /// gateway is called at most once per reference: a repeated approval
    /// returns the stored withdrawal. A definite gateway rejection fails the
    /// withdrawal and restores the reserved amount; an unknown outcome leaves
    /// it processing for verification.
    pub async fn approve_withdrawal(&self, reference: &str) -> EscrowResult<Withdrawal> {
        let mut update = WithdrawalUpdate::to(WithdrawalStatus::Processing);
        update.processed_at = Some(Utc::now());

        let withdrawal = match self
            .store
            .transition_withdrawal(reference, &[WithdrawalStatus::Pending], update, vec![])
            .await?
        {
            TransitionOutcome::Applied { record, .. } => record,
            TransitionOutcome::Rejected { current } => {
                return match current.status {
                    WithdrawalStatus::Processing | WithdrawalStatus::Completed => Ok(current),
                    other => Err(EscrowError::invalid_transition(reference, other, "approve")),
                };
            }
        };
        info!(reference = %reference, "withdrawal approved, starting payout");
        self.notifier.publish(LedgerEvent::new(
            TransitionKind::WithdrawalProcessing,
            withdrawal.user_id,
            withdrawal.net_amount,
            None,
            reference,
        ));

        // No transfer exists before initiation, so a failed recipient lookup
        // can always be unwound.
        let recipient_code = match self
            .gateway
            .create_payout_recipient(PayoutRecipientRequest {
                account_name: withdrawal.destination.account_name.clone(),
                account_number: withdrawal.destination.account_number.clone(),
                bank_code: withdrawal.destination.bank_code.clone(),
                currency: self.config.currency.clone(),
            })
            .await
        {
            Ok(code) => code,
            Err(e) => {
                warn!(
                    reference = %reference,
                    error = %e,
                    "payout recipient creation failed, restoring funds"
                );
                self.fail_withdrawal(reference, &format!("payout recipient rejected: {}", e))
                    .await?;
                return Err(EscrowError::Gateway(e));
            }
        };
        let mut update = WithdrawalUpdate::to(WithdrawalStatus::Processing);
        update.gateway_recipient_code = Some(recipient_code.clone());
        let withdrawal = self
            .store
            .transition_withdrawal(reference, &[WithdrawalStatus::Processing], update, vec![])
            .await?
            .record()
            .clone();

        let initiation = match self
            .gateway
            .initiate_payout(PayoutRequest {
                amount: withdrawal.net_amount,
                recipient_code,
                reference: withdrawal.reference.clone(),
                reason: Some("Wallet withdrawal".to_string()),
            })
            .await
        {
            Ok(initiation) => initiation,
            Err(e) if e.is_outcome_unknown() => {
                // The transfer may exist upstream; only a verify or webhook may settle it.
                error!(
                    reference = %reference,
                    error = %e,
                    "payout initiation outcome unknown, withdrawal left processing"
                );
                return Err(EscrowError::Gateway(e));
            }
            Err(e) => {
                warn!(
                    reference = %reference,
                    error = %e,
                    "payout initiation rejected, restoring funds"
                );
                self.fail_withdrawal(reference, &format!("payout rejected: {}", e))
                    .await?;
                return Err(EscrowError::Gateway(e));
            }
        };

        match initiation.status {
            TransferStatus::Success => {
                self.complete_withdrawal(reference, Some(initiation.transfer_code))
                    .await
            }
            TransferStatus::Failed => {
                self.fail_withdrawal(reference, "payout rejected by gateway")
                    .await
            }
            _ => {
                let mut update = WithdrawalUpdate::to(WithdrawalStatus::Processing);
                update.gateway_transfer_code = Some(initiation.transfer_code);
                Ok(self
                    .store
                    .transition_withdrawal(
                        reference,
                        &[WithdrawalStatus::Processing],
                        update,
                        vec![],
                    )
                    .await?
                    .record()
                    .clone())
            }
        }
    }

    /// Declines a pending withdrawal and restores the reserved amount.
    pub async fn reject_withdrawal(&self, reference: &str, reason: &str) -> EscrowResult<Withdrawal> {
        if reason.trim().is_empty() {
            return Err(EscrowError::invalid_field("reason", "rejection reason is required"));
        }
        let withdrawal = self.withdrawal(reference).await?;
        let mut update = WithdrawalUpdate::to(WithdrawalStatus::Rejected);
        update.failure_reason = Some(reason.trim().to_string());
        let refund = NewLedgerEntry::new(withdrawal.user_id, TransactionType::Refund, withdrawal.amount)
            .related(withdrawal.related_entity())
            .description(format!("Withdrawal rejected: {}", reason.trim()));

        match self
            .store
            .transition_withdrawal(reference, &[WithdrawalStatus::Pending], update, vec![refund])
            .await?
        {
            TransitionOutcome::Applied {
                record,
                transactions,
            } => {
                info!(reference = %reference, reason = reason, "withdrawal rejected");
                self.publish_entries(TransitionKind::WithdrawalRejected, reference, &transactions);
                Ok(record)
            }
            TransitionOutcome::Rejected { current }
                if current.status == WithdrawalStatus::Rejected =>
            {
                Ok(current)
            }
            TransitionOutcome::Rejected { current } => Err(EscrowError::invalid_transition(
                reference,
                current.status,
                "reject",
            )),
        }
    }

    /// Settles a payout the gateway reported as successful. The fee goes to
    /// the platform account; the reserved amount stays debited.
    pub async fn complete_withdrawal(
        &self,
        reference: &str,
        transfer_code: Option<String>,
    ) -> EscrowResult<Withdrawal> {
        let withdrawal = self.withdrawal(reference).await?;
        let mut update = WithdrawalUpdate::to(WithdrawalStatus::Completed);
        update.completed_at = Some(Utc::now());
        update.gateway_transfer_code = transfer_code;

        let mut entries = Vec::new();
        if withdrawal.fee > Decimal::ZERO {
            entries.push(
                NewLedgerEntry::new(
                    self.config.platform_account_id,
                    TransactionType::Commission,
                    withdrawal.fee,
                )
                .related(withdrawal.related_entity())
                .description("Withdrawal fee"),
            );
        }

        match self
            .store
            .transition_withdrawal(reference, &[WithdrawalStatus::Processing], update, entries)
            .await?
        {
            TransitionOutcome::Applied { record, .. } => {
                info!(
                    reference = %reference,
                    user_id = %record.user_id,
                    net_amount = %record.net_amount,
                    "withdrawal completed"
                );
                self.notifier.publish(LedgerEvent::new(
                    TransitionKind::WithdrawalCompleted,
                    record.user_id,
                    record.net_amount,
                    None,
                    reference,
                ));
                Ok(record)
            }
            TransitionOutcome::Rejected { current }
                if current.status == WithdrawalStatus::Completed =>
            {
                Ok(current)
            }
            TransitionOutcome::Rejected { current } => {
                error!(
                    reference = %reference,
                    status = %current.status,
                    "payout success reported for a withdrawal that is not processing, manual review required"
                );
                Err(EscrowError::invalid_transition(
                    reference,
                    current.status,
                    "complete",
                ))
            }
        }
    }

    /// Settles a payout the gateway reported as failed or reversed and
    /// restores the full reserved amount.
    pub async fn fail_withdrawal(&self, reference: &str, reason: &str) -> EscrowResult<Withdrawal> {
        let withdrawal = self.withdrawal(reference).await?;
        let mut update = WithdrawalUpdate::to(WithdrawalStatus::Failed);
        update.failure_reason = Some(reason.to_string());
        let refund = NewLedgerEntry::new(withdrawal.user_id, TransactionType::Refund, withdrawal.amount)
            .related(withdrawal.related_entity())
            .description(format!("Withdrawal failed: {}", reason));

        match self
            .store
            .transition_withdrawal(reference, &[WithdrawalStatus::Processing], update, vec![refund])
            .await?
        {
            TransitionOutcome::Applied {
                record,
                transactions,
            } => {
                info!(reference = %reference, reason = reason, "withdrawal failed, funds restored");
                self.publish_entries(TransitionKind::WithdrawalFailed, reference, &transactions);
                Ok(record)
            }
            TransitionOutcome::Rejected { current } if current.status == WithdrawalStatus::Failed => {
                Ok(current)
            }
            TransitionOutcome::Rejected { current } => {
                error!(
                    reference = %reference,
                    status = %current.status,
                    reason = reason,
                    "payout failure reported for a withdrawal that is not processing, manual review required"
                );
                Err(EscrowError::invalid_transition(reference, current.status, "fail"))
            }
        }
    }

    /// Polls the gateway for a processing payout. Anything short of a
    /// definitive answer leaves the withdrawal processing.
    pub async fn verify_withdrawal(&self, reference: &str) -> EscrowResult<Withdrawal> {
        let withdrawal = self.withdrawal(reference).await?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Ok(withdrawal);
        }

        let verification = self.gateway.verify_payout(reference).await.map_err(|e| {
            warn!(reference = %reference, error = %e, "payout verification failed");
            EscrowError::Gateway(e)
        })?;

        match verification.status {
            TransferStatus::Success => {
                self.complete_withdrawal(reference, verification.transfer_code)
                    .await
            }
            TransferStatus::Failed | TransferStatus::Reversed => {
                let reason = verification
                    .failure_reason
                    .unwrap_or_else(|| format!("{:?}", verification.status).to_lowercase());
                self.fail_withdrawal(reference, &reason).await
            }
            TransferStatus::Pending | TransferStatus::Unknown => Ok(withdrawal),
        }
    }

    // ---------------------------------------------------------------------
    // Adjustments and queries
    // ---------------------------------------------------------------------

    /// Posts a manual correction as a new offsetting entry.
    pub async fn post_adjustment(
        &self,
        user_id: Uuid,
        direction: AdjustmentDirection,
        amount: Decimal,
        description: &str,
    ) -> EscrowResult<Transaction> {
        if description.trim().is_empty() {
            return Err(EscrowError::invalid_field(
                "description",
                "adjustment description is required",
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(EscrowError::invalid_field(
                "amount",
                "amount must be greater than zero",
            ));
        }
        let transaction_type = match direction {
            AdjustmentDirection::Credit => TransactionType::WalletCredit,
            AdjustmentDirection::Debit => TransactionType::WalletDebit,
        };
        let tx = self
            .store
            .apply_ledger_entry(
                NewLedgerEntry::new(user_id, transaction_type, amount)
                    .description(description.trim()),
            )
            .await?;
        info!(
            user_id = %user_id,
            direction = ?direction,
            amount = %amount,
            reference = %tx.reference,
            "ledger adjustment posted"
        );
        self.notifier
            .publish(event_for(TransitionKind::Adjustment, &tx, &tx.reference));
        Ok(tx)
    }

    pub async fn wallet_summary(&self, user_id: Uuid) -> EscrowResult<WalletSummary> {
        Ok(WalletSummary {
            balance: self.store.wallet_balance(user_id).await?,
            transactions: self.store.transactions_for_user(user_id).await?,
        })
    }

    /// A single ledger entry, visible only to the wallet it belongs to.
    pub async fn transaction(&self, user_id: Uuid, reference: &str) -> EscrowResult<Transaction> {
        self.store
            .find_transaction_by_reference(reference)
            .await?
            .filter(|tx| tx.user_id == user_id)
            .ok_or_else(|| EscrowError::NotFound {
                entity: "transaction",
                key: reference.to_string(),
            })
    }

    pub async fn payment(&self, reference: &str) -> EscrowResult<Payment> {
        self.store
            .find_payment_by_reference(reference)
            .await?
            .ok_or_else(|| EscrowError::NotFound {
                entity: "payment",
                key: reference.to_string(),
            })
    }

    pub async fn withdrawal(&self, reference: &str) -> EscrowResult<Withdrawal> {
        self.store
            .find_withdrawal_by_reference(reference)
            .await?
            .ok_or_else(|| EscrowError::NotFound {
                entity: "withdrawal",
                key: reference.to_string(),
            })
    }

    pub async fn payment_for_target(&self, target: PaymentTarget) -> EscrowResult<Payment> {
        self.store
            .find_payment_for_target(target)
            .await?
            .ok_or_else(|| EscrowError::NotFound {
                entity: "payment",
                key: target.to_string(),
            })
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn new_payment(
        &self,
        user_id: Uuid,
        target: PaymentTarget,
        recipient_id: Option<Uuid>,
        fees: FeeBreakdown,
        reference: String,
    ) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id,
            target,
            recipient_id,
            amount: fees.amount,
            currency: self.config.currency.clone(),
            reference,
            gateway_reference: None,
            authorization_code: None,
            status: PaymentStatus::Pending,
            escrow_status: EscrowStatus::Pending,
            commission_rate: fees.commission_rate,
            platform_fee: fees.platform_fee,
            vendor_amount: fees.vendor_amount,
            failure_reason: None,
            refund_reason: None,
            refunded_by: None,
            initiated_at: now,
            paid_at: None,
            escrowed_at: None,
            released_at: None,
            refunded_at: None,
            updated_at: now,
        }
    }

    /// Persists the pending payment, then asks the gateway for a checkout
    /// exactly once. A gateway failure leaves the payment pending for the
    /// reconciler.
    async fn start_charge(
        &self,
        payment: Payment,
        email: String,
        callback_url: Option<String>,
    ) -> EscrowResult<InitializedPayment> {
        let (payment, _) = self.store.insert_payment(payment, vec![]).await?;
        info!(
            reference = %payment.reference,
            user_id = %payment.user_id,
            amount = %payment.amount,
            target = %payment.target,
            "payment initialized"
        );

        let initialization = self
            .gateway
            .initialize_charge(ChargeRequest {
                email,
                amount: payment.amount,
                currency: payment.currency.clone(),
                reference: payment.reference.clone(),
                callback_url,
                metadata: Some(serde_json::json!({
                    "payment_type": payment.target.kind(),
                    "payment_id": payment.id,
                })),
            })
            .await
            .map_err(|e| {
                warn!(
                    reference = %payment.reference,
                    error = %e,
                    "charge initialization failed, payment left pending"
                );
                EscrowError::Gateway(e)
            })?;

        Ok(InitializedPayment {
            payment,
            redirect_url: initialization.redirect_url,
            access_code: initialization.access_code,
        })
    }

    async fn payable_for(&self, payer_id: Uuid, target: PaymentTarget) -> EscrowResult<Payable> {
        let payable = self
            .store
            .find_payable(target)
            .await?
            .ok_or_else(|| EscrowError::NotFound {
                entity: target.kind(),
                key: target.to_string(),
            })?;
        if payable.payer_id != payer_id {
            return Err(EscrowError::validation(format!(
                "{} does not belong to the paying user",
                target
            )));
        }
        Ok(payable)
    }

    async fn ensure_not_paid(&self, target: PaymentTarget) -> EscrowResult<()> {
        if let Some(existing) = self.store.find_payment_for_target(target).await? {
            if existing.status.is_paid() {
                return Err(EscrowError::invalid_transition(
                    existing.reference,
                    existing.status,
                    "pay again for",
                ));
            }
        }
        Ok(())
    }

    async fn payment_transactions(&self, payment: &Payment) -> EscrowResult<Vec<Transaction>> {
        let related = Some(payment.related_entity());
        let mut transactions: Vec<Transaction> = self
            .store
            .transactions_for_user(payment.user_id)
            .await?
            .into_iter()
            .filter(|tx| tx.related == related)
            .collect();
        if let Some(recipient_id) = payment.recipient_id {
            transactions.extend(
                self.store
                    .transactions_for_user(recipient_id)
                    .await?
                    .into_iter()
                    .filter(|tx| tx.related == related),
            );
        }
        Ok(transactions)
    }

    /// Mirror writes happen after the ledger unit commits and are never rolled
    /// back with it; `resync_mirror` repairs them.
    async fn sync_mirror(&self, payment: &Payment) -> EscrowResult<()> {
        if payment.target.is_wallet_funding() {
            return Ok(());
        }
        if let Err(e) = self
            .store
            .update_payable_mirror(payment.target, PaymentMirror::from(payment))
            .await
        {
            error!(
                reference = %payment.reference,
                target = %payment.target,
                error = %e,
                "payable mirror update failed after ledger commit"
            );
            return Err(EscrowError::Storage {
                message: format!("payable mirror update failed: {}", e),
            });
        }
        Ok(())
    }

    fn publish_entries(&self, kind: TransitionKind, reference: &str, transactions: &[Transaction]) {
        self.notifier
            .publish_all(transactions.iter().map(|tx| event_for(kind, tx, reference)));
    }
}

fn event_for(kind: TransitionKind, tx: &Transaction, reference: &str) -> LedgerEvent {
    LedgerEvent::new(
        kind,
        tx.user_id,
        tx.amount,
        Some(tx.balance_after),
        reference,
    )
}

fn validate_email(email: &str) -> EscrowResult<()> {
    let email = email.trim();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(EscrowError::invalid_field("email", "a valid email is required"));
    }
    Ok(())
}

fn validate_bank_account(account: &BankAccount) -> EscrowResult<()> {
    if account.account_name.trim().is_empty() {
        return Err(EscrowError::invalid_field(
            "account_name",
            "account name is required",
        ));
    }
    if nuban::Nuban::new(&account.bank_code, &account.account_number).is_err() {
        return Err(EscrowError::invalid_field(
            "account_number",
            "Invalid NUBAN account number",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("payer@example.com").is_ok());
        assert!(validate_email("  payer@example.com ").is_ok());
        assert!(validate_email("payer").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("payer@localhost").is_err());
    }

    #[test]
    fn bank_account_requires_valid_nuban() {
        let valid = BankAccount {
            account_name: "Ada Obi".to_string(),
            account_number: "0152792740".to_string(),
            bank_code: "058".to_string(),
        };
        assert!(validate_bank_account(&valid).is_ok());

        let bad_check_digit = BankAccount {
            account_number: "0152792741".to_string(),
            ..valid.clone()
        };
        assert!(validate_bank_account(&bad_check_digit).is_err());

        let unnamed = BankAccount {
            account_name: " ".to_string(),
            ..valid
        };
        assert!(validate_bank_account(&unnamed).is_err());
    }
}
