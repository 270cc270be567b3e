//! Payment and withdrawal state machines.
//!
//! ```text
//! Payment:    pending ──confirm──► completed (held) ──release──► released
//!                │                        └──────────refund───► refunded
//!                ├──wallet funding confirm────────────────────► released
//!                └──fail──► failed
//!
//! Withdrawal: pending ──approve──► processing ──payout ok──────► completed
//!                │                      └──payout failed──────► failed
//!                └──reject──► rejected
//! ```

use crate::ledger::models::{EscrowStatus, PaymentStatus, WithdrawalStatus};

impl PaymentStatus {
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Completed,
                PaymentStatus::Released,
                PaymentStatus::Failed,
            ],
            PaymentStatus::Completed => &[PaymentStatus::Released, PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Released | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Escrow status implied by this payment status.
    pub fn escrow_status(&self) -> EscrowStatus {
        match self {
            PaymentStatus::Pending | PaymentStatus::Failed => EscrowStatus::Pending,
            PaymentStatus::Completed => EscrowStatus::Held,
            PaymentStatus::Released => EscrowStatus::Released,
            PaymentStatus::Refunded => EscrowStatus::Refunded,
        }
    }

    /// Whether gateway funds have been received for this payment.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Released | PaymentStatus::Refunded
        )
    }
}

impl EscrowStatus {
    fn rank(&self) -> u8 {
        match self {
            EscrowStatus::Pending => 0,
            EscrowStatus::Held => 1,
            EscrowStatus::Released | EscrowStatus::Refunded => 2,
        }
    }

    /// Escrow only moves forward, and released/refunded exclude each other.
    pub fn can_advance_to(&self, next: EscrowStatus) -> bool {
        match (self, next) {
            (EscrowStatus::Released, EscrowStatus::Refunded)
            | (EscrowStatus::Refunded, EscrowStatus::Released) => false,
            _ => next.rank() >= self.rank(),
        }
    }
}

impl WithdrawalStatus {
    pub fn valid_transitions(&self) -> &'static [WithdrawalStatus] {
        match self {
            WithdrawalStatus::Pending => {
                &[WithdrawalStatus::Processing, WithdrawalStatus::Rejected]
            }
            WithdrawalStatus::Processing => {
                &[WithdrawalStatus::Completed, WithdrawalStatus::Failed]
            }
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Rejected => {
                &[]
            }
        }
    }

    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}
