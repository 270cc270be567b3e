//! Escrow orchestration on top of the ledger store and the payment gateway.

pub mod engine;
pub mod error;
pub mod fees;
pub mod state;

pub use engine::{
    AdjustmentDirection, EscrowEngine, InitializePayment, InitializedPayment, PaymentReport,
    WalletSummary,
};
pub use error::{EscrowError, EscrowResult};
pub use fees::{FeeBreakdown, WithdrawalCharge};
