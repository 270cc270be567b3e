//! Wallet balances, immutable ledger entries, payments and withdrawals.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod reference;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use memory::InMemoryLedgerStore;
pub use models::*;
pub use postgres::PgLedgerStore;
pub use reference::{classify_reference, generate_reference, ReferenceKind};
pub use store::{LedgerStore, PaymentUpdate, TransitionOutcome, WithdrawalUpdate};
