use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds for user {user_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user_id: Uuid,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("duplicate reference: {reference}")]
    DuplicateReference { reference: String },

    /// A booking or order already has a paid payment.
    #[error("{target} already paid by {reference} ({status})")]
    AlreadyPaid {
        target: String,
        reference: String,
        status: String,
    },

    #[error("ledger amounts must be positive, got {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("invalid payable association: {message}")]
    InvalidAssociation { message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    /// Maps a driver error, surfacing unique violations as `DuplicateReference`.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return LedgerError::DuplicateReference {
                    reference: db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| db_err.message().to_string()),
                };
            }
        }
        LedgerError::Storage {
            message: err.to_string(),
        }
    }
}
