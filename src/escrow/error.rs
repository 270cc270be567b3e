use crate::ledger::LedgerError;
use crate::payments::GatewayError;
use rust_decimal::Decimal;
use thiserror::Error;

pub type EscrowResult<T> = Result<T, EscrowError>;

/// Failures of escrow operations. Every variant except `Gateway` and `Storage`
/// guarantees that nothing was written.
#[derive(Debug, Clone, Error)]
pub enum EscrowError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("cannot {action} {reference}: current status is {current}")]
    InvalidTransition {
        reference: String,
        current: String,
        action: &'static str,
    },

    #[error("duplicate reference: {reference}")]
    DuplicateReference { reference: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Outcome at the gateway is unknown unless the error says otherwise.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl EscrowError {
    pub fn validation(message: impl Into<String>) -> Self {
        EscrowError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        EscrowError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn invalid_transition(
        reference: impl Into<String>,
        current: impl ToString,
        action: &'static str,
    ) -> Self {
        EscrowError::InvalidTransition {
            reference: reference.into(),
            current: current.to_string(),
            action,
        }
    }
}

impl From<LedgerError> for EscrowError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                balance, requested, ..
            } => EscrowError::InsufficientFunds { balance, requested },
            LedgerError::DuplicateReference { reference } => {
                EscrowError::DuplicateReference { reference }
            }
            LedgerError::AlreadyPaid {
                reference, status, ..
            } => EscrowError::InvalidTransition {
                reference,
                current: status,
                action: "pay again for",
            },
            LedgerError::InvalidAmount { amount } => EscrowError::Validation {
                message: format!("amount must be greater than zero, got {}", amount),
                field: Some("amount".to_string()),
            },
            LedgerError::InvalidAssociation { message } => EscrowError::Validation {
                message,
                field: None,
            },
            LedgerError::NotFound { entity, key } => EscrowError::NotFound { entity, key },
            LedgerError::Storage { message } => EscrowError::Storage { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn ledger_errors_map_to_escrow_taxonomy() {
        let err: EscrowError = LedgerError::InsufficientFunds {
            user_id: Uuid::new_v4(),
            balance: dec!(10),
            requested: dec!(20),
        }
        .into();
        assert!(matches!(err, EscrowError::InsufficientFunds { .. }));

        let err: EscrowError = LedgerError::InvalidAssociation {
            message: "both".to_string(),
        }
        .into();
        assert!(matches!(err, EscrowError::Validation { .. }));

        let err: EscrowError = LedgerError::AlreadyPaid {
            target: "order 1".to_string(),
            reference: "WALLET-PAY-1-abcd1234".to_string(),
            status: "completed".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            EscrowError::InvalidTransition { ref current, .. } if current == "completed"
        ));
    }

    #[test]
    fn invalid_transition_message_names_action() {
        let err = EscrowError::invalid_transition("ORDER-PAY-1-abc", "released", "refund");
        assert_eq!(
            err.to_string(),
            "cannot refund ORDER-PAY-1-abc: current status is released"
        );
    }
}
