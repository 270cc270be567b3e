//! Error handling at the HTTP boundary.
//!
//! Engine errors are mapped onto a single `AppError` with an HTTP status,
//! a stable error code for clients and a user-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::escrow::EscrowError;
use crate::payments::GatewayError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PAYMENT_PROVIDER_UNAVAILABLE")]
    PaymentProviderUnavailable,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    InsufficientFunds { available: String, required: String },
    /// The record is in a state that does not allow the requested action
    InvalidTransition {
        reference: String,
        current: String,
        action: String,
    },
    DuplicateReference { reference: String },
    NotFound { entity: String, key: String },
    /// Caller identity missing or not allowed
    Unauthorized { reason: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway failures. The outcome of the call is unknown unless the
/// gateway rejected the request outright.
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Unavailable {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
    InvalidRequest { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidRequest {
            reason: reason.into(),
        }))
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Unauthorized {
            reason: reason.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => 422,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::DuplicateReference { .. } => 409,
                DomainError::NotFound { .. } => 404,
                DomainError::Unauthorized { .. } => 401,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::Unavailable { .. } => 503,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::Unauthorized { .. } => ErrorCode::Unauthorized,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Unavailable { .. } => ErrorCode::PaymentProviderUnavailable,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds {
                    available,
                    required,
                } => format!(
                    "Insufficient wallet balance. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::InvalidTransition {
                    reference,
                    current,
                    action,
                } => format!("Cannot {} '{}' while it is {}", action, reference, current),
                DomainError::DuplicateReference { reference } => {
                    format!("Reference '{}' already exists", reference)
                }
                DomainError::NotFound { entity, key } => {
                    format!("{} '{}' not found", capitalize(entity), key)
                }
                DomainError::Unauthorized { reason } => reason.clone(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try verifying later",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Unavailable {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "{} is unavailable. Please try verifying again in {} seconds",
                        service, secs
                    ),
                    None => format!("{} is unavailable. Please try verifying later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} did not answer within {} seconds. The outcome is unknown, please try verifying later",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidRequest { reason } => reason.clone(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Unavailable { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let service = "Payment gateway".to_string();
        let kind = match err {
            GatewayError::ValidationError { message, field } => match field {
                Some(field) => AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason: message,
                }),
                None => AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "paystack".to_string(),
                    message,
                    is_retryable: false,
                }),
            },
            GatewayError::TimeoutError { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service,
                    timeout_secs,
                })
            }
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::Unavailable {
                service,
                retry_after: retry_after_seconds,
            }),
            GatewayError::NetworkError { .. } => AppErrorKind::External(ExternalError::Unavailable {
                service,
                retry_after: None,
            }),
            GatewayError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message,
                is_retryable: retryable,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "paystack".to_string(),
                message: other.to_string(),
                is_retryable: false,
            }),
        };
        AppError::new(kind)
    }
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        let kind = match err {
            EscrowError::Validation { message, field } => match field {
                Some(field) => AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason: message,
                }),
                None => AppErrorKind::Validation(ValidationError::InvalidRequest { reason: message }),
            },
            EscrowError::InsufficientFunds { balance, requested } => {
                AppErrorKind::Domain(DomainError::InsufficientFunds {
                    available: balance.to_string(),
                    required: requested.to_string(),
                })
            }
            EscrowError::InvalidTransition {
                reference,
                current,
                action,
            } => AppErrorKind::Domain(DomainError::InvalidTransition {
                reference,
                current,
                action: action.to_string(),
            }),
            EscrowError::DuplicateReference { reference } => {
                AppErrorKind::Domain(DomainError::DuplicateReference { reference })
            }
            EscrowError::NotFound { entity, key } => AppErrorKind::Domain(DomainError::NotFound {
                entity: entity.to_string(),
                key,
            }),
            EscrowError::Gateway(err) => return AppError::from(err),
            EscrowError::Storage { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_error() {
        let error: AppError = EscrowError::InsufficientFunds {
            balance: dec!(50),
            requested: dec!(100),
        }
        .into();

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(error.user_message().contains("Insufficient wallet balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let error: AppError =
            EscrowError::invalid_transition("BOOKING-PAY-1-abc", "refunded", "release").into();
        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InvalidTransition);
        assert!(error.user_message().contains("release"));
    }

    #[test]
    fn test_not_found_error() {
        let error: AppError = EscrowError::NotFound {
            entity: "payment",
            key: "ORDER-PAY-1-abc".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.user_message(), "Payment 'ORDER-PAY-1-abc' not found");
    }

    #[test]
    fn test_gateway_errors_map_to_5xx() {
        let timeout: AppError =
            EscrowError::Gateway(GatewayError::TimeoutError { timeout_secs: 30 }).into();
        assert_eq!(timeout.status_code(), 504);
        assert!(timeout.is_retryable());
        assert!(timeout.user_message().contains("verifying later"));

        let limited: AppError = EscrowError::Gateway(GatewayError::RateLimitError {
            message: "slow down".to_string(),
            retry_after_seconds: Some(30),
        })
        .into();
        assert_eq!(limited.status_code(), 503);

        let upstream: AppError = EscrowError::Gateway(GatewayError::ProviderError {
            provider: "paystack".to_string(),
            message: "boom".to_string(),
            provider_code: None,
            retryable: true,
        })
        .into();
        assert_eq!(upstream.status_code(), 502);
    }

    #[test]
    fn test_validation_error() {
        let error: AppError = EscrowError::invalid_field("amount", "must be positive").into();

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_storage_error_is_internal() {
        let error: AppError = EscrowError::Storage {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::DatabaseError);
    }
}
