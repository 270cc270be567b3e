use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure of a call to the external payment gateway.
///
/// Every variant except `ValidationError` leaves the outcome of a money-moving
/// call unknown; callers re-verify instead of assuming failure.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway timeout after {timeout_secs}s")]
    TimeoutError { timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::TimeoutError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::InvalidResponse { .. } => false,
            GatewayError::WebhookVerificationError { .. } => false,
            GatewayError::ProviderError { retryable, .. } => *retryable,
        }
    }

    /// True when the gateway may or may not have acted on the request.
    pub fn is_outcome_unknown(&self) -> bool {
        !matches!(
            self,
            GatewayError::ValidationError { .. } | GatewayError::WebhookVerificationError { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::NetworkError { .. } => 503,
            GatewayError::TimeoutError { .. } => 504,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::InvalidResponse { .. } => 502,
            GatewayError::WebhookVerificationError { .. } => 401,
            GatewayError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::NetworkError { .. } | GatewayError::TimeoutError { .. } => {
                "Payment gateway is temporarily unavailable. Please verify the payment later"
                    .to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            GatewayError::InvalidResponse { .. } => {
                "Payment gateway returned an unexpected response".to_string()
            }
            GatewayError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            GatewayError::ProviderError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}
