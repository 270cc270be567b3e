use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    from_minor_units, to_minor_units, ChargeInitialization, ChargeRequest, ChargeStatus,
    ChargeVerification, PayoutInitiation, PayoutRecipientRequest, PayoutRequest,
    PayoutVerification, ProviderName, TransferStatus,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| GatewayError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            secret_key,
        })
    }

    /// Webhooks are signed with the secret key unless a dedicated secret is set.
    pub fn signing_secret(&self) -> &str {
        self.webhook_secret.as_deref().unwrap_or(&self.secret_key)
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> GatewayResult<Self> {
        let http = PaymentHttpClient::new("paystack", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn ensure_reference(reference: &str) -> GatewayResult<&str> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        Ok(trimmed)
    }

    fn unwrap_envelope<T>(raw: PaystackEnvelope<T>) -> GatewayResult<T> {
        if !raw.status {
            return Err(GatewayError::ProviderError {
                provider: "paystack".to_string(),
                message: raw.message,
                provider_code: None,
                retryable: false,
            });
        }
        raw.data.ok_or(GatewayError::InvalidResponse {
            message: "paystack response is missing data".to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_charge(
        &self,
        request: ChargeRequest,
    ) -> GatewayResult<ChargeInitialization> {
        if request.email.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "email is required for paystack initialization".to_string(),
                field: Some("email".to_string()),
            });
        }
        let amount_kobo = to_minor_units(request.amount)?;

        let payload = serde_json::json!({
            "email": request.email,
            "amount": amount_kobo,
            "currency": request.currency,
            "reference": request.reference,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = Self::unwrap_envelope(raw)?;
        info!(reference = %data.reference, "paystack charge initialized");

        Ok(ChargeInitialization {
            redirect_url: data.authorization_url,
            access_code: data.access_code,
            gateway_reference: data.reference,
        })
    }

    async fn verify_charge(&self, reference: &str) -> GatewayResult<ChargeVerification> {
        let reference = Self::ensure_reference(reference)?;
        let raw: PaystackEnvelope<PaystackChargeData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                &self.config.secret_key,
                None,
            )
            .await?;
        Ok(Self::unwrap_envelope(raw)?.into_verification())
    }

    async fn create_payout_recipient(
        &self,
        request: PayoutRecipientRequest,
    ) -> GatewayResult<String> {
        let payload = serde_json::json!({
            "type": "nuban",
            "name": request.account_name,
            "account_number": request.account_number,
            "bank_code": request.bank_code,
            "currency": request.currency,
        });

        let raw: PaystackEnvelope<PaystackRecipientData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transferrecipient"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        Ok(Self::unwrap_envelope(raw)?.recipient_code)
    }

    async fn initiate_payout(&self, request: PayoutRequest) -> GatewayResult<PayoutInitiation> {
        let amount_kobo = to_minor_units(request.amount)?;
        let payload = serde_json::json!({
            "source": "balance",
            "amount": amount_kobo,
            "recipient": request.recipient_code,
            "reference": request.reference,
            "reason": request.reason,
        });

        let raw: PaystackEnvelope<PaystackTransferData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transfer"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = Self::unwrap_envelope(raw)?;
        info!(
            reference = %request.reference,
            transfer_code = %data.transfer_code,
            status = %data.status,
            "paystack payout initiated"
        );

        Ok(PayoutInitiation {
            transfer_code: data.transfer_code,
            status: TransferStatus::from_gateway(&data.status),
        })
    }

    async fn verify_payout(&self, reference: &str) -> GatewayResult<PayoutVerification> {
        let reference = Self::ensure_reference(reference)?;
        let raw: PaystackEnvelope<PaystackTransferData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transfer/verify/{}", reference)),
                &self.config.secret_key,
                None,
            )
            .await?;
        let data = Self::unwrap_envelope(raw)?;

        Ok(PayoutVerification {
            status: TransferStatus::from_gateway(&data.status),
            reference: data.reference.unwrap_or_else(|| reference.to_string()),
            transfer_code: Some(data.transfer_code),
            failure_reason: data.failure_reason,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha512_hex(payload, self.config.signing_secret(), signature)
    }

    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    #[serde(default = "Option::default")]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaystackAuthorization {
    #[serde(default)]
    pub authorization_code: Option<String>,
}

/// Charge object shared by the verify endpoint and `charge.*` webhooks.
#[derive(Debug, Clone, Deserialize)]
pub struct PaystackChargeData {
    pub reference: String,
    pub status: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<String>,
    #[serde(default)]
    pub authorization: Option<PaystackAuthorization>,
}

impl PaystackChargeData {
    pub fn into_verification(self) -> ChargeVerification {
        ChargeVerification {
            status: ChargeStatus::from_gateway(&self.status),
            gateway_reference: self.id.map(|id| id.to_string()),
            authorization_code: self.authorization.and_then(|a| a.authorization_code),
            amount: self.amount.map(from_minor_units),
            paid_at: self.paid_at,
            gateway_response: self.gateway_response,
            reference: self.reference,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaystackRecipientData {
    recipient_code: String,
}

/// Transfer object shared by the transfer endpoints and `transfer.*` webhooks.
#[derive(Debug, Clone, Deserialize)]
pub struct PaystackTransferData {
    pub transfer_code: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default, alias = "reason_for_failure")]
    pub failure_reason: Option<String>,
}
