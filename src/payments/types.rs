use crate::payments::error::GatewayError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Paystack,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Paystack => "paystack",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Converts a major-unit amount (Naira) to the gateway's minor units (kobo).
pub fn to_minor_units(amount: Decimal) -> Result<u64, GatewayError> {
    let scaled = (amount * Decimal::ONE_HUNDRED).round_dp(0);
    if scaled <= Decimal::ZERO {
        return Err(GatewayError::ValidationError {
            message: "amount must be greater than zero".to_string(),
            field: Some("amount".to_string()),
        });
    }
    scaled.to_u64().ok_or(GatewayError::ValidationError {
        message: format!("amount out of range: {}", amount),
        field: Some("amount".to_string()),
    })
}

/// Converts gateway minor units (kobo) back to major units.
pub fn from_minor_units(minor: u64) -> Decimal {
    Decimal::from(minor) / Decimal::ONE_HUNDRED
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Pending,
    Failed,
    Abandoned,
    Reversed,
    Unknown,
}

impl ChargeStatus {
    pub fn from_gateway(value: &str) -> Self {
        match value {
            "success" => ChargeStatus::Success,
            "pending" | "ongoing" | "processing" | "queued" => ChargeStatus::Pending,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            "reversed" => ChargeStatus::Reversed,
            _ => ChargeStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Pending,
    Failed,
    Reversed,
    Unknown,
}

impl TransferStatus {
    pub fn from_gateway(value: &str) -> Self {
        match value {
            "success" => TransferStatus::Success,
            "pending" | "otp" | "processing" | "received" => TransferStatus::Pending,
            "failed" | "abandoned" | "blocked" | "rejected" => TransferStatus::Failed,
            "reversed" => TransferStatus::Reversed,
            _ => TransferStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub email: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeInitialization {
    pub redirect_url: String,
    pub access_code: String,
    pub gateway_reference: String,
}

/// Outcome of a charge as reported by the gateway, through either the verify
/// endpoint or a webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub reference: String,
    pub gateway_reference: Option<String>,
    pub authorization_code: Option<String>,
    pub amount: Option<Decimal>,
    pub paid_at: Option<String>,
    pub gateway_response: Option<String>,
}

impl ChargeVerification {
    pub fn successful(reference: impl Into<String>, amount: Decimal) -> Self {
        Self {
            status: ChargeStatus::Success,
            reference: reference.into(),
            gateway_reference: None,
            authorization_code: None,
            amount: Some(amount),
            paid_at: None,
            gateway_response: Some("Successful".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecipientRequest {
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub recipient_code: String,
    pub reference: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutInitiation {
    pub transfer_code: String,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutVerification {
    pub status: TransferStatus,
    pub reference: String,
    pub transfer_code: Option<String>,
    pub failure_reason: Option<String>,
}
