use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::escrow::{EscrowEngine, EscrowError};
use crate::ledger::{classify_reference, ReferenceKind};
use crate::payments::providers::paystack::{PaystackChargeData, PaystackTransferData};
use crate::payments::types::ChargeVerification;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Processing error: {0}")]
    Processing(#[from] EscrowError),
}

/// Gateway events this service acts on, decoded from the `event` tag.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ChargeSuccess(ChargeVerification),
    ChargeFailed(ChargeVerification),
    TransferSuccess(PaystackTransferData),
    TransferFailed(PaystackTransferData),
    TransferReversed(PaystackTransferData),
    Unknown(String),
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::ChargeSuccess(_) => "charge.success",
            GatewayEvent::ChargeFailed(_) => "charge.failed",
            GatewayEvent::TransferSuccess(_) => "transfer.success",
            GatewayEvent::TransferFailed(_) => "transfer.failed",
            GatewayEvent::TransferReversed(_) => "transfer.reversed",
            GatewayEvent::Unknown(event) => event,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WebhookError> {
        #[derive(Deserialize)]
        struct RawEvent {
            event: String,
            #[serde(default)]
            data: JsonValue,
        }

        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let charge = |data: JsonValue| {
            serde_json::from_value::<PaystackChargeData>(data)
                .map(PaystackChargeData::into_verification)
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))
        };
        let transfer = |data: JsonValue| {
            serde_json::from_value::<PaystackTransferData>(data)
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))
        };

        Ok(match raw.event.as_str() {
            "charge.success" => GatewayEvent::ChargeSuccess(charge(raw.data)?),
            "charge.failed" => GatewayEvent::ChargeFailed(charge(raw.data)?),
            "transfer.success" => GatewayEvent::TransferSuccess(transfer(raw.data)?),
            "transfer.failed" => GatewayEvent::TransferFailed(transfer(raw.data)?),
            "transfer.reversed" => GatewayEvent::TransferReversed(transfer(raw.data)?),
            _ => GatewayEvent::Unknown(raw.event),
        })
    }
}

/// What happened to an authentic webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { event_type: String, reference: String },
    Ignored { event_type: String, reason: String },
}

pub struct WebhookProcessor {
    engine: Arc<EscrowEngine>,
}

impl WebhookProcessor {
    pub fn new(engine: Arc<EscrowEngine>) -> Self {
        Self { engine }
    }

    /// Authenticates the raw body, decodes it and routes it to the engine.
    /// Nothing is parsed before the signature checks out.
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let signature = signature.ok_or(WebhookError::InvalidSignature)?;
        if !self.engine.gateway().verify_webhook(raw_body, signature) {
            warn!(
                provider = %self.engine.gateway().name(),
                "webhook signature rejected"
            );
            return Err(WebhookError::InvalidSignature);
        }

        let event = GatewayEvent::decode(raw_body)?;
        let event_type = event.event_type().to_string();
        info!(event_type = %event_type, "processing gateway webhook");
        self.dispatch(event).await
    }

    async fn dispatch(&self, event: GatewayEvent) -> Result<WebhookOutcome, WebhookError> {
        let event_type = event.event_type().to_string();
        match event {
            GatewayEvent::ChargeSuccess(verification) => {
                let reference = verification.reference.clone();
                if !classify_reference(&reference).is_payment() {
                    return Ok(ignored(event_type, &reference));
                }
                if self.engine.config().verify_webhook_charges {
                    // Trust the verify endpoint over the webhook body.
                    let verified = self
                        .engine
                        .gateway()
                        .verify_charge(&reference)
                        .await
                        .map_err(EscrowError::Gateway)?;
                    self.engine.reconcile_charge(&reference, verified).await?;
                } else {
                    self.engine.confirm_charge(&reference, verification).await?;
                }
                Ok(WebhookOutcome::Applied {
                    event_type,
                    reference,
                })
            }
            GatewayEvent::ChargeFailed(verification) => {
                let reference = verification.reference.clone();
                if !classify_reference(&reference).is_payment() {
                    return Ok(ignored(event_type, &reference));
                }
                let reason = verification
                    .gateway_response
                    .unwrap_or_else(|| "charge failed".to_string());
                self.engine.fail_charge(&reference, &reason).await?;
                Ok(WebhookOutcome::Applied {
                    event_type,
                    reference,
                })
            }
            GatewayEvent::TransferSuccess(transfer) => {
                let Some(reference) = withdrawal_reference(&transfer) else {
                    return Ok(ignored(event_type, transfer.reference.as_deref().unwrap_or("")));
                };
                self.engine
                    .complete_withdrawal(&reference, Some(transfer.transfer_code))
                    .await?;
                Ok(WebhookOutcome::Applied {
                    event_type,
                    reference,
                })
            }
            GatewayEvent::TransferFailed(transfer) | GatewayEvent::TransferReversed(transfer) => {
                let Some(reference) = withdrawal_reference(&transfer) else {
                    return Ok(ignored(event_type, transfer.reference.as_deref().unwrap_or("")));
                };
                let reason = transfer
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| event_type.replace('.', " "));
                self.engine.fail_withdrawal(&reference, &reason).await?;
                Ok(WebhookOutcome::Applied {
                    event_type,
                    reference,
                })
            }
            GatewayEvent::Unknown(event) => {
                info!(event_type = %event, "ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored {
                    event_type: event,
                    reason: "unhandled event type".to_string(),
                })
            }
        }
    }
}

fn withdrawal_reference(transfer: &PaystackTransferData) -> Option<String> {
    transfer
        .reference
        .as_deref()
        .filter(|r| classify_reference(r) == ReferenceKind::Withdrawal)
        .map(str::to_string)
}

fn ignored(event_type: String, reference: &str) -> WebhookOutcome {
    warn!(
        event_type = %event_type,
        reference = %reference,
        "webhook reference does not match any known record kind"
    );
    WebhookOutcome::Ignored {
        event_type,
        reason: format!("unrecognized reference '{}'", reference),
    }
}

/// Logs a processing failure with everything needed to replay it by hand.
pub fn log_failure(err: &WebhookError, raw_body: &[u8]) {
    error!(
        error = %err,
        payload = %String::from_utf8_lossy(raw_body),
        "webhook processing failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::ChargeStatus;

    #[test]
    fn decodes_charge_success_in_naira() {
        let body = br#"{
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "ORDER-PAY-1700000000000-ab12cd34",
                "status": "success",
                "amount": 1000000,
                "authorization": {"authorization_code": "AUTH_8dfhjjdt"}
            }
        }"#;
        match GatewayEvent::decode(body).unwrap() {
            GatewayEvent::ChargeSuccess(v) => {
                assert_eq!(v.status, ChargeStatus::Success);
                assert_eq!(v.reference, "ORDER-PAY-1700000000000-ab12cd34");
                assert_eq!(v.amount, Some(rust_decimal::Decimal::from(10000)));
                assert_eq!(v.gateway_reference.as_deref(), Some("302961"));
                assert_eq!(v.authorization_code.as_deref(), Some("AUTH_8dfhjjdt"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn decodes_transfer_events() {
        let body = br#"{
            "event": "transfer.reversed",
            "data": {"transfer_code": "TRF_1", "status": "reversed", "reference": "WITHDRAW-1-abcdef12"}
        }"#;
        let event = GatewayEvent::decode(body).unwrap();
        assert_eq!(event.event_type(), "transfer.reversed");
        match event {
            GatewayEvent::TransferReversed(t) => {
                assert_eq!(withdrawal_reference(&t).as_deref(), Some("WITHDRAW-1-abcdef12"))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_events_keep_their_name() {
        let event = GatewayEvent::decode(br#"{"event":"subscription.create","data":{}}"#).unwrap();
        assert!(matches!(event, GatewayEvent::Unknown(ref e) if e == "subscription.create"));
    }

    #[test]
    fn malformed_payloads_are_reported() {
        assert!(matches!(
            GatewayEvent::decode(b"not json"),
            Err(WebhookError::MalformedPayload(_))
        ));
        assert!(matches!(
            GatewayEvent::decode(br#"{"event":"charge.success","data":{"status":"success"}}"#),
            Err(WebhookError::MalformedPayload(_))
        ));
    }

    #[test]
    fn transfer_without_withdrawal_reference_is_not_routed() {
        let transfer = PaystackTransferData {
            transfer_code: "TRF_2".to_string(),
            status: "success".to_string(),
            reference: Some("ORDER-PAY-1-abcdef12".to_string()),
            failure_reason: None,
        };
        assert!(withdrawal_reference(&transfer).is_none());
    }
}
