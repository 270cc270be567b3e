use crate::payments::error::GatewayResult;
use crate::payments::types::{
    ChargeInitialization, ChargeRequest, ChargeVerification, PayoutInitiation,
    PayoutRecipientRequest, PayoutRequest, PayoutVerification, ProviderName,
};
use async_trait::async_trait;

/// Money-moving operations offered by an external payment gateway.
///
/// Each call is a single attempt. A `GatewayError` whose outcome is unknown
/// must be followed by a verify call, never by a blind retry.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_charge(&self, request: ChargeRequest)
        -> GatewayResult<ChargeInitialization>;

    async fn verify_charge(&self, reference: &str) -> GatewayResult<ChargeVerification>;

    /// Registers a bank account and returns the gateway's recipient code.
    async fn create_payout_recipient(&self, request: PayoutRecipientRequest)
        -> GatewayResult<String>;

    async fn initiate_payout(&self, request: PayoutRequest) -> GatewayResult<PayoutInitiation>;

    async fn verify_payout(&self, reference: &str) -> GatewayResult<PayoutVerification>;

    /// Checks the signature header against the raw request body.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool;

    fn name(&self) -> ProviderName;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{ChargeStatus, TransferStatus};
    use rust_decimal_macros::dec;

    struct StaticGateway;

    #[async_trait]
    impl PaymentGateway for StaticGateway {
        async fn initialize_charge(
            &self,
            request: ChargeRequest,
        ) -> GatewayResult<ChargeInitialization> {
            Ok(ChargeInitialization {
                redirect_url: format!("https://checkout.test/{}", request.reference),
                access_code: "access_1".to_string(),
                gateway_reference: request.reference,
            })
        }

        async fn verify_charge(&self, reference: &str) -> GatewayResult<ChargeVerification> {
            Ok(ChargeVerification::successful(reference, dec!(1000)))
        }

        async fn create_payout_recipient(
            &self,
            _request: PayoutRecipientRequest,
        ) -> GatewayResult<String> {
            Ok("RCP_static".to_string())
        }

        async fn initiate_payout(&self, _request: PayoutRequest) -> GatewayResult<PayoutInitiation> {
            Ok(PayoutInitiation {
                transfer_code: "TRF_static".to_string(),
                status: TransferStatus::Pending,
            })
        }

        async fn verify_payout(&self, reference: &str) -> GatewayResult<PayoutVerification> {
            Ok(PayoutVerification {
                status: TransferStatus::Success,
                reference: reference.to_string(),
                transfer_code: Some("TRF_static".to_string()),
                failure_reason: None,
            })
        }

        fn verify_webhook(&self, _payload: &[u8], signature: &str) -> bool {
            signature == "ok"
        }

        fn name(&self) -> ProviderName {
            ProviderName::Paystack
        }
    }

    #[tokio::test]
    async fn trait_objects_dispatch_to_implementation() {
        let gateway: Box<dyn PaymentGateway> = Box::new(StaticGateway);
        let init = gateway
            .initialize_charge(ChargeRequest {
                email: "payer@example.com".to_string(),
                amount: dec!(1000),
                currency: "NGN".to_string(),
                reference: "ORDER-PAY-1-abcdefgh".to_string(),
                callback_url: None,
                metadata: None,
            })
            .await
            .expect("initialization should succeed");
        assert_eq!(init.gateway_reference, "ORDER-PAY-1-abcdefgh");

        let verification = gateway
            .verify_charge("ORDER-PAY-1-abcdefgh")
            .await
            .expect("verification should succeed");
        assert_eq!(verification.status, ChargeStatus::Success);
        assert!(gateway.verify_webhook(b"{}", "ok"));
        assert!(!gateway.verify_webhook(b"{}", "nope"));
    }
}
