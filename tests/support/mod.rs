#![allow(dead_code)]

use async_trait::async_trait;
use escrow_ledger::config::EscrowConfig;
use escrow_ledger::escrow::{EscrowEngine, InitializePayment};
use escrow_ledger::ledger::{
    InMemoryLedgerStore, LedgerStore, NewLedgerEntry, Payable, Payment, PaymentTarget,
    TransactionType,
};
use escrow_ledger::payments::types::{
    ChargeInitialization, ChargeRequest, ChargeStatus, ChargeVerification, PayoutInitiation,
    PayoutRecipientRequest, PayoutRequest, PayoutVerification, ProviderName, TransferStatus,
};
use escrow_ledger::payments::utils::{sign_hmac_sha512_hex, verify_hmac_sha512_hex};
use escrow_ledger::payments::{GatewayError, GatewayResult, PaymentGateway};
use escrow_ledger::services::notification::{
    LedgerEvent, NotificationError, NotificationSink, Notifier,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn sign(payload: &[u8]) -> String {
    sign_hmac_sha512_hex(payload, WEBHOOK_SECRET)
}

/// Gateway double whose answers are scripted per reference.
#[derive(Default)]
pub struct MockGateway {
    charges: Mutex<HashMap<String, GatewayResult<ChargeVerification>>>,
    payouts: Mutex<HashMap<String, GatewayResult<PayoutVerification>>>,
    initialize_error: Mutex<Option<GatewayError>>,
    initiate_payout_result: Mutex<Option<GatewayResult<PayoutInitiation>>>,
    recipient_error: Mutex<Option<GatewayError>>,
    pub initialize_calls: AtomicUsize,
    pub verify_charge_calls: AtomicUsize,
    pub recipient_calls: AtomicUsize,
    pub initiate_payout_calls: AtomicUsize,
    pub verify_payout_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_charge(&self, reference: &str, result: GatewayResult<ChargeVerification>) {
        self.charges
            .lock()
            .unwrap()
            .insert(reference.to_string(), result);
    }

    pub fn script_payout(&self, reference: &str, result: GatewayResult<PayoutVerification>) {
        self.payouts
            .lock()
            .unwrap()
            .insert(reference.to_string(), result);
    }

    pub fn fail_initialize(&self, error: GatewayError) {
        *self.initialize_error.lock().unwrap() = Some(error);
    }

    pub fn script_initiate_payout(&self, result: GatewayResult<PayoutInitiation>) {
        *self.initiate_payout_result.lock().unwrap() = Some(result);
    }

    pub fn fail_recipient(&self, error: GatewayError) {
        *self.recipient_error.lock().unwrap() = Some(error);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn timeout_error() -> GatewayError {
    GatewayError::TimeoutError { timeout_secs: 30 }
}

pub fn payout_verification(reference: &str, status: TransferStatus) -> PayoutVerification {
    PayoutVerification {
        status,
        reference: reference.to_string(),
        transfer_code: Some("TRF_test".to_string()),
        failure_reason: match status {
            TransferStatus::Failed => Some("Account closed".to_string()),
            _ => None,
        },
    }
}

pub fn charge_with_status(reference: &str, status: ChargeStatus, amount: Decimal) -> ChargeVerification {
    ChargeVerification {
        status,
        gateway_response: Some(format!("{:?}", status)),
        ..ChargeVerification::successful(reference, amount)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeInitialization> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.initialize_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ChargeInitialization {
            redirect_url: format!("https://checkout.paystack.test/{}", request.reference),
            access_code: format!("access_{}", request.reference),
            gateway_reference: request.reference,
        })
    }

    async fn verify_charge(&self, reference: &str) -> GatewayResult<ChargeVerification> {
        self.verify_charge_calls.fetch_add(1, Ordering::SeqCst);
        self.charges
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| {
                Ok(ChargeVerification {
                    status: ChargeStatus::Pending,
                    amount: None,
                    ..ChargeVerification::successful(reference, Decimal::ZERO)
                })
            })
    }

    async fn create_payout_recipient(&self, request: PayoutRecipientRequest) -> GatewayResult<String> {
        self.recipient_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.recipient_error.lock().unwrap().clone() {
            return Err(error);
        }
        // Widens the window between approval and initiation for race tests.
        tokio::task::yield_now().await;
        Ok(format!("RCP_{}", request.account_number))
    }

    async fn initiate_payout(&self, _request: PayoutRequest) -> GatewayResult<PayoutInitiation> {
        self.initiate_payout_calls.fetch_add(1, Ordering::SeqCst);
        self.initiate_payout_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| {
                Ok(PayoutInitiation {
                    transfer_code: "TRF_test".to_string(),
                    status: TransferStatus::Pending,
                })
            })
    }

    async fn verify_payout(&self, reference: &str) -> GatewayResult<PayoutVerification> {
        self.verify_payout_calls.fetch_add(1, Ordering::SeqCst);
        self.payouts
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| Ok(payout_verification(reference, TransferStatus::Pending)))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha512_hex(payload, WEBHOOK_SECRET, signature)
    }

    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }
}

/// Keeps every delivered event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Notifications are dispatched on spawned tasks; wait until `count` arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<LedgerEvent> {
        for _ in 0..100 {
            if self.events.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.events()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: LedgerEvent) -> Result<(), NotificationError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Always fails delivery.
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify(&self, _event: LedgerEvent) -> Result<(), NotificationError> {
        Err(NotificationError::Delivery("sink offline".to_string()))
    }
}

pub struct Harness {
    pub engine: Arc<EscrowEngine>,
    pub store: Arc<InMemoryLedgerStore>,
    pub gateway: Arc<MockGateway>,
    pub sink: Arc<RecordingSink>,
    pub platform_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut EscrowConfig)) -> Self {
        let platform_id = Uuid::new_v4();
        let mut config = EscrowConfig {
            platform_account_id: platform_id,
            ..EscrowConfig::default()
        };
        customize(&mut config);

        let store = Arc::new(InMemoryLedgerStore::new());
        let gateway = Arc::new(MockGateway::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(EscrowEngine::new(
            store.clone(),
            gateway.clone(),
            Notifier::new(sink.clone()),
            config,
        ));
        Self {
            engine,
            store,
            gateway,
            sink,
            platform_id,
        }
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        let harness = Self::new();
        let engine = Arc::new(EscrowEngine::new(
            harness.store.clone(),
            harness.gateway.clone(),
            Notifier::new(sink),
            harness.engine.config().clone(),
        ));
        Self { engine, ..harness }
    }

    pub async fn register_order(&self, payer: Uuid, vendor: Uuid, amount: Decimal) -> PaymentTarget {
        let target = PaymentTarget::Order(Uuid::new_v4());
        self.register(target, payer, vendor, amount).await;
        target
    }

    pub async fn register_booking(&self, payer: Uuid, vendor: Uuid, amount: Decimal) -> PaymentTarget {
        let target = PaymentTarget::Booking(Uuid::new_v4());
        self.register(target, payer, vendor, amount).await;
        target
    }

    async fn register(&self, target: PaymentTarget, payer: Uuid, vendor: Uuid, amount: Decimal) {
        self.store
            .register_payable(Payable {
                target,
                payer_id: payer,
                recipient_id: vendor,
                amount,
            })
            .await;
    }

    pub async fn credit(&self, user: Uuid, amount: Decimal) {
        self.store
            .apply_ledger_entry(NewLedgerEntry::new(user, TransactionType::WalletCredit, amount))
            .await
            .expect("credit should apply");
    }

    pub async fn balance(&self, user: Uuid) -> Decimal {
        self.store
            .wallet_balance(user)
            .await
            .expect("balance should load")
            .balance
    }

    /// Initializes a checkout for the target and returns the pending payment.
    pub async fn initialize(&self, payer: Uuid, target: PaymentTarget) -> Payment {
        self.engine
            .initialize_payment(InitializePayment {
                payer_id: payer,
                payer_email: "buyer@example.com".to_string(),
                target,
                amount: None,
                callback_url: None,
            })
            .await
            .expect("initialization should succeed")
            .payment
    }

    /// Initializes and confirms a checkout, leaving the funds held.
    pub async fn held_payment(&self, payer: Uuid, target: PaymentTarget) -> Payment {
        let payment = self.initialize(payer, target).await;
        self.engine
            .confirm_charge(
                &payment.reference,
                ChargeVerification::successful(&payment.reference, payment.amount),
            )
            .await
            .expect("confirmation should succeed")
    }
}

pub fn valid_bank_account() -> escrow_ledger::ledger::BankAccount {
    escrow_ledger::ledger::BankAccount {
        account_name: "Ada Obi".to_string(),
        account_number: "0152792740".to_string(),
        bank_code: "058".to_string(),
    }
}
