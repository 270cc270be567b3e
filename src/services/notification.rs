//! Post-commit notifications. Delivery is best-effort: a failing sink is
//! logged and never reaches the caller or the ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    PaymentHeld,
    PaymentFailed,
    WalletFunded,
    WalletPayment,
    EscrowReleased,
    CommissionEarned,
    EscrowRefunded,
    WithdrawalRequested,
    WithdrawalProcessing,
    WithdrawalCompleted,
    WithdrawalFailed,
    WithdrawalRejected,
    Adjustment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub kind: TransitionKind,
    pub user_id: Uuid,
    pub amount: Decimal,
    /// Balance after the transition, when it moved funds for `user_id`.
    pub new_balance: Option<Decimal>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new(
        kind: TransitionKind,
        user_id: Uuid,
        amount: Decimal,
        new_balance: Option<Decimal>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_id,
            amount,
            new_balance,
            reference: reference.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: LedgerEvent) -> Result<(), NotificationError>;
}

/// Writes each event as a structured log line.
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, event: LedgerEvent) -> Result<(), NotificationError> {
        info!(
            kind = ?event.kind,
            user_id = %event.user_id,
            amount = %event.amount,
            new_balance = ?event.new_balance,
            reference = %event.reference,
            "ledger notification"
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers such as a websocket layer.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<LedgerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn notify(&self, event: LedgerEvent) -> Result<(), NotificationError> {
        // Nobody listening is normal between client connections.
        if self.sender.send(event).is_err() {
            debug!("ledger event dropped, no active subscribers");
        }
        Ok(())
    }
}

/// Delivers every event to each inner sink. One sink failing does not stop
/// the others; the first error is returned after all have run.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, event: LedgerEvent) -> Result<(), NotificationError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Dispatches events to a sink on a detached task.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn publish(&self, event: LedgerEvent) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let reference = event.reference.clone();
            let kind = event.kind;
            if let Err(e) = sink.notify(event).await {
                warn!(
                    reference = %reference,
                    kind = ?kind,
                    error = %e,
                    "notification delivery failed"
                );
            }
        });
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = LedgerEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let notifier = Notifier::new(Arc::new(sink.clone()));
        let user = Uuid::new_v4();

        notifier.publish(LedgerEvent::new(
            TransitionKind::WalletFunded,
            user,
            dec!(5000),
            Some(dec!(5000)),
            "WALLET-FUND-1-abc",
        ));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel open");
        assert_eq!(event.kind, TransitionKind::WalletFunded);
        assert_eq!(event.user_id, user);
    }

    struct Unreachable;

    #[async_trait]
    impl NotificationSink for Unreachable {
        async fn notify(&self, _event: LedgerEvent) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_starve_the_others() {
        let broadcast = BroadcastSink::new(8);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new(vec![Arc::new(Unreachable), Arc::new(broadcast.clone())]);

        let event = LedgerEvent::new(
            TransitionKind::EscrowRefunded,
            Uuid::new_v4(),
            dec!(3000),
            None,
            "BOOKING-PAY-1-abc",
        );
        let err = fanout.notify(event.clone()).await.unwrap_err();
        assert!(matches!(err, NotificationError::Delivery(_)));
        assert_eq!(rx.try_recv().unwrap().reference, "BOOKING-PAY-1-abc");

        // Through the notifier the failure is only logged.
        let notifier = Notifier::new(Arc::new(fanout));
        notifier.publish(event);
        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel open");
        assert_eq!(delivered.kind, TransitionKind::EscrowRefunded);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_not_an_error() {
        let sink = BroadcastSink::new(1);
        let event = LedgerEvent::new(
            TransitionKind::Adjustment,
            Uuid::new_v4(),
            dec!(10),
            Some(dec!(10)),
            "ADJUST-1-abc",
        );
        assert!(sink.notify(event).await.is_ok());
    }
}
