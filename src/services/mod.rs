//! Services around the escrow engine: webhook intake and notifications.

pub mod notification;
pub mod webhook_processor;

pub use notification::{BroadcastSink, LedgerEvent, LoggingSink, NotificationSink, Notifier, TransitionKind};
pub use webhook_processor::{GatewayEvent, WebhookError, WebhookOutcome, WebhookProcessor};
