//! Correlation references: `<PREFIX>-<unix_millis>-<8 random chars>`.
//!
//! References are opaque to the gateway, which only echoes them back. The
//! prefix is how an inbound event is routed to the right ledger record.

use chrono::Utc;
use uuid::Uuid;

pub const BOOKING_PAYMENT_PREFIX: &str = "BOOKING-PAY";
pub const ORDER_PAYMENT_PREFIX: &str = "ORDER-PAY";
pub const WALLET_FUNDING_PREFIX: &str = "WALLET-FUND";
pub const WALLET_PAYMENT_PREFIX: &str = "WALLET-PAY";
pub const WITHDRAWAL_PREFIX: &str = "WITHDRAW";
pub const TRANSACTION_PREFIX: &str = "TXN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Booking,
    Order,
    WalletFunding,
    WalletPayment,
    Withdrawal,
    Unrecognized,
}

impl ReferenceKind {
    /// True for references that identify a `Payment` record.
    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            ReferenceKind::Booking
                | ReferenceKind::Order
                | ReferenceKind::WalletFunding
                | ReferenceKind::WalletPayment
        )
    }
}

pub fn generate_reference(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

pub fn classify_reference(reference: &str) -> ReferenceKind {
    let prefixes = [
        (BOOKING_PAYMENT_PREFIX, ReferenceKind::Booking),
        (ORDER_PAYMENT_PREFIX, ReferenceKind::Order),
        (WALLET_FUNDING_PREFIX, ReferenceKind::WalletFunding),
        (WALLET_PAYMENT_PREFIX, ReferenceKind::WalletPayment),
        (WITHDRAWAL_PREFIX, ReferenceKind::Withdrawal),
    ];

    let reference = reference.trim();
    prefixes
        .iter()
        .find(|(prefix, _)| {
            reference
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('-') && rest.len() > 1)
                .unwrap_or(false)
        })
        .map(|(_, kind)| *kind)
        .unwrap_or(ReferenceKind::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_reference_has_prefix_timestamp_and_suffix() {
        let reference = generate_reference(WALLET_FUNDING_PREFIX);
        let rest = reference
            .strip_prefix("WALLET-FUND-")
            .expect("prefix should be present");
        let (millis, suffix) = rest.split_once('-').expect("suffix separator");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_references_do_not_collide() {
        let a = generate_reference(TRANSACTION_PREFIX);
        let b = generate_reference(TRANSACTION_PREFIX);
        assert_ne!(a, b);
    }

    #[test]
    fn classification_matches_prefixes() {
        assert_eq!(classify_reference("BOOKING-PAY-1-abc"), ReferenceKind::Booking);
        assert_eq!(classify_reference("ORDER-PAY-1-abc"), ReferenceKind::Order);
        assert_eq!(
            classify_reference("WALLET-FUND-1-abc"),
            ReferenceKind::WalletFunding
        );
        assert_eq!(
            classify_reference("WALLET-PAY-1-abc"),
            ReferenceKind::WalletPayment
        );
        assert_eq!(classify_reference("WITHDRAW-1-abc"), ReferenceKind::Withdrawal);
    }

    #[test]
    fn foreign_references_are_unrecognized() {
        assert_eq!(classify_reference("T123456789"), ReferenceKind::Unrecognized);
        assert_eq!(classify_reference("WALLET-FUNDX-1"), ReferenceKind::Unrecognized);
        assert_eq!(classify_reference("ORDER-PAY-"), ReferenceKind::Unrecognized);
        assert_eq!(classify_reference(""), ReferenceKind::Unrecognized);
        assert!(!ReferenceKind::Withdrawal.is_payment());
        assert!(ReferenceKind::WalletFunding.is_payment());
    }
}
