use crate::ledger::error::LedgerError;
use crate::ledger::reference::{generate_reference, TRANSACTION_PREFIX};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

fn unknown_value(kind: &str, value: &str) -> LedgerError {
    LedgerError::storage(format!("unknown {} value: {}", kind, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Earning,
    Refund,
    Withdrawal,
    WalletCredit,
    WalletDebit,
    ReferralBonus,
    Commission,
}

impl TransactionType {
    pub fn direction(&self) -> EntryDirection {
        match self {
            TransactionType::Earning
            | TransactionType::Refund
            | TransactionType::WalletCredit
            | TransactionType::ReferralBonus
            | TransactionType::Commission => EntryDirection::Credit,
            TransactionType::Payment
            | TransactionType::Withdrawal
            | TransactionType::WalletDebit => EntryDirection::Debit,
        }
    }

    pub fn is_credit(&self) -> bool {
        self.direction() == EntryDirection::Credit
    }

    /// Signed effect of `amount` on the owner's balance.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self.direction() {
            EntryDirection::Credit => amount,
            EntryDirection::Debit => -amount,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Earning => "earning",
            TransactionType::Refund => "refund",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::WalletCredit => "wallet_credit",
            TransactionType::WalletDebit => "wallet_debit",
            TransactionType::ReferralBonus => "referral_bonus",
            TransactionType::Commission => "commission",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(TransactionType::Payment),
            "earning" => Ok(TransactionType::Earning),
            "refund" => Ok(TransactionType::Refund),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "wallet_credit" => Ok(TransactionType::WalletCredit),
            "wallet_debit" => Ok(TransactionType::WalletDebit),
            "referral_bonus" => Ok(TransactionType::ReferralBonus),
            "commission" => Ok(TransactionType::Commission),
            other => Err(unknown_value("transaction type", other)),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(unknown_value("transaction status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Booking(Uuid),
    Order(Uuid),
    Payment(Uuid),
    Withdrawal(Uuid),
}

impl RelatedEntity {
    pub fn kind(&self) -> &'static str {
        match self {
            RelatedEntity::Booking(_) => "booking",
            RelatedEntity::Order(_) => "order",
            RelatedEntity::Payment(_) => "payment",
            RelatedEntity::Withdrawal(_) => "withdrawal",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            RelatedEntity::Booking(id)
            | RelatedEntity::Order(id)
            | RelatedEntity::Payment(id)
            | RelatedEntity::Withdrawal(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, LedgerError> {
        match kind {
            "booking" => Ok(RelatedEntity::Booking(id)),
            "order" => Ok(RelatedEntity::Order(id)),
            "payment" => Ok(RelatedEntity::Payment(id)),
            "withdrawal" => Ok(RelatedEntity::Withdrawal(id)),
            other => Err(unknown_value("related entity", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// Immutable ledger entry. Corrections are new offsetting entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub reference: String,
    pub related: Option<RelatedEntity>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A balance movement requested by the engine, applied by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub reference: String,
    pub related: Option<RelatedEntity>,
    pub description: String,
}

impl NewLedgerEntry {
    pub fn new(user_id: Uuid, transaction_type: TransactionType, amount: Decimal) -> Self {
        Self {
            user_id,
            transaction_type,
            amount,
            reference: generate_reference(TRANSACTION_PREFIX),
            related: None,
            description: String::new(),
        }
    }

    pub fn related(mut self, related: RelatedEntity) -> Self {
        self.related = Some(related);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: self.amount,
            });
        }
        Ok(())
    }

    /// Builds the committed record given the owner's balance before this entry.
    pub fn into_transaction(self, balance_before: Decimal, now: DateTime<Utc>) -> Transaction {
        let balance_after = balance_before + self.transaction_type.signed(self.amount);
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            transaction_type: self.transaction_type,
            amount: self.amount,
            balance_before,
            balance_after,
            status: TransactionStatus::Completed,
            reference: self.reference,
            related: self.related,
            description: self.description,
            created_at: now,
        }
    }
}

/// The single payable a payment is associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    Booking(Uuid),
    Order(Uuid),
    WalletFunding,
}

impl PaymentTarget {
    /// Exactly one association: a booking, an order, or wallet funding.
    pub fn from_parts(
        booking_id: Option<Uuid>,
        order_id: Option<Uuid>,
        wallet_funding: bool,
    ) -> Result<Self, LedgerError> {
        match (booking_id, order_id, wallet_funding) {
            (Some(id), None, false) => Ok(PaymentTarget::Booking(id)),
            (None, Some(id), false) => Ok(PaymentTarget::Order(id)),
            (None, None, true) => Ok(PaymentTarget::WalletFunding),
            (None, None, false) => Err(LedgerError::InvalidAssociation {
                message: "payment must reference a booking, an order, or wallet funding"
                    .to_string(),
            }),
            _ => Err(LedgerError::InvalidAssociation {
                message: "payment must reference exactly one payable".to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentTarget::Booking(_) => "booking",
            PaymentTarget::Order(_) => "order",
            PaymentTarget::WalletFunding => "wallet_funding",
        }
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        match self {
            PaymentTarget::Booking(id) => Some(*id),
            _ => None,
        }
    }

    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            PaymentTarget::Order(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_wallet_funding(&self) -> bool {
        matches!(self, PaymentTarget::WalletFunding)
    }

    pub fn related_entity(&self) -> Option<RelatedEntity> {
        match self {
            PaymentTarget::Booking(id) => Some(RelatedEntity::Booking(*id)),
            PaymentTarget::Order(id) => Some(RelatedEntity::Order(*id)),
            PaymentTarget::WalletFunding => None,
        }
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentTarget::Booking(id) => write!(f, "booking:{}", id),
            PaymentTarget::Order(id) => write!(f, "order:{}", id),
            PaymentTarget::WalletFunding => f.write_str("wallet_funding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Released,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Released => "released",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "released" => Ok(PaymentStatus::Released),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(unknown_value("payment status", other)),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Held,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Held => "held",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for EscrowStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EscrowStatus::Pending),
            "held" => Ok(EscrowStatus::Held),
            "released" => Ok(EscrowStatus::Released),
            "refunded" => Ok(EscrowStatus::Refunded),
            other => Err(unknown_value("escrow status", other)),
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target: PaymentTarget,
    pub recipient_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub gateway_reference: Option<String>,
    pub authorization_code: Option<String>,
    pub status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    pub commission_rate: Decimal,
    pub platform_fee: Decimal,
    pub vendor_amount: Decimal,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<Uuid>,
    pub initiated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn related_entity(&self) -> RelatedEntity {
        RelatedEntity::Payment(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Rejected
        )
    }
}

impl FromStr for WithdrawalStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "processing" => Ok(WithdrawalStatus::Processing),
            "completed" => Ok(WithdrawalStatus::Completed),
            "failed" => Ok(WithdrawalStatus::Failed),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(unknown_value("withdrawal status", other)),
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub destination: BankAccount,
    pub reference: String,
    pub status: WithdrawalStatus,
    pub gateway_recipient_code: Option<String>,
    pub gateway_transfer_code: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn related_entity(&self) -> RelatedEntity {
        RelatedEntity::Withdrawal(self.id)
    }
}

/// A booking or order as seen by the ledger: who pays, who earns, how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payable {
    pub target: PaymentTarget,
    pub payer_id: Uuid,
    pub recipient_id: Uuid,
    pub amount: Decimal,
}

/// Payment fields mirrored onto the booking/order. Only the engine writes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMirror {
    pub payment_status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub payment_reference: String,
}

impl From<&Payment> for PaymentMirror {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_status: payment.status,
            escrow_status: payment.escrow_status,
            is_paid: payment.paid_at.is_some(),
            paid_at: payment.paid_at,
            released_at: payment.released_at,
            refunded_at: payment.refunded_at,
            payment_reference: payment.reference.clone(),
        }
    }
}
