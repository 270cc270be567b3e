use crate::escrow::error::{EscrowError, EscrowResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Split of a payment between the platform and the recipient, fixed when the
/// payment is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub amount: Decimal,
    pub commission_rate: Decimal,
    pub platform_fee: Decimal,
    pub vendor_amount: Decimal,
}

impl FeeBreakdown {
    pub fn compute(amount: Decimal, commission_rate: Decimal) -> EscrowResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::invalid_field(
                "amount",
                "amount must be greater than zero",
            ));
        }
        if commission_rate < Decimal::ZERO || commission_rate > Decimal::ONE {
            return Err(EscrowError::invalid_field(
                "commission_rate",
                format!("commission rate must be between 0 and 1, got {}", commission_rate),
            ));
        }

        let platform_fee = (amount * commission_rate)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
        Ok(Self {
            amount,
            commission_rate,
            platform_fee,
            vendor_amount: amount - platform_fee,
        })
    }

    /// Wallet top-ups carry no platform fee.
    pub fn fee_free(amount: Decimal) -> EscrowResult<Self> {
        Self::compute(amount, Decimal::ZERO)
    }
}

/// Amount reserved for a withdrawal, the flat fee kept by the platform, and
/// what actually leaves for the bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalCharge {
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
}

impl WithdrawalCharge {
    pub fn compute(amount: Decimal, fee: Decimal, minimum: Decimal) -> EscrowResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::invalid_field(
                "amount",
                "amount must be greater than zero",
            ));
        }
        if amount < minimum {
            return Err(EscrowError::invalid_field(
                "amount",
                format!("minimum withdrawal amount is {}", minimum),
            ));
        }
        let net_amount = amount - fee;
        if net_amount <= Decimal::ZERO {
            return Err(EscrowError::invalid_field(
                "amount",
                format!("amount must exceed the withdrawal fee of {}", fee),
            ));
        }
        Ok(Self {
            amount,
            fee,
            net_amount,
        })
    }
}
