//! Escrow wallet ledger for a marketplace that collects money through
//! Paystack, holds it until the booking or order settles, then releases it to
//! the vendor or refunds the buyer.

pub mod api;
pub mod config;
pub mod error;
pub mod escrow;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
