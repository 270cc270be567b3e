pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use provider::PaymentGateway;
pub use providers::paystack::{PaystackConfig, PaystackGateway};
