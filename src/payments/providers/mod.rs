pub mod paypal;
pub mod paystack;

pub use paypal::{PayPalConfig, PayPalProvider};
pub use paystack::{PaystackConfig, PaystackProvider};
