pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod token_cache;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentProvider;
pub use registry::{MethodInfo, PaymentRegistry};
pub use token_cache::AccessTokenCache;
pub use types::*;
