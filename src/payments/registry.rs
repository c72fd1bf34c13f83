use crate::config::PaymentsConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{PayPalConfig, PayPalProvider, PaystackConfig, PaystackProvider};
use crate::payments::token_cache::AccessTokenCache;
use crate::payments::types::{PaymentMethod, ProviderName};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry in the checkout payment method list
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub id: PaymentMethod,
    pub name: &'static str,
    pub icon: &'static str,
    pub provider: &'static str,
    pub requires_redirect: bool,
    pub available: bool,
}

/// Configured adapters, one per provider. Unconfigured providers are simply absent.
#[derive(Clone, Default)]
pub struct PaymentRegistry {
    paypal: Option<Arc<dyn PaymentProvider>>,
    paystack: Option<Arc<dyn PaymentProvider>>,
}

impl PaymentRegistry {
    pub fn new(
        paypal: Option<Arc<dyn PaymentProvider>>,
        paystack: Option<Arc<dyn PaymentProvider>>,
    ) -> Self {
        Self { paypal, paystack }
    }

    pub fn from_config(
        config: &PaymentsConfig,
        tokens: Arc<AccessTokenCache>,
    ) -> PaymentResult<Self> {
        let paypal = match &config.paypal {
            Some(settings) => {
                let provider =
                    PayPalProvider::new(PayPalConfig::from_settings(settings, config), tokens)?;
                info!(mode = ?settings.mode, "💳 PayPal adapter configured");
                Some(Arc::new(provider) as Arc<dyn PaymentProvider>)
            }
            None => {
                warn!("PayPal credentials not set, paypal payments disabled");
                None
            }
        };

        let paystack = match &config.paystack {
            Some(settings) => {
                let provider =
                    PaystackProvider::new(PaystackConfig::from_settings(settings, config))?;
                info!("💳 Paystack adapter configured");
                Some(Arc::new(provider) as Arc<dyn PaymentProvider>)
            }
            None => {
                warn!("PAYSTACK_SECRET_KEY not set, paystack payments disabled");
                None
            }
        };

        Ok(Self { paypal, paystack })
    }

    pub fn for_provider(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        let adapter = match provider {
            ProviderName::PayPal => self.paypal.as_ref(),
            ProviderName::Paystack => self.paystack.as_ref(),
        };
        adapter.cloned().ok_or_else(|| {
            PaymentError::invalid(
                "provider",
                format!("payment provider {} is not configured", provider),
            )
        })
    }

    /// Adapter that settles the given checkout method
    pub fn adapter_for(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.for_provider(method.provider())
    }

    pub fn is_configured(&self, provider: ProviderName) -> bool {
        match provider {
            ProviderName::PayPal => self.paypal.is_some(),
            ProviderName::Paystack => self.paystack.is_some(),
        }
    }

    pub fn methods(&self) -> Vec<MethodInfo> {
        PaymentMethod::ALL
            .iter()
            .map(|method| {
                let (name, icon) = match method {
                    PaymentMethod::Paypal => ("PayPal", "paypal-icon"),
                    PaymentMethod::Paystack => ("Paystack", "paystack-icon"),
                    PaymentMethod::MobileMoney => ("Mobile Money", "mobile-icon"),
                    PaymentMethod::Card => ("Credit/Debit Card", "card-icon"),
                };
                let provider = method.provider();
                MethodInfo {
                    id: *method,
                    name,
                    icon,
                    provider: match provider {
                        ProviderName::PayPal => "PayPal",
                        ProviderName::Paystack => "Paystack",
                    },
                    requires_redirect: true,
                    available: self.is_configured(provider),
                }
            })
            .collect()
    }
}
