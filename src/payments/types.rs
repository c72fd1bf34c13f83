use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Payment gateways QuickCart talks to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderName {
    #[serde(rename = "paypal")]
    PayPal,
    #[serde(rename = "paystack")]
    Paystack,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::PayPal => "paypal",
            ProviderName::Paystack => "paystack",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paypal" => Ok(ProviderName::PayPal),
            "paystack" => Ok(ProviderName::Paystack),
            _ => Err(PaymentError::invalid(
                "provider",
                format!("unsupported provider: {}", value),
            )),
        }
    }
}

/// Checkout payment methods offered to customers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Paypal,
    Paystack,
    MobileMoney,
    Card,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Paypal,
        PaymentMethod::Paystack,
        PaymentMethod::MobileMoney,
        PaymentMethod::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Paystack => "paystack",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Card => "card",
        }
    }

    /// Gateway that settles this method
    pub fn provider(&self) -> ProviderName {
        match self {
            PaymentMethod::Paypal => ProviderName::PayPal,
            PaymentMethod::Paystack | PaymentMethod::MobileMoney | PaymentMethod::Card => {
                ProviderName::Paystack
            }
        }
    }

    /// Paystack checkout channels to restrict the hosted page to
    pub fn paystack_channels(&self) -> Option<&'static [&'static str]> {
        match self {
            PaymentMethod::MobileMoney => Some(&["mobile_money"]),
            PaymentMethod::Card => Some(&["card"]),
            PaymentMethod::Paypal | PaymentMethod::Paystack => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paypal" => Ok(PaymentMethod::Paypal),
            "paystack" => Ok(PaymentMethod::Paystack),
            "mobile_money" | "mobile-money" => Ok(PaymentMethod::MobileMoney),
            "card" => Ok(PaymentMethod::Card),
            _ => Err(PaymentError::invalid(
                "paymentMethod",
                format!("unsupported payment method: {}", value),
            )),
        }
    }
}

/// Payment state as reported by a provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Reversed,
    Unknown,
}

impl PaymentState {
    /// The provider has definitively declared the payment unsuccessful
    pub fn is_definitive_failure(&self) -> bool {
        matches!(
            self,
            PaymentState::Failed | PaymentState::Cancelled | PaymentState::Reversed
        )
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub email: Option<String>,
    pub method: PaymentMethod,
    /// Idempotency reference; providers that accept one use it as the transaction id
    pub reference: String,
    pub return_url: String,
    pub cancel_url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
    pub status: PaymentState,
    pub message: Option<String>,
}

impl ChargeResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            authorization_url: None,
            access_code: None,
            status: PaymentState::Failed,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub success: bool,
    pub state: PaymentState,
    pub transaction_id: String,
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub gateway_response: Option<String>,
    pub message: Option<String>,
}

impl VerifyResult {
    pub fn failed(transaction_id: impl Into<String>, state: PaymentState, message: impl Into<String>) -> Self {
        Self {
            success: false,
            state,
            transaction_id: transaction_id.into(),
            amount: None,
            currency: None,
            customer_email: None,
            gateway_response: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub transaction_id: String,
    /// `None` refunds the full amount
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub success: bool,
    pub refund_id: Option<String>,
    pub status: String,
    pub amount_refunded: Option<BigDecimal>,
    pub message: Option<String>,
}

impl RefundResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            refund_id: None,
            status: "failed".to_string(),
            amount_refunded: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// What a provider notification means for the order it references
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Completed,
    Failed,
    Refunded,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_id: String,
    pub event_type: String,
    /// Transaction id as stored on the order
    pub reference: Option<String>,
    pub outcome: WebhookOutcome,
    /// Settled amount in major units, when the event reports one
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub payload: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_maps_to_provider() {
        assert_eq!(PaymentMethod::Paypal.provider(), ProviderName::PayPal);
        assert_eq!(PaymentMethod::Card.provider(), ProviderName::Paystack);
        assert_eq!(PaymentMethod::MobileMoney.provider(), ProviderName::Paystack);
        assert_eq!(PaymentMethod::Paystack.provider(), ProviderName::Paystack);
    }

    #[test]
    fn payment_method_serializes_snake_case() {
        let json = serde_json::to_value(PaymentMethod::MobileMoney).expect("serialize");
        assert_eq!(json, "mobile_money");
        let parsed: PaymentMethod = serde_json::from_value(serde_json::json!("card")).expect("deserialize");
        assert_eq!(parsed, PaymentMethod::Card);
        assert!(PaymentMethod::from_str("bitcoin").is_err());
    }

    #[test]
    fn provider_name_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ProviderName::PayPal).expect("serialize"),
            "paypal"
        );
        assert_eq!(ProviderName::from_str("PayPal").ok(), Some(ProviderName::PayPal));
    }

    #[test]
    fn paystack_channels_follow_method() {
        assert_eq!(PaymentMethod::MobileMoney.paystack_channels(), Some(&["mobile_money"][..]));
        assert_eq!(PaymentMethod::Card.paystack_channels(), Some(&["card"][..]));
        assert_eq!(PaymentMethod::Paystack.paystack_channels(), None);
    }
}
