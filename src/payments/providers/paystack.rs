use crate::config::{PaymentsConfig, PaystackSettings};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, PaymentState, ProviderName, RefundRequest, RefundResult,
    VerifyResult, WebhookEvent, WebhookOutcome, WebhookVerificationResult,
};
use crate::payments::utils::{
    from_minor_units, to_minor_units, verify_hmac_sha512_hex, PaymentHttpClient, RequestAuth,
    RequestBody,
};
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl PaystackConfig {
    pub fn from_settings(settings: &PaystackSettings, payments: &PaymentsConfig) -> Self {
        Self {
            secret_key: settings.secret_key.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout_secs: payments.timeout_secs,
            max_retries: payments.max_retries,
        }
    }
}

/// Paystack hosted checkout: card, mobile money and the full Paystack channel list
pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "paystack",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn webhook_secret(&self) -> &str {
        self.config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key)
    }

    fn initialize_payload(request: &ChargeRequest) -> PaymentResult<JsonValue> {
        let email = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| PaymentError::invalid("email", "required for paystack payments"))?;

        let mut payload = serde_json::json!({
            "email": email,
            "amount": to_minor_units(&request.amount)?,
            "currency": request.currency,
            "reference": request.reference,
            "callback_url": request.return_url,
            "metadata": {
                "orderId": request.order_id.to_string(),
                "cancel_action": request.cancel_url,
            },
        });
        if let Some(channels) = request.method.paystack_channels() {
            payload["channels"] = serde_json::json!(channels);
        }
        Ok(payload)
    }
}

fn ensure_reference(reference: &str) -> PaymentResult<&str> {
    let reference = reference.trim();
    let valid = !reference.is_empty()
        && reference.len() <= 100
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='));
    if valid {
        Ok(reference)
    } else {
        Err(PaymentError::invalid("reference", "not a valid payment reference"))
    }
}

fn map_transaction_status(status: &str) -> PaymentState {
    match status {
        "success" => PaymentState::Success,
        "pending" | "ongoing" | "processing" | "queued" => PaymentState::Pending,
        "failed" => PaymentState::Failed,
        "abandoned" => PaymentState::Cancelled,
        "reversed" => PaymentState::Reversed,
        _ => PaymentState::Unknown,
    }
}

fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    fn requires_redirect(&self) -> bool {
        true
    }

    async fn process_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        let payload = Self::initialize_payload(&request)?;

        let raw: PaystackEnvelope<PaystackInitializeData> = match self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                RequestAuth::Bearer(&self.config.secret_key),
                RequestBody::Json(&payload),
                &[],
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => match err.refusal() {
                Some(message) => return Ok(ChargeResult::failed(message)),
                None => return Err(err),
            },
        };

        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            _ => return Ok(ChargeResult::failed(raw.message)),
        };
        info!(
            order_id = %request.order_id,
            reference = %data.reference,
            method = %request.method,
            "paystack payment initialized"
        );

        Ok(ChargeResult {
            success: true,
            transaction_id: Some(data.reference),
            authorization_url: Some(data.authorization_url),
            access_code: Some(data.access_code),
            status: PaymentState::Pending,
            message: Some(raw.message),
        })
    }

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResult> {
        let reference = ensure_reference(reference)?;
        let raw: PaystackEnvelope<PaystackVerifyData> = match self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                RequestAuth::Bearer(&self.config.secret_key),
                RequestBody::Empty,
                &[],
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => match err.refusal() {
                Some(message) => {
                    return Ok(VerifyResult::failed(reference, PaymentState::Unknown, message))
                }
                None => return Err(err),
            },
        };

        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            _ => {
                return Ok(VerifyResult::failed(
                    reference,
                    PaymentState::Unknown,
                    raw.message,
                ))
            }
        };

        let state = map_transaction_status(&data.status);
        Ok(VerifyResult {
            success: state == PaymentState::Success,
            state,
            transaction_id: data.reference.unwrap_or_else(|| reference.to_string()),
            amount: Some(from_minor_units(data.amount)),
            currency: data.currency,
            customer_email: data.customer.and_then(|c| c.email),
            gateway_response: data.gateway_response,
            message: Some(raw.message),
        })
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
        let reference = ensure_reference(&request.transaction_id)?;
        let mut payload = serde_json::json!({ "transaction": reference });
        if let Some(amount) = &request.amount {
            payload["amount"] = serde_json::json!(to_minor_units(amount)?);
        }
        if let Some(currency) = &request.currency {
            payload["currency"] = serde_json::json!(currency);
        }
        if let Some(reason) = &request.reason {
            payload["merchant_note"] = serde_json::json!(reason);
        }

        let raw: PaystackEnvelope<PaystackRefundData> = match self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                RequestAuth::Bearer(&self.config.secret_key),
                RequestBody::Json(&payload),
                &[],
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => match err.refusal() {
                Some(message) => return Ok(RefundResult::failed(message)),
                None => return Err(err),
            },
        };

        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            _ => return Ok(RefundResult::failed(raw.message)),
        };
        info!(reference = %reference, status = %data.status, "paystack refund created");

        Ok(RefundResult {
            success: data.status != "failed",
            refund_id: json_id(&data.id),
            status: data.status,
            amount_refunded: data.amount.map(from_minor_units),
            message: Some(raw.message),
        })
    }

    async fn verify_webhook(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        _event: &JsonValue,
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
            return Ok(WebhookVerificationResult::invalid(
                "missing x-paystack-signature header",
            ));
        };

        if verify_hmac_sha512_hex(raw_body, self.webhook_secret(), signature) {
            Ok(WebhookVerificationResult::valid())
        } else {
            warn!("paystack webhook signature mismatch");
            Ok(WebhookVerificationResult::invalid("invalid paystack signature"))
        }
    }

    fn parse_webhook_event(&self, event: &JsonValue) -> PaymentResult<WebhookEvent> {
        let event_type = event
            .get("event")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::MalformedEvent {
                message: "paystack event is missing 'event'".to_string(),
            })?
            .to_string();
        let data = event.get("data").cloned().unwrap_or(JsonValue::Null);

        let outcome = match event_type.as_str() {
            "charge.success" => WebhookOutcome::Completed,
            "charge.failed" => WebhookOutcome::Failed,
            "refund.processed" => WebhookOutcome::Refunded,
            _ => WebhookOutcome::Ignored,
        };

        // refund events carry the original charge under transaction_reference
        let reference = data
            .get("transaction_reference")
            .or_else(|| data.get("reference"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let event_id = match data.get("id").and_then(json_id) {
            Some(id) => format!("{}:{}", event_type, id),
            None => format!(
                "{}:{}",
                event_type,
                reference.as_deref().unwrap_or("unknown")
            ),
        };

        // charge amounts arrive in kobo/pesewas
        let amount = data
            .get("amount")
            .and_then(|v| v.as_i64())
            .map(from_minor_units);
        let currency = data
            .get("currency")
            .and_then(|v| v.as_str())
            .map(str::to_uppercase);

        Ok(WebhookEvent {
            provider: ProviderName::Paystack,
            event_id,
            event_type,
            reference,
            outcome,
            amount,
            currency,
            payload: event.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default = "Option::default")]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    status: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    customer: Option<PaystackCustomer>,
}

#[derive(Debug, Deserialize)]
struct PaystackCustomer {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackRefundData {
    #[serde(default)]
    id: JsonValue,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use crate::payments::utils::sign_hmac_sha512_hex;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn provider() -> PaystackProvider {
        PaystackProvider::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("provider init should succeed")
    }

    fn charge(method: PaymentMethod, email: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            order_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("149.50").expect("decimal"),
            currency: "NGN".to_string(),
            email: email.map(str::to_string),
            method,
            reference: "QC-ABCDEF12-1".to_string(),
            return_url: "http://localhost:3000/payment-success".to_string(),
            cancel_url: "http://localhost:3000/payment-cancel".to_string(),
            description: "QuickCart order".to_string(),
        }
    }

    #[test]
    fn initialize_payload_uses_minor_units_and_channels() {
        let payload = PaystackProvider::initialize_payload(&charge(
            PaymentMethod::MobileMoney,
            Some("buyer@example.com"),
        ))
        .expect("payload");
        assert_eq!(payload["amount"], 14950);
        assert_eq!(payload["channels"], serde_json::json!(["mobile_money"]));
        assert_eq!(payload["reference"], "QC-ABCDEF12-1");

        let plain = PaystackProvider::initialize_payload(&charge(
            PaymentMethod::Paystack,
            Some("buyer@example.com"),
        ))
        .expect("payload");
        assert!(plain.get("channels").is_none());
    }

    #[test]
    fn initialize_payload_requires_email() {
        let result = PaystackProvider::initialize_payload(&charge(PaymentMethod::Card, None));
        assert!(matches!(result, Err(PaymentError::Invalid { .. })));
    }

    #[tokio::test]
    async fn webhook_signature_validation() {
        let provider = provider();
        let body = br#"{"event":"charge.success","data":{"id":1,"reference":"QC-1"}}"#;
        let event: JsonValue = serde_json::from_slice(body).expect("json");

        let mut headers = HeaderMap::new();
        let missing = provider
            .verify_webhook(body, &headers, &event)
            .await
            .expect("verification should not error");
        assert!(!missing.valid);

        headers.insert(SIGNATURE_HEADER, "invalid_signature".parse().expect("header"));
        let invalid = provider
            .verify_webhook(body, &headers, &event)
            .await
            .expect("verification should not error");
        assert!(!invalid.valid);

        let signature = sign_hmac_sha512_hex(body, "whsec_test");
        headers.insert(SIGNATURE_HEADER, signature.parse().expect("header"));
        let valid = provider
            .verify_webhook(body, &headers, &event)
            .await
            .expect("verification should not error");
        assert!(valid.valid);
    }

    #[test]
    fn parses_charge_and_refund_events() {
        let provider = provider();
        let charge = provider
            .parse_webhook_event(&serde_json::json!({
                "event": "charge.success",
                "data": {
                    "id": 302961,
                    "reference": "QC-1",
                    "status": "success",
                    "amount": 9990,
                    "currency": "ngn"
                }
            }))
            .expect("event");
        assert_eq!(charge.outcome, WebhookOutcome::Completed);
        assert_eq!(charge.amount, Some(BigDecimal::from_str("99.90").expect("amount")));
        assert_eq!(charge.currency.as_deref(), Some("NGN"));
        assert_eq!(charge.reference.as_deref(), Some("QC-1"));
        assert_eq!(charge.event_id, "charge.success:302961");

        let refund = provider
            .parse_webhook_event(&serde_json::json!({
                "event": "refund.processed",
                "data": { "id": "77", "transaction_reference": "QC-1" }
            }))
            .expect("event");
        assert_eq!(refund.outcome, WebhookOutcome::Refunded);
        assert_eq!(refund.reference.as_deref(), Some("QC-1"));

        let other = provider
            .parse_webhook_event(&serde_json::json!({ "event": "transfer.success", "data": {} }))
            .expect("event");
        assert_eq!(other.outcome, WebhookOutcome::Ignored);

        assert!(provider
            .parse_webhook_event(&serde_json::json!({ "data": {} }))
            .is_err());
    }

    #[test]
    fn references_are_sanitized() {
        assert!(ensure_reference("QC-123_abc").is_ok());
        assert!(ensure_reference("../admin").is_err());
        assert!(ensure_reference("  ").is_err());
    }

    #[test]
    fn transaction_statuses_map_to_states() {
        assert_eq!(map_transaction_status("success"), PaymentState::Success);
        assert_eq!(map_transaction_status("abandoned"), PaymentState::Cancelled);
        assert_eq!(map_transaction_status("ongoing"), PaymentState::Pending);
        assert!(map_transaction_status("failed").is_definitive_failure());
    }
}
