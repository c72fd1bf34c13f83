use crate::config::{PayPalSettings, PaymentsConfig};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::token_cache::{AccessTokenCache, FetchedToken};
use crate::payments::types::{
    ChargeRequest, ChargeResult, PaymentState, ProviderName, RefundRequest, RefundResult,
    VerifyResult, WebhookEvent, WebhookOutcome, WebhookVerificationResult,
};
use crate::payments::utils::{
    format_major_units, PaymentHttpClient, RequestAuth, RequestBody,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Headers PayPal attaches to every webhook delivery
const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-auth-algo",
    "paypal-cert-url",
    "paypal-transmission-id",
    "paypal-transmission-sig",
    "paypal-transmission-time",
];

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub webhook_id: Option<String>,
    pub token_ttl: Duration,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl PayPalConfig {
    pub fn from_settings(settings: &PayPalSettings, payments: &PaymentsConfig) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            webhook_id: settings.webhook_id.clone(),
            token_ttl: Duration::from_secs(settings.token_ttl_secs),
            timeout_secs: payments.timeout_secs,
            max_retries: payments.max_retries,
        }
    }
}

/// PayPal REST v1 payments: create, buyer approval, execute
pub struct PayPalProvider {
    config: PayPalConfig,
    http: PaymentHttpClient,
    tokens: Arc<AccessTokenCache>,
    token_key: String,
}

impl PayPalProvider {
    pub fn new(config: PayPalConfig, tokens: Arc<AccessTokenCache>) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "paypal",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let token_key = AccessTokenCache::credential_key(
            &config.base_url,
            &config.client_id,
            &config.client_secret,
        );
        Ok(Self {
            config,
            http,
            tokens,
            token_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn fetch_token(&self) -> PaymentResult<FetchedToken> {
        let token: PayPalTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                RequestAuth::Basic {
                    username: &self.config.client_id,
                    password: &self.config.client_secret,
                },
                RequestBody::Form("grant_type=client_credentials"),
                &[("Accept", "application/json")],
            )
            .await?;
        info!(expires_in = ?token.expires_in, "paypal access token obtained");

        Ok(FetchedToken {
            access_token: token.access_token,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }

    async fn access_token(&self) -> PaymentResult<String> {
        self.tokens
            .get_or_fetch(&self.token_key, self.config.token_ttl, || self.fetch_token())
            .await
    }

    /// Authorized call; a 401 drops the cached token and retries once with a fresh one.
    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: RequestBody<'_>,
        headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let url = self.endpoint(path);
        let token = self.access_token().await?;
        match self
            .http
            .request_json(method.clone(), &url, RequestAuth::Bearer(&token), body, headers)
            .await
        {
            Err(err) if err.status() == Some(401) => {
                warn!("paypal rejected cached access token, refreshing");
                self.tokens.invalidate(&self.token_key).await;
                let token = self.access_token().await?;
                self.http
                    .request_json(method, &url, RequestAuth::Bearer(&token), body, headers)
                    .await
            }
            other => other,
        }
    }

    fn create_payload(request: &ChargeRequest) -> JsonValue {
        let total = format_major_units(&request.amount);
        serde_json::json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "redirect_urls": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
            },
            "transactions": [{
                "item_list": {
                    "items": [{
                        "name": "QuickCart order",
                        "sku": request.order_id.to_string(),
                        "price": total,
                        "currency": request.currency,
                        "quantity": 1,
                    }],
                },
                "amount": {
                    "currency": request.currency,
                    "total": total,
                },
                "description": request.description,
                "custom": request.order_id.to_string(),
                "invoice_number": request.reference,
            }],
        })
    }

    async fn sale_id_for(&self, payment_id: &str) -> PaymentResult<String> {
        match self
            .call::<PayPalPayment>(
                reqwest::Method::GET,
                &format!("/v1/payments/payment/{}", payment_id),
                RequestBody::Empty,
                &[],
            )
            .await
        {
            Ok(payment) => payment.sale().map(|s| s.id.clone()).ok_or_else(|| {
                PaymentError::rejected("paypal", None, "payment has no completed sale to refund")
            }),
            // Not a payment id; assume the caller already holds the sale id
            Err(err) if err.status() == Some(404) => Ok(payment_id.to_string()),
            Err(err) => Err(err),
        }
    }
}

fn ensure_id(id: &str) -> PaymentResult<&str> {
    let id = id.trim();
    if !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(id)
    } else {
        Err(PaymentError::invalid("paymentId", "not a valid paypal id"))
    }
}

fn map_payment_state(state: &str) -> PaymentState {
    match state {
        "approved" | "completed" => PaymentState::Success,
        "created" | "pending" => PaymentState::Pending,
        "failed" => PaymentState::Failed,
        "canceled" | "cancelled" | "expired" => PaymentState::Cancelled,
        _ => PaymentState::Unknown,
    }
}

fn payment_to_verify_result(payment: PayPalPayment) -> VerifyResult {
    let state = map_payment_state(&payment.state);
    let amount = payment.transactions.first().map(|t| &t.amount);
    VerifyResult {
        success: state == PaymentState::Success,
        state,
        transaction_id: payment.id.clone(),
        amount: amount.and_then(|a| BigDecimal::from_str(&a.total).ok()),
        currency: amount.map(|a| a.currency.clone()),
        customer_email: payment
            .payer
            .and_then(|p| p.payer_info)
            .and_then(|info| info.email),
        gateway_response: Some(payment.state),
        message: None,
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::PayPal
    }

    fn requires_redirect(&self) -> bool {
        true
    }

    async fn process_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        let payload = Self::create_payload(&request);

        let payment: PayPalPayment = match self
            .call(
                reqwest::Method::POST,
                "/v1/payments/payment",
                RequestBody::Json(&payload),
                &[("PayPal-Request-Id", request.reference.as_str())],
            )
            .await
        {
            Ok(payment) => payment,
            Err(err) => match err.refusal() {
                Some(message) => return Ok(ChargeResult::failed(message)),
                None => return Err(err),
            },
        };

        let Some(approval_url) = payment.link("approval_url") else {
            return Ok(ChargeResult::failed("paypal did not return an approval url"));
        };
        info!(
            order_id = %request.order_id,
            payment_id = %payment.id,
            "paypal payment created"
        );

        Ok(ChargeResult {
            success: true,
            transaction_id: Some(payment.id.clone()),
            authorization_url: Some(approval_url.to_string()),
            access_code: None,
            status: PaymentState::Pending,
            message: None,
        })
    }

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResult> {
        let payment_id = ensure_id(reference)?;
        match self
            .call::<PayPalPayment>(
                reqwest::Method::GET,
                &format!("/v1/payments/payment/{}", payment_id),
                RequestBody::Empty,
                &[],
            )
            .await
        {
            Ok(payment) => Ok(payment_to_verify_result(payment)),
            Err(err) => match err.refusal() {
                Some(message) => Ok(VerifyResult::failed(
                    payment_id,
                    PaymentState::Unknown,
                    message,
                )),
                None => Err(err),
            },
        }
    }

    async fn execute_payment(&self, payment_id: &str, payer_id: &str) -> PaymentResult<VerifyResult> {
        let payment_id = ensure_id(payment_id)?;
        let payer_id = ensure_id(payer_id)?;
        let payload = serde_json::json!({ "payer_id": payer_id });
        let request_id = format!("execute-{}", payment_id);

        match self
            .call::<PayPalPayment>(
                reqwest::Method::POST,
                &format!("/v1/payments/payment/{}/execute", payment_id),
                RequestBody::Json(&payload),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await
        {
            Ok(payment) => {
                info!(payment_id = %payment_id, state = %payment.state, "paypal payment executed");
                Ok(payment_to_verify_result(payment))
            }
            Err(err) => match err.refusal() {
                Some(message) => Ok(VerifyResult::failed(
                    payment_id,
                    PaymentState::Unknown,
                    message,
                )),
                None => Err(err),
            },
        }
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
        let payment_id = ensure_id(&request.transaction_id)?;
        let sale_id = self.sale_id_for(payment_id).await?;

        let mut payload = serde_json::json!({});
        if let Some(amount) = &request.amount {
            payload["amount"] = serde_json::json!({
                "total": format_major_units(amount),
                "currency": request.currency.as_deref().unwrap_or("USD"),
            });
        }
        if let Some(reason) = &request.reason {
            payload["description"] = serde_json::json!(reason);
        }
        // a sale is refunded once, so the sale id keys resends of the same refund
        let request_id = format!("refund-{}", sale_id);

        let refund: PayPalRefund = match self
            .call(
                reqwest::Method::POST,
                &format!("/v1/payments/sale/{}/refund", sale_id),
                RequestBody::Json(&payload),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await
        {
            Ok(refund) => refund,
            Err(err) => match err.refusal() {
                Some(message) => return Ok(RefundResult::failed(message)),
                None => return Err(err),
            },
        };
        info!(sale_id = %sale_id, refund_id = %refund.id, state = %refund.state, "paypal refund created");

        Ok(RefundResult {
            success: matches!(refund.state.as_str(), "completed" | "pending"),
            refund_id: Some(refund.id),
            amount_refunded: refund
                .amount
                .and_then(|a| BigDecimal::from_str(&a.total).ok()),
            status: refund.state,
            message: None,
        })
    }

    async fn verify_webhook(
        &self,
        _raw_body: &[u8],
        headers: &HeaderMap,
        event: &JsonValue,
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(webhook_id) = self.config.webhook_id.as_deref() else {
            warn!("PAYPAL_WEBHOOK_ID is not configured, rejecting paypal webhook");
            return Ok(WebhookVerificationResult::invalid(
                "paypal webhook id is not configured",
            ));
        };

        let mut values = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match headers.get(name).and_then(|v| v.to_str().ok()) {
                Some(value) => values.push(value),
                None => {
                    return Ok(WebhookVerificationResult::invalid(format!(
                        "missing {} header",
                        name
                    )))
                }
            }
        }

        let payload = serde_json::json!({
            "auth_algo": values[0],
            "cert_url": values[1],
            "transmission_id": values[2],
            "transmission_sig": values[3],
            "transmission_time": values[4],
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let response: PayPalWebhookVerification = self
            .call(
                reqwest::Method::POST,
                "/v1/notifications/verify-webhook-signature",
                RequestBody::Json(&payload),
                &[],
            )
            .await?;

        if response.verification_status.eq_ignore_ascii_case("SUCCESS") {
            Ok(WebhookVerificationResult::valid())
        } else {
            Ok(WebhookVerificationResult::invalid(format!(
                "paypal verification status {}",
                response.verification_status
            )))
        }
    }

    fn parse_webhook_event(&self, event: &JsonValue) -> PaymentResult<WebhookEvent> {
        let event_id = event
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::MalformedEvent {
                message: "paypal event is missing 'id'".to_string(),
            })?
            .to_string();
        let event_type = event
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let resource = event.get("resource").cloned().unwrap_or(JsonValue::Null);

        let outcome = match event_type.as_str() {
            "PAYMENT.SALE.COMPLETED" => WebhookOutcome::Completed,
            "PAYMENT.SALE.DENIED" => WebhookOutcome::Failed,
            "PAYMENT.SALE.REFUNDED" | "PAYMENT.SALE.REVERSED" => WebhookOutcome::Refunded,
            _ => WebhookOutcome::Ignored,
        };

        // sale resources point back at the payment id stored on the order
        let reference = resource
            .get("parent_payment")
            .or_else(|| resource.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let amount = resource.get("amount");

        Ok(WebhookEvent {
            provider: ProviderName::PayPal,
            event_id,
            event_type,
            reference,
            outcome,
            amount: amount
                .and_then(|a| a.get("total"))
                .and_then(|v| v.as_str())
                .and_then(|total| BigDecimal::from_str(total).ok()),
            currency: amount
                .and_then(|a| a.get("currency"))
                .and_then(|v| v.as_str())
                .map(str::to_uppercase),
            payload: event.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PayPalTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PayPalPayment {
    id: String,
    state: String,
    #[serde(default)]
    links: Vec<PayPalLink>,
    #[serde(default)]
    transactions: Vec<PayPalTransaction>,
    #[serde(default)]
    payer: Option<PayPalPayer>,
}

impl PayPalPayment {
    fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
    }

    fn sale(&self) -> Option<&PayPalSale> {
        self.transactions
            .iter()
            .flat_map(|t| t.related_resources.iter())
            .find_map(|r| r.sale.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct PayPalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PayPalTransaction {
    amount: PayPalAmount,
    #[serde(default)]
    related_resources: Vec<PayPalRelatedResource>,
}

#[derive(Debug, Deserialize)]
struct PayPalAmount {
    total: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PayPalRelatedResource {
    #[serde(default)]
    sale: Option<PayPalSale>,
}

#[derive(Debug, Deserialize)]
struct PayPalSale {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayPalPayer {
    #[serde(default)]
    payer_info: Option<PayPalPayerInfo>,
}

#[derive(Debug, Deserialize)]
struct PayPalPayerInfo {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalRefund {
    id: String,
    state: String,
    #[serde(default)]
    amount: Option<PayPalAmount>,
}

#[derive(Debug, Deserialize)]
struct PayPalWebhookVerification {
    verification_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use uuid::Uuid;

    fn provider(webhook_id: Option<&str>) -> PayPalProvider {
        PayPalProvider::new(
            PayPalConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                base_url: "https://api.sandbox.paypal.com".to_string(),
                webhook_id: webhook_id.map(str::to_string),
                token_ttl: Duration::from_secs(8 * 3600),
                timeout_secs: 5,
                max_retries: 0,
            },
            Arc::new(AccessTokenCache::new()),
        )
        .expect("provider init should succeed")
    }

    #[test]
    fn create_payload_formats_amount_and_redirects() {
        let order_id = Uuid::new_v4();
        let payload = PayPalProvider::create_payload(&ChargeRequest {
            order_id,
            amount: BigDecimal::from_str("49.9").expect("decimal"),
            currency: "USD".to_string(),
            email: None,
            method: PaymentMethod::Paypal,
            reference: "QC-1".to_string(),
            return_url: "http://localhost:3000/payment-success".to_string(),
            cancel_url: "http://localhost:3000/payment-cancel".to_string(),
            description: "QuickCart order".to_string(),
        });

        assert_eq!(payload["intent"], "sale");
        assert_eq!(payload["transactions"][0]["amount"]["total"], "49.90");
        assert_eq!(
            payload["transactions"][0]["item_list"]["items"][0]["sku"],
            order_id.to_string()
        );
        assert_eq!(
            payload["redirect_urls"]["cancel_url"],
            "http://localhost:3000/payment-cancel"
        );
    }

    #[test]
    fn payment_response_exposes_links_and_sale() {
        let payment: PayPalPayment = serde_json::from_value(serde_json::json!({
            "id": "PAYID-123",
            "state": "approved",
            "links": [
                { "href": "https://api/self", "rel": "self", "method": "GET" },
                { "href": "https://paypal/approve", "rel": "approval_url", "method": "REDIRECT" }
            ],
            "transactions": [{
                "amount": { "total": "49.90", "currency": "USD" },
                "related_resources": [{ "sale": { "id": "SALE-9", "state": "completed" } }]
            }],
            "payer": { "payer_info": { "email": "buyer@example.com" } }
        }))
        .expect("payment json");

        assert_eq!(payment.link("approval_url"), Some("https://paypal/approve"));
        assert_eq!(payment.sale().map(|s| s.id.as_str()), Some("SALE-9"));

        let result = payment_to_verify_result(payment);
        assert!(result.success);
        assert_eq!(result.amount, Some(BigDecimal::from_str("49.90").expect("decimal")));
        assert_eq!(result.customer_email.as_deref(), Some("buyer@example.com"));
    }

    #[test]
    fn payment_states_map() {
        assert_eq!(map_payment_state("approved"), PaymentState::Success);
        assert_eq!(map_payment_state("created"), PaymentState::Pending);
        assert!(map_payment_state("failed").is_definitive_failure());
        assert_eq!(map_payment_state("weird"), PaymentState::Unknown);
    }

    #[test]
    fn parses_sale_events() {
        let provider = provider(None);
        let event = provider
            .parse_webhook_event(&serde_json::json!({
                "id": "WH-1",
                "event_type": "PAYMENT.SALE.COMPLETED",
                "resource": {
                    "id": "SALE-9",
                    "parent_payment": "PAYID-123",
                    "state": "completed",
                    "amount": { "total": "99.90", "currency": "usd" }
                }
            }))
            .expect("event");
        assert_eq!(event.outcome, WebhookOutcome::Completed);
        assert_eq!(event.amount, BigDecimal::from_str("99.90").ok());
        assert_eq!(event.currency.as_deref(), Some("USD"));
        assert_eq!(event.reference.as_deref(), Some("PAYID-123"));
        assert_eq!(event.event_id, "WH-1");

        let refunded = provider
            .parse_webhook_event(&serde_json::json!({
                "id": "WH-2",
                "event_type": "PAYMENT.SALE.REFUNDED",
                "resource": { "id": "REF-1", "parent_payment": "PAYID-123" }
            }))
            .expect("event");
        assert_eq!(refunded.outcome, WebhookOutcome::Refunded);

        assert!(provider
            .parse_webhook_event(&serde_json::json!({ "event_type": "X" }))
            .is_err());
    }

    #[tokio::test]
    async fn webhook_rejected_without_webhook_id_or_headers() {
        let event = serde_json::json!({ "id": "WH-1" });

        let unconfigured = provider(None)
            .verify_webhook(b"{}", &HeaderMap::new(), &event)
            .await
            .expect("no network call");
        assert!(!unconfigured.valid);

        let missing_headers = provider(Some("WH-ID"))
            .verify_webhook(b"{}", &HeaderMap::new(), &event)
            .await
            .expect("no network call");
        assert!(!missing_headers.valid);
        assert!(missing_headers
            .reason
            .unwrap_or_default()
            .contains("paypal-auth-algo"));
    }

    #[test]
    fn ids_are_sanitized() {
        assert!(ensure_id("PAYID-LXYZ123").is_ok());
        assert!(ensure_id("PAY/../1").is_err());
    }
}
