//! Shared fixtures: a scripted payment gateway and services wired to in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use quickcart_backend::api::AppState;
use quickcart_backend::health::HealthChecker;
use quickcart_backend::database::memory::{
    InMemoryOrderStore, InMemoryPaymentEventStore, InMemoryProductCatalog,
};
use quickcart_backend::database::order_repository::{Address, Order};
use quickcart_backend::database::product_repository::Product;
use quickcart_backend::middleware::auth::{AuthUser, JwtVerifier, UserRole};
use quickcart_backend::payments::{
    ChargeRequest, ChargeResult, PaymentError, PaymentProvider, PaymentRegistry, PaymentResult,
    PaymentState,
    ProviderName, RefundRequest, RefundResult, VerifyResult, WebhookEvent, WebhookOutcome,
    WebhookVerificationResult,
};
use quickcart_backend::services::{
    CreateOrderRequest, OrchestratorConfig, OrderLine, OrderService, PaymentOrchestrator,
    TrackingService, WebhookProcessor,
};

pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";

/// Seller account that lists the headphones
pub const SELLER_ID: Uuid = Uuid::from_u128(0x5e11e7);

/// Gateway double. Remembers what was charged per transaction and reports it back on
/// verify/execute unless told otherwise.
pub struct MockProvider {
    name: ProviderName,
    redirect: bool,
    charged: Mutex<HashMap<String, BigDecimal>>,
    reported_amount: Mutex<Option<BigDecimal>>,
    reported_currency: Mutex<String>,
    state: Mutex<PaymentState>,
    latency: Mutex<Duration>,
    timing_out: AtomicBool,
    counter: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: ProviderName) -> Arc<Self> {
        Arc::new(Self {
            name,
            redirect: true,
            charged: Mutex::new(HashMap::new()),
            reported_amount: Mutex::new(None),
            reported_currency: Mutex::new("USD".to_string()),
            state: Mutex::new(PaymentState::Success),
            latency: Mutex::new(Duration::ZERO),
            timing_out: AtomicBool::new(false),
            counter: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        })
    }

    pub fn report_amount(&self, amount: &str) {
        *self.reported_amount.lock().expect("lock") =
            Some(BigDecimal::from_str(amount).expect("decimal"));
    }

    pub fn report_currency(&self, currency: &str) {
        *self.reported_currency.lock().expect("lock") = currency.to_string();
    }

    pub fn report_state(&self, state: PaymentState) {
        *self.state.lock().expect("lock") = state;
    }

    /// Every gateway call takes this long before answering
    pub fn set_latency(&self, millis: u64) {
        *self.latency.lock().expect("lock") = Duration::from_millis(millis);
    }

    /// Every gateway call fails as if the provider never answered
    pub fn time_out(&self) {
        self.timing_out.store(true, Ordering::SeqCst);
    }

    async fn respond(&self) -> PaymentResult<()> {
        let latency = *self.latency.lock().expect("lock");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.timing_out.load(Ordering::SeqCst) {
            return Err(PaymentError::Timeout {
                provider: self.name.to_string(),
                timeout_secs: 30,
            });
        }
        Ok(())
    }

    fn confirmation(&self, transaction_id: &str) -> VerifyResult {
        let state = *self.state.lock().expect("lock");
        let amount = self
            .reported_amount
            .lock()
            .expect("lock")
            .clone()
            .or_else(|| self.charged.lock().expect("lock").get(transaction_id).cloned());
        VerifyResult {
            success: state == PaymentState::Success,
            state,
            transaction_id: transaction_id.to_string(),
            amount,
            currency: Some(self.reported_currency.lock().expect("lock").clone()),
            customer_email: None,
            gateway_response: Some(format!("{:?}", state)),
            message: None,
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn requires_redirect(&self) -> bool {
        self.redirect
    }

    async fn process_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        self.respond().await?;
        let transaction_id = match self.name {
            // PayPal assigns its own payment id
            ProviderName::PayPal => format!(
                "PAYID-{}",
                self.counter.fetch_add(1, Ordering::SeqCst) + 1
            ),
            ProviderName::Paystack => request.reference.clone(),
        };
        self.charged
            .lock()
            .expect("lock")
            .insert(transaction_id.clone(), request.amount.clone());
        Ok(ChargeResult {
            success: true,
            transaction_id: Some(transaction_id.clone()),
            authorization_url: Some(format!("https://checkout.example/{}", transaction_id)),
            access_code: Some("ac_mock".to_string()),
            status: PaymentState::Pending,
            message: None,
        })
    }

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        Ok(self.confirmation(reference))
    }

    async fn execute_payment(&self, payment_id: &str, _payer_id: &str) -> PaymentResult<VerifyResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        Ok(self.confirmation(payment_id))
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
        let n = self.refund_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.respond().await?;
        Ok(RefundResult {
            success: true,
            refund_id: Some(format!("RF-{}-{}", request.transaction_id, n)),
            status: "completed".to_string(),
            amount_refunded: request.amount,
            message: None,
        })
    }

    async fn verify_webhook(
        &self,
        _raw_body: &[u8],
        headers: &HeaderMap,
        _event: &JsonValue,
    ) -> PaymentResult<WebhookVerificationResult> {
        match headers.get(MOCK_SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some("ok") => Ok(WebhookVerificationResult::valid()),
            _ => Ok(WebhookVerificationResult::invalid("bad mock signature")),
        }
    }

    /// `{ "id", "type": "completed|failed|refunded|other", "reference", "amount"?, "currency"? }`
    fn parse_webhook_event(&self, event: &JsonValue) -> PaymentResult<WebhookEvent> {
        let kind = event["type"].as_str().unwrap_or("other").to_string();
        let outcome = match kind.as_str() {
            "completed" => WebhookOutcome::Completed,
            "failed" => WebhookOutcome::Failed,
            "refunded" => WebhookOutcome::Refunded,
            _ => WebhookOutcome::Ignored,
        };
        Ok(WebhookEvent {
            provider: self.name,
            event_id: event["id"].as_str().unwrap_or("evt").to_string(),
            event_type: kind,
            reference: event["reference"].as_str().map(str::to_string),
            outcome,
            amount: event["amount"]
                .as_str()
                .and_then(|a| BigDecimal::from_str(a).ok()),
            currency: event["currency"].as_str().map(str::to_string),
            payload: event.clone(),
        })
    }
}

pub struct Harness {
    pub orders_store: Arc<InMemoryOrderStore>,
    pub events: Arc<InMemoryPaymentEventStore>,
    pub paypal: Arc<MockProvider>,
    pub paystack: Arc<MockProvider>,
    pub orders: Arc<OrderService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub tracking: Arc<TrackingService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub headphones: Product,
    pub registry: PaymentRegistry,
}

impl Harness {
    pub async fn new() -> Self {
        let orders_store = Arc::new(InMemoryOrderStore::new());
        let events = Arc::new(InMemoryPaymentEventStore::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());

        let headphones = Product {
            id: Uuid::new_v4(),
            name: "Wireless Headphones".to_string(),
            price: BigDecimal::from_str("120.00").expect("decimal"),
            offer_price: BigDecimal::from_str("49.95").expect("decimal"),
            seller_id: Some(SELLER_ID),
        };
        catalog.insert(headphones.clone()).await;

        let paypal = MockProvider::new(ProviderName::PayPal);
        let paystack = MockProvider::new(ProviderName::Paystack);
        let registry = PaymentRegistry::new(
            Some(paypal.clone() as Arc<dyn PaymentProvider>),
            Some(paystack.clone() as Arc<dyn PaymentProvider>),
        );

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            orders_store.clone(),
            events.clone(),
            registry.clone(),
            OrchestratorConfig {
                frontend_url: "http://localhost:3000".to_string(),
                default_currency: "USD".to_string(),
            },
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            orders_store.clone(),
            events.clone(),
            registry.clone(),
            "USD",
        ));

        Self {
            orders: Arc::new(OrderService::new(orders_store.clone(), catalog)),
            tracking: Arc::new(TrackingService::new(orders_store.clone())),
            orchestrator,
            webhooks,
            orders_store,
            events,
            paypal,
            paystack,
            headphones,
            registry,
        }
    }

    pub fn app_state(&self, jwt: Arc<JwtVerifier>) -> AppState {
        AppState {
            orders: self.orders.clone(),
            orchestrator: self.orchestrator.clone(),
            tracking: self.tracking.clone(),
            webhooks: self.webhooks.clone(),
            jwt,
            health_checker: HealthChecker::new(None, self.registry.clone()),
        }
    }

    /// Two headphones: 99.90
    pub async fn place_order(&self, user: &AuthUser) -> Order {
        self.orders
            .create_order(
                user,
                CreateOrderRequest {
                    items: vec![OrderLine {
                        product_id: self.headphones.id,
                        quantity: 2,
                    }],
                    address: address(),
                },
            )
            .await
            .expect("order placed")
    }
}

pub fn user(role: UserRole) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role,
    }
}

pub fn address() -> Address {
    Address {
        full_name: "Ada Obi".to_string(),
        phone_number: "+2348000000000".to_string(),
        pincode: "100001".to_string(),
        area: "Yaba".to_string(),
        city: "Lagos".to_string(),
        state: "Lagos".to_string(),
    }
}

pub fn decimal(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).expect("decimal")
}
