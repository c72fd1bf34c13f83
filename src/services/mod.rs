//! Services module for business logic

pub mod order_service;
pub mod payment_orchestrator;
pub mod payment_state;
pub mod tracking;
pub mod webhook_processor;

pub use order_service::{CreateOrderRequest, OrderLine, OrderService};
pub use payment_orchestrator::{
    OrchestratorConfig, PaymentIntent, PaymentIntentRequest, PaymentOrchestrator, RefundOutcome,
};
pub use tracking::{TrackingService, TrackingUpdateRequest};
pub use webhook_processor::{WebhookDisposition, WebhookProcessor};
