use crate::payments::error::PaymentResult;
use crate::payments::types::{
    ChargeRequest, ChargeResult, PaymentState, ProviderName, RefundRequest, RefundResult,
    VerifyResult, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;
use http::HeaderMap;
use serde_json::Value as JsonValue;

/// Uniform contract over the payment gateways.
///
/// Provider-side refusals come back as `success: false` results; `Err` is reserved for
/// transport failures, timeouts and malformed responses.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Whether the customer must be sent to a provider-hosted page to approve
    fn requires_redirect(&self) -> bool;

    async fn process_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResult>;

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResult>;

    /// Second phase for providers that split approval and capture
    async fn execute_payment(&self, payment_id: &str, _payer_id: &str) -> PaymentResult<VerifyResult> {
        Ok(VerifyResult::failed(
            payment_id,
            PaymentState::Unknown,
            format!("{} does not support payment execution", self.name()),
        ))
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResult>;

    async fn verify_webhook(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        event: &JsonValue,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, event: &JsonValue) -> PaymentResult<WebhookEvent>;
}
