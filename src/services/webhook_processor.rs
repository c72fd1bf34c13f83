use http::HeaderMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::order_repository::{OrderStore, PaymentStatus, PaymentUpdate};
use crate::database::payment_event_repository::{
    NewPaymentEvent, PaymentEvent, PaymentEventStatus, PaymentEventStore,
};
use crate::error::{AppResult, AuthError, ValidationError};
use crate::payments::registry::PaymentRegistry;
use crate::payments::types::{PaymentMethod, ProviderName, WebhookEvent, WebhookOutcome};
use crate::services::payment_state::{
    invalid_transition, settlement_mismatch, update_payment_with_retry,
};

/// What happened to an authenticated notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    Processed,
    Duplicate,
    Unreconciled,
    /// Authentic but not understood; acknowledged so the provider stops redelivering
    Rejected,
}

enum Reconciliation {
    Processed(Option<String>),
    Unreconciled(String),
}

pub struct WebhookProcessor {
    orders: Arc<dyn OrderStore>,
    events: Arc<dyn PaymentEventStore>,
    registry: PaymentRegistry,
    /// Currency every order is priced in; completions in anything else are not applied
    currency: String,
}

impl WebhookProcessor {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        events: Arc<dyn PaymentEventStore>,
        registry: PaymentRegistry,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            events,
            registry,
            currency: currency.into().to_uppercase(),
        }
    }

    /// `paypal`, `paystack` and the Paystack-backed method names all resolve to a provider
    pub fn parse_provider(value: &str) -> AppResult<ProviderName> {
        PaymentMethod::from_str(value)
            .map(|m| m.provider())
            .map_err(|_| {
                ValidationError::InvalidValue {
                    field: "provider".to_string(),
                    reason: format!("unknown payment provider '{}'", value),
                }
                .into()
            })
    }

    /// Authenticate, record and apply one provider notification.
    ///
    /// Nothing is recorded for unauthenticated requests. Once authentic, the event is
    /// acknowledged even when it cannot be applied; such events are dead-lettered.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        raw_body: &[u8],
        headers: &HeaderMap,
        payload: &JsonValue,
    ) -> AppResult<WebhookDisposition> {
        let provider = Self::parse_provider(provider_name)?;
        let adapter = self.registry.for_provider(provider)?;

        let verification = adapter.verify_webhook(raw_body, headers, payload).await?;
        if !verification.valid {
            warn!(
                provider = %provider,
                reason = verification.reason.as_deref().unwrap_or("unknown"),
                "rejected webhook with invalid signature"
            );
            return Err(AuthError::InvalidToken {
                reason: "invalid webhook signature".to_string(),
            }
            .into());
        }

        let event = match adapter.parse_webhook_event(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = %provider, error = %e, "authentic webhook could not be parsed");
                return Ok(WebhookDisposition::Rejected);
            }
        };

        let Some(recorded) = self
            .events
            .record(NewPaymentEvent {
                provider: provider.to_string(),
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                reference: event.reference.clone(),
                payload: payload.clone(),
                status: PaymentEventStatus::Received,
                reason: None,
            })
            .await?
        else {
            info!(provider = %provider, event_id = %event.event_id, "duplicate webhook acknowledged");
            return Ok(WebhookDisposition::Duplicate);
        };

        let disposition = self.settle(&recorded, &event).await?;
        info!(
            provider = %provider,
            event_id = %event.event_id,
            event_type = %event.event_type,
            disposition = ?disposition,
            "webhook handled"
        );
        Ok(disposition)
    }

    /// Replay dead-lettered notifications; returns how many were applied.
    pub async fn retry_unreconciled(&self, max_attempts: i32, batch_size: i64) -> AppResult<usize> {
        let pending = self.events.list_replayable(max_attempts, batch_size).await?;
        let mut resolved = 0;

        for stored in pending {
            self.events.increment_retry(stored.id).await?;

            let parsed = ProviderName::from_str(&stored.provider)
                .and_then(|p| self.registry.for_provider(p))
                .and_then(|adapter| adapter.parse_webhook_event(&stored.payload));
            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    warn!(event_id = %stored.event_id, error = %e, "cannot replay stored webhook");
                    continue;
                }
            };

            if self.settle(&stored, &event).await? == WebhookDisposition::Processed {
                resolved += 1;
            }
        }

        Ok(resolved)
    }

    async fn settle(
        &self,
        stored: &PaymentEvent,
        event: &WebhookEvent,
    ) -> AppResult<WebhookDisposition> {
        match self.reconcile(event).await {
            Reconciliation::Processed(note) => {
                self.events
                    .mark(stored.id, PaymentEventStatus::Processed, note)
                    .await?;
                Ok(WebhookDisposition::Processed)
            }
            Reconciliation::Unreconciled(reason) => {
                error!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    reference = event.reference.as_deref().unwrap_or("none"),
                    reason = %reason,
                    "webhook dead-lettered"
                );
                self.events
                    .mark(stored.id, PaymentEventStatus::Unreconciled, Some(reason))
                    .await?;
                Ok(WebhookDisposition::Unreconciled)
            }
        }
    }

    async fn reconcile(&self, event: &WebhookEvent) -> Reconciliation {
        if event.outcome == WebhookOutcome::Ignored {
            return Reconciliation::Processed(Some(format!("ignored {}", event.event_type)));
        }
        let Some(reference) = event.reference.as_deref() else {
            return Reconciliation::Unreconciled("event carries no payment reference".to_string());
        };

        let order = match self.orders.find_by_transaction_id(reference).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                return Reconciliation::Unreconciled(format!("no order for reference {}", reference))
            }
            Err(e) => return Reconciliation::Unreconciled(e.to_string()),
        };

        match order.payment_method {
            Some(method) if method.provider() == event.provider => {}
            other => {
                return Reconciliation::Unreconciled(format!(
                    "order {} is paid via {}, not {}",
                    order.id,
                    other.map(|m| m.as_str()).unwrap_or("none"),
                    event.provider
                ))
            }
        }

        let target = match event.outcome {
            WebhookOutcome::Completed => {
                if let Some(received) = settlement_mismatch(
                    &order,
                    &self.currency,
                    event.amount.as_ref(),
                    event.currency.as_deref(),
                ) {
                    return Reconciliation::Unreconciled(format!(
                        "order {} expects {} {}, provider reported {}",
                        order.id, order.amount, self.currency, received
                    ));
                }
                PaymentStatus::Completed
            }
            WebhookOutcome::Failed => PaymentStatus::Failed,
            WebhookOutcome::Refunded => {
                // Refunds are only initiated through the refund operation
                return if order.payment_status == PaymentStatus::Refunded {
                    Reconciliation::Processed(None)
                } else {
                    Reconciliation::Unreconciled(format!(
                        "provider reports refund for {} order {}",
                        order.payment_status, order.id
                    ))
                };
            }
            WebhookOutcome::Ignored => return Reconciliation::Processed(None),
        };

        let order_id = order.id;
        let result = update_payment_with_retry(self.orders.as_ref(), order, |current| {
            match (current.payment_status, target) {
                (PaymentStatus::Pending, _) => Ok(Some(PaymentUpdate::status(target))),
                // Already settled the same way, or a late failure after success
                (PaymentStatus::Completed | PaymentStatus::Refunded, _) => Ok(None),
                (PaymentStatus::Failed, PaymentStatus::Failed) => Ok(None),
                (PaymentStatus::Failed, _) => Err(invalid_transition(current, target)),
            }
        })
        .await;

        match result {
            Ok(updated) if updated.payment_status == target => {
                info!(order_id = %order_id, status = %target, "order updated from webhook");
                Reconciliation::Processed(None)
            }
            Ok(updated) => Reconciliation::Processed(Some(format!(
                "order already {}",
                updated.payment_status
            ))),
            Err(e) => Reconciliation::Unreconciled(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_field_accepts_method_names() {
        assert_eq!(
            WebhookProcessor::parse_provider("paypal").expect("paypal"),
            ProviderName::PayPal
        );
        assert_eq!(
            WebhookProcessor::parse_provider("mobile_money").expect("mobile money"),
            ProviderName::Paystack
        );
        assert_eq!(
            WebhookProcessor::parse_provider("card").expect("card"),
            ProviderName::Paystack
        );
        let err = WebhookProcessor::parse_provider("stripe").expect_err("unknown");
        assert_eq!(err.status_code(), 400);
    }
}
