//! Payment Orchestrator Service
//!
//! Drives an order's payment through the configured providers: intent creation,
//! provider confirmation (Paystack verify, PayPal execute) and refunds. Every status
//! write goes through the version-checked transition in `payment_state`, and anything
//! the provider confirmed but we could not apply is dead-lettered to `payment_events`.

use crate::database::order_repository::{Order, OrderStore, PaymentStatus, PaymentUpdate};
use crate::database::payment_event_repository::{
    NewPaymentEvent, PaymentEventStatus, PaymentEventStore, RECONCILIATION_EVENT_PREFIX,
};
use crate::error::{
    AppError, AppErrorKind, AppResult, AuthError, DomainError, ExternalError, ValidationError,
};
use crate::middleware::auth::AuthUser;
use crate::payments::registry::PaymentRegistry;
use crate::payments::types::{
    ChargeRequest, PaymentMethod, ProviderName, RefundRequest, VerifyResult,
};
use crate::logging::{mask_email, mask_reference};
use crate::services::payment_state::{
    invalid_transition, settlement_mismatch, update_payment_with_retry,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base URL of the storefront; provider redirects land on its payment pages
    pub frontend_url: String,
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
    pub order: Order,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    pub refund_id: String,
    pub order: Order,
}

pub struct PaymentOrchestrator {
    orders: Arc<dyn OrderStore>,
    events: Arc<dyn PaymentEventStore>,
    registry: PaymentRegistry,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        events: Arc<dyn PaymentEventStore>,
        registry: PaymentRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            orders,
            events,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &PaymentRegistry {
        &self.registry
    }

    /// Our own provider reference, unique per intent
    pub fn generate_reference(order_id: Uuid) -> String {
        let order = order_id.simple().to_string();
        format!("QC-{}-{}", &order[..8], Uuid::new_v4().simple())
    }

    /// Start (or restart) payment of a pending order with the chosen method.
    pub async fn create_payment_intent(
        &self,
        user: &AuthUser,
        request: PaymentIntentRequest,
    ) -> AppResult<PaymentIntent> {
        let order = self.load_order(request.order_id).await?;
        if order.user_id != user.user_id {
            return Err(AuthError::Forbidden {
                reason: "order belongs to another user".to_string(),
            }
            .into());
        }
        if let Some(amount) = &request.amount {
            if amount != &order.amount {
                return Err(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: format!("order total is {}", order.amount),
                }
                .into());
            }
        }
        let currency = self.settlement_currency(request.currency.as_deref())?;

        let method = request.payment_method;
        let adapter = self.registry.adapter_for(method)?;
        let provider = method.provider();

        // Claim the order for this method before any provider call
        let order = update_payment_with_retry(self.orders.as_ref(), order, |current| {
            check_intent_allowed(current, method)?;
            Ok(Some(PaymentUpdate {
                payment_status: PaymentStatus::Pending,
                payment_method: Some(method),
                transaction_id: None,
                refund_id: None,
            }))
        })
        .await?;

        let reference = Self::generate_reference(order.id);
        let charge = ChargeRequest {
            order_id: order.id,
            amount: order.amount.clone(),
            currency,
            email: request.email.clone(),
            method,
            reference: reference.clone(),
            return_url: format!("{}/payment-success", self.config.frontend_url),
            cancel_url: format!("{}/payment-cancel", self.config.frontend_url),
            description: format!("QuickCart order {}", order.id),
        };

        info!(
            order_id = %order.id,
            method = %method,
            provider = %provider,
            reference = %reference,
            email = %request.email.as_deref().map(mask_email).unwrap_or_default(),
            "creating payment intent"
        );
        let result = adapter.process_payment(charge).await.map_err(|e| {
            warn!(order_id = %order.id, provider = %provider, error = %e, "payment intent failed");
            AppError::from(e)
        })?;
        if !result.success {
            return Err(provider_refusal(provider, result.message));
        }

        let transaction_id = result.transaction_id.clone().unwrap_or(reference);
        let settled_immediately = !adapter.requires_redirect();
        let next_status = if settled_immediately {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Pending
        };

        let committed = update_payment_with_retry(self.orders.as_ref(), order, |current| {
            if current.payment_status != PaymentStatus::Pending {
                return Err(invalid_transition(current, next_status));
            }
            // A concurrent intent may have re-claimed the order for the other provider
            if let Some(claimed) = current.payment_method {
                if claimed.provider() != provider {
                    return Err(DomainError::PaymentMethodConflict {
                        order_id: current.id.to_string(),
                        existing: claimed.to_string(),
                        requested: method.to_string(),
                    }
                    .into());
                }
            }
            Ok(Some(PaymentUpdate {
                payment_status: next_status,
                payment_method: Some(method),
                transaction_id: Some(transaction_id.clone()),
                refund_id: None,
            }))
        })
        .await;

        let order = match committed {
            Ok(order) => order,
            Err(err) => {
                self.dead_letter(
                    provider,
                    "intent_unlinked",
                    &transaction_id,
                    &err.to_string(),
                    serde_json::json!({ "orderId": request.order_id, "method": method }),
                )
                .await;
                return Err(err);
            }
        };

        info!(
            order_id = %order.id,
            transaction_id = %transaction_id,
            status = %order.payment_status,
            "payment intent created"
        );
        Ok(PaymentIntent {
            transaction_id,
            authorization_url: result.authorization_url,
            access_code: result.access_code,
            order,
        })
    }

    /// Confirm a Paystack payment by reference. Settled orders are returned untouched.
    pub async fn verify_payment(&self, reference: &str) -> AppResult<Order> {
        let order = self.orders.find_by_transaction_id(reference).await?;

        if let Some(order) = &order {
            if order.payment_status.is_settled() {
                info!(order_id = %order.id, status = %order.payment_status, "payment already settled");
                return Ok(order.clone());
            }
            ensure_provider(order, ProviderName::Paystack)?;
        }

        let adapter = self.registry.for_provider(ProviderName::Paystack)?;
        let result = adapter.verify_payment(reference).await?;

        let Some(order) = order else {
            if result.success {
                self.dead_letter(
                    ProviderName::Paystack,
                    "missing_order",
                    reference,
                    "provider confirmed a payment that matches no order",
                    verification_payload(&result),
                )
                .await;
                return Err(DomainError::ReconciliationGap {
                    provider: ProviderName::Paystack.to_string(),
                    reference: reference.to_string(),
                }
                .into());
            }
            return Err(DomainError::OrderNotFound {
                order_id: reference.to_string(),
            }
            .into());
        };

        self.apply_confirmation(order, ProviderName::Paystack, reference, &result)
            .await
    }

    /// Capture an approved PayPal payment.
    pub async fn execute_paypal_payment(
        &self,
        user: &AuthUser,
        payment_id: &str,
        payer_id: &str,
    ) -> AppResult<Order> {
        let order = self
            .orders
            .find_by_transaction_id(payment_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound {
                order_id: payment_id.to_string(),
            })?;
        ensure_owner_or_admin(user, &order)?;
        ensure_provider(&order, ProviderName::PayPal)?;

        if order.payment_status.is_settled() {
            info!(order_id = %order.id, "paypal payment already captured");
            return Ok(order);
        }
        if order.payment_status == PaymentStatus::Failed {
            return Err(invalid_transition(&order, PaymentStatus::Completed));
        }

        let adapter = self.registry.for_provider(ProviderName::PayPal)?;
        let result = adapter.execute_payment(payment_id, payer_id).await?;

        if !result.success && !result.state.is_definitive_failure() {
            return Err(provider_refusal(ProviderName::PayPal, result.message));
        }
        self.apply_confirmation(order, ProviderName::PayPal, payment_id, &result)
            .await
    }

    /// Refund a completed order in full. Repeated calls return the first refund.
    pub async fn refund_payment(
        &self,
        user: &AuthUser,
        transaction_id: &str,
        reason: Option<String>,
    ) -> AppResult<RefundOutcome> {
        let order = self
            .orders
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound {
                order_id: transaction_id.to_string(),
            })?;
        ensure_owner_or_admin(user, &order)?;

        if order.payment_status == PaymentStatus::Refunded {
            if let Some(refund_id) = order.refund_id.clone() {
                return Ok(RefundOutcome { refund_id, order });
            }
        }
        if order.payment_status != PaymentStatus::Completed {
            return Err(invalid_transition(&order, PaymentStatus::Refunded));
        }
        let (Some(method), Some(provider_tx)) =
            (order.payment_method, order.transaction_id.clone())
        else {
            return Err(invalid_transition(&order, PaymentStatus::Refunded));
        };

        let provider = method.provider();
        let adapter = self.registry.adapter_for(method)?;
        let result = adapter
            .refund_payment(RefundRequest {
                transaction_id: provider_tx.clone(),
                amount: None,
                currency: None,
                reason,
            })
            .await?;

        let refund_id = match (result.success, result.refund_id) {
            (true, Some(refund_id)) => refund_id,
            (_, _) => return Err(provider_refusal(provider, result.message)),
        };
        info!(
            order_id = %order.id,
            refund_id = %refund_id,
            provider = %provider,
            transaction = %mask_reference(&provider_tx),
            "refund issued"
        );

        let committed = update_payment_with_retry(self.orders.as_ref(), order, |current| {
            match current.payment_status {
                PaymentStatus::Refunded => Ok(None),
                PaymentStatus::Completed => Ok(Some(PaymentUpdate {
                    payment_status: PaymentStatus::Refunded,
                    payment_method: None,
                    transaction_id: None,
                    refund_id: Some(refund_id.clone()),
                })),
                _ => Err(invalid_transition(current, PaymentStatus::Refunded)),
            }
        })
        .await;

        match committed {
            Ok(order) => Ok(RefundOutcome {
                refund_id: order.refund_id.clone().unwrap_or(refund_id),
                order,
            }),
            Err(err) => {
                self.dead_letter(
                    provider,
                    "refund_uncommitted",
                    &provider_tx,
                    &err.to_string(),
                    serde_json::json!({ "refundId": refund_id }),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Map a provider confirmation onto the order
    async fn apply_confirmation(
        &self,
        order: Order,
        provider: ProviderName,
        reference: &str,
        result: &VerifyResult,
    ) -> AppResult<Order> {
        if result.success {
            let currency = &self.config.default_currency;
            if let Some(received) = settlement_mismatch(
                &order,
                currency,
                result.amount.as_ref(),
                result.currency.as_deref(),
            ) {
                let expected = format!("{} {}", order.amount, currency);
                self.dead_letter(
                    provider,
                    "amount_mismatch",
                    reference,
                    &format!("expected {}, provider reported {}", expected, received),
                    verification_payload(result),
                )
                .await;
                return Err(DomainError::AmountMismatch {
                    reference: reference.to_string(),
                    expected,
                    received,
                }
                .into());
            }

            if order.payment_status == PaymentStatus::Failed {
                // Money moved after we gave up on the order; needs an operator
                self.dead_letter(
                    provider,
                    "settled_after_failure",
                    reference,
                    "provider confirmed payment for a failed order",
                    verification_payload(result),
                )
                .await;
                return Err(invalid_transition(&order, PaymentStatus::Completed));
            }

            let order = update_payment_with_retry(self.orders.as_ref(), order, |current| {
                match current.payment_status {
                    PaymentStatus::Completed | PaymentStatus::Refunded => Ok(None),
                    PaymentStatus::Pending => {
                        Ok(Some(PaymentUpdate::status(PaymentStatus::Completed)))
                    }
                    PaymentStatus::Failed => {
                        Err(invalid_transition(current, PaymentStatus::Completed))
                    }
                }
            })
            .await?;
            info!(order_id = %order.id, provider = %provider, "payment completed");
            return Ok(order);
        }

        if result.state.is_definitive_failure() {
            let order = update_payment_with_retry(self.orders.as_ref(), order, |current| {
                match current.payment_status {
                    PaymentStatus::Pending => Ok(Some(PaymentUpdate::status(PaymentStatus::Failed))),
                    _ => Ok(None),
                }
            })
            .await?;
            warn!(
                order_id = %order.id,
                provider = %provider,
                state = ?result.state,
                "payment failed at provider"
            );
            return Ok(order);
        }

        info!(order_id = %order.id, state = ?result.state, "payment not yet settled");
        Ok(order)
    }

    /// Orders are priced in the store currency; a request may only restate it.
    fn settlement_currency(&self, requested: Option<&str>) -> AppResult<String> {
        let currency = self.config.default_currency.to_uppercase();
        match requested.map(str::trim) {
            None | Some("") => Ok(currency),
            Some(requested) if requested.eq_ignore_ascii_case(&currency) => Ok(currency),
            Some(requested) => Err(ValidationError::InvalidValue {
                field: "currency".to_string(),
                reason: format!("orders are charged in {}, not {}", currency, requested),
            }
            .into()),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> AppResult<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| {
                DomainError::OrderNotFound {
                    order_id: order_id.to_string(),
                }
                .into()
            })
    }

    /// Record a confirmed-but-unapplied provider outcome for operators and the retry worker
    async fn dead_letter(
        &self,
        provider: ProviderName,
        kind: &str,
        reference: &str,
        reason: &str,
        payload: serde_json::Value,
    ) {
        error!(
            provider = %provider,
            reference = %reference,
            kind = kind,
            reason = reason,
            "payment reconciliation gap"
        );
        let event = NewPaymentEvent {
            provider: provider.to_string(),
            event_id: format!("{}{}:{}", RECONCILIATION_EVENT_PREFIX, kind, reference),
            event_type: format!("{}{}", RECONCILIATION_EVENT_PREFIX, kind),
            reference: Some(reference.to_string()),
            payload,
            status: PaymentEventStatus::Unreconciled,
            reason: Some(reason.to_string()),
        };
        if let Err(e) = self.events.record(event).await {
            error!(error = %e, reference = %reference, "failed to dead-letter reconciliation gap");
        }
    }
}

fn check_intent_allowed(order: &Order, method: PaymentMethod) -> AppResult<()> {
    if order.payment_status != PaymentStatus::Pending {
        return Err(invalid_transition(order, PaymentStatus::Pending));
    }
    if let (Some(existing), Some(_)) = (order.payment_method, &order.transaction_id) {
        if existing.provider() != method.provider() {
            return Err(DomainError::PaymentMethodConflict {
                order_id: order.id.to_string(),
                existing: existing.to_string(),
                requested: method.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn ensure_provider(order: &Order, provider: ProviderName) -> AppResult<()> {
    match order.payment_method {
        Some(method) if method.provider() == provider => Ok(()),
        other => Err(DomainError::PaymentMethodMismatch {
            order_id: order.id.to_string(),
            provider: provider.to_string(),
            order_method: other.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string()),
        }
        .into()),
    }
}

fn ensure_owner_or_admin(user: &AuthUser, order: &Order) -> AppResult<()> {
    if order.user_id == user.user_id || user.role.is_admin() {
        Ok(())
    } else {
        Err(AuthError::Forbidden {
            reason: "order belongs to another user".to_string(),
        }
        .into())
    }
}

fn provider_refusal(provider: ProviderName, message: Option<String>) -> AppError {
    AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
        provider: provider.to_string(),
        message: message.unwrap_or_else(|| "request declined by provider".to_string()),
        is_retryable: false,
    }))
}

fn verification_payload(result: &VerifyResult) -> serde_json::Value {
    serde_json::json!({
        "transactionId": result.transaction_id,
        "state": result.state,
        "amount": result.amount.as_ref().map(|a| a.to_string()),
        "currency": result.currency,
        "gatewayResponse": result.gateway_response,
    })
}
