//! Compare-and-swap payment transitions shared by the orchestrator and the webhook receiver.

use crate::database::order_repository::{Order, OrderStore, PaymentStatus, PaymentUpdate};
use crate::error::{AppError, AppResult, DomainError};
use bigdecimal::BigDecimal;
use tracing::warn;

/// Attempts before giving up with `ConcurrentModification`
pub const MAX_CAS_ATTEMPTS: usize = 3;

pub fn invalid_transition(order: &Order, to: PaymentStatus) -> AppError {
    DomainError::InvalidPaymentTransition {
        order_id: order.id.to_string(),
        from: order.payment_status.to_string(),
        to: to.to_string(),
    }
    .into()
}

/// What the provider reported for a settlement, when it is not exactly what the order is owed.
///
/// Both amount and currency must be present and equal; anything else is a mismatch.
pub fn settlement_mismatch(
    order: &Order,
    expected_currency: &str,
    amount: Option<&BigDecimal>,
    currency: Option<&str>,
) -> Option<String> {
    let amount_matches = amount.is_some_and(|a| a == &order.amount);
    let currency_matches = currency.is_some_and(|c| c.eq_ignore_ascii_case(expected_currency));
    if amount_matches && currency_matches {
        return None;
    }
    Some(format!(
        "{} {}",
        amount.map(ToString::to_string).unwrap_or_else(|| "unknown".to_string()),
        currency.unwrap_or("unknown")
    ))
}

/// Apply the update chosen by `decide` to the freshest copy of the order.
///
/// `decide` runs again after every lost race, so its checks always see current state.
/// Returning `Ok(None)` means there is nothing to do and the current order is returned.
pub async fn update_payment_with_retry<F>(
    orders: &dyn OrderStore,
    mut order: Order,
    decide: F,
) -> AppResult<Order>
where
    F: Fn(&Order) -> AppResult<Option<PaymentUpdate>>,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let Some(update) = decide(&order)? else {
            return Ok(order);
        };
        if !order.payment_status.can_transition_to(update.payment_status) {
            return Err(invalid_transition(&order, update.payment_status));
        }

        if let Some(updated) = orders
            .update_payment(order.id, order.version, update)
            .await?
        {
            return Ok(updated);
        }

        warn!(
            order_id = %order.id,
            attempt,
            "order changed concurrently, reloading"
        );
        order = orders
            .find_by_id(order.id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound {
                order_id: order.id.to_string(),
            })?;
    }

    Err(DomainError::ConcurrentModification {
        order_id: order.id.to_string(),
    }
    .into())
}
