//! Shipment tracking: staff append history entries, customers and the public read them.

use crate::database::order_repository::{
    FulfillmentStatus, Order, OrderStore, PaymentStatus, TrackingAppend, TrackingEntry,
    TrackingStatus,
};
use crate::error::{AppResult, AuthError, DomainError, ValidationError};
use crate::middleware::auth::AuthUser;
use crate::services::payment_state::MAX_CAS_ATTEMPTS;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingUpdateRequest {
    pub status: TrackingStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Tracking state as seen by the owner and staff
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTracking {
    pub order_id: Uuid,
    pub tracking_number: Option<String>,
    pub tracking_status: TrackingStatus,
    pub tracking_history: Vec<TrackingEntry>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderTracking {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            tracking_number: order.tracking_number.clone(),
            tracking_status: order.tracking_status,
            tracking_history: order.tracking_history.clone(),
            estimated_delivery: order.estimated_delivery,
            status: order.status,
            payment_status: order.payment_status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicItem {
    pub name: String,
    pub quantity: i32,
}

/// Anonymous lookup by tracking number; carries no user or payment data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTracking {
    pub order_id: Uuid,
    pub tracking_number: String,
    pub status: TrackingStatus,
    pub history: Vec<TrackingEntry>,
    pub items: Vec<PublicItem>,
    pub total_amount: BigDecimal,
    pub order_date: DateTime<Utc>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingPage {
    pub orders: Vec<OrderTracking>,
    pub pagination: Pagination,
}

pub struct TrackingService {
    orders: Arc<dyn OrderStore>,
}

impl TrackingService {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// `QC-<unix millis>-<first 8 hex chars of the order id>`
    pub fn generate_tracking_number(order_id: Uuid, now: DateTime<Utc>) -> String {
        let id = order_id.simple().to_string().to_uppercase();
        format!("QC-{}-{}", now.timestamp_millis(), &id[..8])
    }

    /// Append one tracking step. Admin and fulfillment staff only.
    pub async fn update_order_tracking(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        request: TrackingUpdateRequest,
    ) -> AppResult<Order> {
        user.require_staff()?;
        let location = non_blank(request.location);
        let details = non_blank(request.details);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let order = self.load(order_id).await?;

            let mut timestamp = Utc::now();
            if let Some(last) = order.tracking_history.last() {
                if timestamp <= last.timestamp {
                    timestamp = last.timestamp + Duration::milliseconds(1);
                }
            }

            let append = TrackingAppend {
                entry: TrackingEntry {
                    status: request.status,
                    location: location.clone(),
                    details: details.clone(),
                    timestamp,
                },
                tracking_number: Self::generate_tracking_number(order.id, timestamp),
                estimated_delivery: request.estimated_delivery,
            };

            if let Some(updated) = self
                .orders
                .append_tracking(order.id, order.version, append)
                .await?
            {
                info!(
                    order_id = %order_id,
                    status = request.status.as_str(),
                    tracking_number = updated.tracking_number.as_deref().unwrap_or_default(),
                    updated_by = %user.user_id,
                    "tracking updated"
                );
                return Ok(updated);
            }
            warn!(order_id = %order_id, attempt, "order changed concurrently, retrying tracking update");
        }

        Err(DomainError::ConcurrentModification {
            order_id: order_id.to_string(),
        }
        .into())
    }

    pub async fn get_order_tracking(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> AppResult<OrderTracking> {
        let order = self.load(order_id).await?;
        if order.user_id != user.user_id && !user.role.is_staff() {
            return Err(AuthError::Forbidden {
                reason: "order belongs to another user".to_string(),
            }
            .into());
        }
        Ok(OrderTracking::from(&order))
    }

    /// The caller's orders that have been handed to shipping
    pub async fn get_user_tracked_orders(&self, user: &AuthUser) -> AppResult<Vec<OrderTracking>> {
        Ok(self
            .orders
            .list_by_user(user.user_id)
            .await?
            .iter()
            .filter(|o| o.tracking_number.is_some())
            .map(OrderTracking::from)
            .collect())
    }

    pub async fn list_tracked_orders(
        &self,
        user: &AuthUser,
        status: Option<TrackingStatus>,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<TrackingPage> {
        user.require_admin()?;

        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(out_of_range("page", 1, None));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(out_of_range("limit", 1, Some(MAX_PAGE_SIZE)));
        }

        let (orders, total) = self
            .orders
            .list_by_tracking_status(status, (page - 1) * limit, limit)
            .await?;

        Ok(TrackingPage {
            orders: orders.iter().map(OrderTracking::from).collect(),
            pagination: Pagination {
                current_page: page,
                total_pages: (total + limit - 1) / limit,
                total_items: total,
            },
        })
    }

    pub async fn get_by_tracking_number(&self, tracking_number: &str) -> AppResult<PublicTracking> {
        let order = self
            .orders
            .find_by_tracking_number(tracking_number.trim())
            .await?
            .ok_or_else(|| DomainError::TrackingNotFound {
                tracking_number: tracking_number.to_string(),
            })?;

        Ok(PublicTracking {
            order_id: order.id,
            tracking_number: order.tracking_number.unwrap_or_default(),
            status: order.tracking_status,
            history: order.tracking_history,
            items: order
                .items
                .into_iter()
                .map(|i| PublicItem {
                    name: i.name,
                    quantity: i.quantity,
                })
                .collect(),
            total_amount: order.amount,
            order_date: order.created_at,
            estimated_delivery: order.estimated_delivery,
        })
    }

    async fn load(&self, order_id: Uuid) -> AppResult<Order> {
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
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn out_of_range(field: &str, min: i64, max: Option<i64>) -> crate::error::AppError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: Some(min.to_string()),
        max: max.map(|m| m.to_string()),
    }
    .into()
}
