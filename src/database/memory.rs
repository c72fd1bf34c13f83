//! In-process stores used when running without Postgres and in tests.
//!
//! Semantics match the Postgres repositories, including the version check on every
//! order mutation and the `(provider, event_id)` uniqueness of payment events.

use crate::database::error::DatabaseError;
use crate::database::order_repository::{
    FulfillmentStatus, NewOrder, Order, OrderStore, PaymentStatus, PaymentUpdate,
    TrackingAppend, TrackingStatus,
};
use crate::database::payment_event_repository::{
    NewPaymentEvent, PaymentEvent, PaymentEventStatus, PaymentEventStore,
};
use crate::database::product_repository::{Product, ProductCatalog};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `mutate` when the stored version matches, bumping version and `updated_at`
    async fn compare_and_swap<F>(
        &self,
        id: Uuid,
        expected_version: i64,
        mutate: F,
    ) -> Result<Option<Order>, DatabaseError>
    where
        F: FnOnce(&mut Order) + Send,
    {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.version != expected_version {
            return Ok(None);
        }
        mutate(order);
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            items: order.items,
            amount: order.amount,
            address: order.address,
            status: FulfillmentStatus::OrderPlaced,
            payment_method: None,
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            refund_id: None,
            tracking_number: None,
            tracking_status: TrackingStatus::Processing,
            tracking_history: Vec::new(),
            estimated_delivery: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.orders.write().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.tracking_number.as_deref() == Some(tracking_number))
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let orders = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(orders))
    }

    async fn list_containing_products(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<Order>, DatabaseError> {
        let orders = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.items.iter().any(|item| product_ids.contains(&item.product_id)))
            .cloned()
            .collect();
        Ok(newest_first(orders))
    }

    async fn list_by_tracking_status(
        &self,
        status: Option<TrackingStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Order>, i64), DatabaseError> {
        let matching = newest_first(
            self.orders
                .read()
                .await
                .values()
                .filter(|o| status.map_or(true, |s| o.tracking_status == s))
                .cloned()
                .collect(),
        );
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_payment(
        &self,
        id: Uuid,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, DatabaseError> {
        self.compare_and_swap(id, expected_version, |order| {
            order.payment_status = update.payment_status;
            if let Some(method) = update.payment_method {
                order.payment_method = Some(method);
            }
            if let Some(transaction_id) = update.transaction_id {
                order.transaction_id = Some(transaction_id);
            }
            if let Some(refund_id) = update.refund_id {
                order.refund_id = Some(refund_id);
            }
        })
        .await
    }

    async fn append_tracking(
        &self,
        id: Uuid,
        expected_version: i64,
        append: TrackingAppend,
    ) -> Result<Option<Order>, DatabaseError> {
        self.compare_and_swap(id, expected_version, |order| {
            order.tracking_status = append.entry.status;
            order.tracking_history.push(append.entry);
            if order.tracking_number.is_none() {
                order.tracking_number = Some(append.tracking_number);
            }
            if append.estimated_delivery.is_some() {
                order.estimated_delivery = append.estimated_delivery;
            }
        })
        .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: FulfillmentStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        self.compare_and_swap(id, expected_version, |order| order.status = status)
            .await
    }
}

#[derive(Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<Uuid, Product>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, DatabaseError> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, DatabaseError> {
        Ok(self
            .products
            .read()
            .await
            .values()
            .filter(|p| p.seller_id == Some(seller_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentEventStore {
    events: RwLock<Vec<PaymentEvent>>,
}

impl InMemoryPaymentEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<PaymentEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl PaymentEventStore for InMemoryPaymentEventStore {
    async fn record(&self, event: NewPaymentEvent) -> Result<Option<PaymentEvent>, DatabaseError> {
        let mut events = self.events.write().await;
        if events
            .iter()
            .any(|e| e.provider == event.provider && e.event_id == event.event_id)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let stored = PaymentEvent {
            id: Uuid::new_v4(),
            provider: event.provider,
            event_id: event.event_id,
            event_type: event.event_type,
            reference: event.reference,
            payload: event.payload,
            status: event.status,
            reason: event.reason,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        events.push(stored.clone());
        Ok(Some(stored))
    }

    async fn mark(
        &self,
        id: Uuid,
        status: PaymentEventStatus,
        reason: Option<String>,
    ) -> Result<(), DatabaseError> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DatabaseError::not_found("payment_event", id))?;
        event.status = status;
        event.reason = reason;
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn list_replayable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PaymentEvent>, DatabaseError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| {
                e.status == PaymentEventStatus::Unreconciled
                    && e.retry_count < max_attempts
                    && e.is_replayable()
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn increment_retry(&self, id: Uuid) -> Result<(), DatabaseError> {
        if let Some(event) = self.events.write().await.iter_mut().find(|e| e.id == id) {
            event.retry_count += 1;
            event.updated_at = Utc::now();
        }
        Ok(())
    }
}
