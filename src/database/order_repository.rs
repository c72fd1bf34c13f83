use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::PaymentMethod;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::{BigDecimal, Json};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// Payment lifecycle of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(unknown_value("payment_status", other)),
        }
    }

    /// Allowed moves: pending -> pending | completed | failed, completed -> refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Pending)
                | (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }

    /// Money has moved; re-verification must not credit again
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fulfillment status shown on the order page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentStatus {
    #[serde(rename = "Order Placed")]
    OrderPlaced,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::OrderPlaced => "Order Placed",
            FulfillmentStatus::Processing => "Processing",
            FulfillmentStatus::Shipped => "Shipped",
            FulfillmentStatus::Delivered => "Delivered",
            FulfillmentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_db(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "Order Placed" => Ok(FulfillmentStatus::OrderPlaced),
            "Processing" => Ok(FulfillmentStatus::Processing),
            "Shipped" => Ok(FulfillmentStatus::Shipped),
            "Delivered" => Ok(FulfillmentStatus::Delivered),
            "Cancelled" => Ok(FulfillmentStatus::Cancelled),
            other => Err(unknown_value("status", other)),
        }
    }
}

/// Shipment tracking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingStatus {
    Processing,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Returned,
    Cancelled,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Processing => "processing",
            TrackingStatus::Shipped => "shipped",
            TrackingStatus::InTransit => "in-transit",
            TrackingStatus::OutForDelivery => "out-for-delivery",
            TrackingStatus::Delivered => "delivered",
            TrackingStatus::Returned => "returned",
            TrackingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TrackingStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(TrackingStatus::Processing),
            "shipped" => Ok(TrackingStatus::Shipped),
            "in-transit" => Ok(TrackingStatus::InTransit),
            "out-for-delivery" => Ok(TrackingStatus::OutForDelivery),
            "delivered" => Ok(TrackingStatus::Delivered),
            "returned" => Ok(TrackingStatus::Returned),
            "cancelled" => Ok(TrackingStatus::Cancelled),
            other => Err(unknown_value("tracking_status", other)),
        }
    }
}

fn unknown_value(column: &str, value: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Unknown {
        message: format!("unexpected {} value '{}'", column, value),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub full_name: String,
    pub phone_number: String,
    pub pincode: String,
    pub area: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub status: TrackingStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub amount: BigDecimal,
    pub address: Address,
    pub status: FulfillmentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub refund_id: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_status: TrackingStatus,
    pub tracking_history: Vec<TrackingEntry>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields fixed at placement time
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub amount: BigDecimal,
    pub address: Address,
}

/// Payment columns written by one compare-and-swap. `None` leaves a column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_id: Option<String>,
    pub refund_id: Option<String>,
}

impl PaymentUpdate {
    pub fn status(payment_status: PaymentStatus) -> Self {
        Self {
            payment_status,
            payment_method: None,
            transaction_id: None,
            refund_id: None,
        }
    }
}

/// One tracking step; the tracking number is only written when the order has none yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingAppend {
    pub entry: TrackingEntry,
    pub tracking_number: String,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Order persistence. Mutations are conditional on `expected_version` and return
/// `Ok(None)` when another writer got there first.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: NewOrder) -> Result<Order, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    async fn find_by_transaction_id(&self, transaction_id: &str)
        -> Result<Option<Order>, DatabaseError>;

    async fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Newest first
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError>;

    /// Orders with at least one line for any of `product_ids`, newest first
    async fn list_containing_products(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<Order>, DatabaseError>;

    /// Page of orders (newest first) plus the total matching count
    async fn list_by_tracking_status(
        &self,
        status: Option<TrackingStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Order>, i64), DatabaseError>;

    async fn update_payment(
        &self,
        id: Uuid,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, DatabaseError>;

    async fn append_tracking(
        &self,
        id: Uuid,
        expected_version: i64,
        append: TrackingAppend,
    ) -> Result<Option<Order>, DatabaseError>;

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: FulfillmentStatus,
    ) -> Result<Option<Order>, DatabaseError>;
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    items: Json<Vec<OrderItem>>,
    amount: BigDecimal,
    address: Json<Address>,
    status: String,
    payment_method: Option<String>,
    payment_status: String,
    transaction_id: Option<String>,
    refund_id: Option<String>,
    tracking_number: Option<String>,
    tracking_status: String,
    tracking_history: Json<Vec<TrackingEntry>>,
    estimated_delivery: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let payment_method = row
            .payment_method
            .as_deref()
            .map(|m| PaymentMethod::from_str(m).map_err(|_| unknown_value("payment_method", m)))
            .transpose()?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            amount: row.amount,
            address: row.address.0,
            status: FulfillmentStatus::from_db(&row.status)?,
            payment_method,
            payment_status: PaymentStatus::from_db(&row.payment_status)?,
            transaction_id: row.transaction_id,
            refund_id: row.refund_id,
            tracking_number: row.tracking_number,
            tracking_status: TrackingStatus::from_str(&row.tracking_status)?,
            tracking_history: row.tracking_history.0,
            estimated_delivery: row.estimated_delivery,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, items, amount, address, status, payment_method, \
     payment_status, transaction_id, refund_id, tracking_number, tracking_status, \
     tracking_history, estimated_delivery, version, created_at, updated_at";

fn into_order(row: Option<OrderRow>) -> Result<Option<Order>, DatabaseError> {
    row.map(Order::try_from).transpose()
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, DatabaseError> {
    rows.into_iter().map(Order::try_from).collect()
}

/// Postgres-backed order store
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn insert(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (id, user_id, items, amount, address)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(order.user_id)
        .bind(Json(&order.items))
        .bind(&order.amount)
        .bind(Json(&order.address))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Order::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE transaction_id = $1",
            ORDER_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }

    async fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE tracking_number = $1",
            ORDER_COLUMNS
        ))
        .bind(tracking_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_orders(rows)
    }

    async fn list_containing_products(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE EXISTS (
                 SELECT 1 FROM jsonb_array_elements(items) AS item
                 WHERE (item->>'productId')::uuid = ANY($1)
             )
             ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_orders(rows)
    }

    async fn list_by_tracking_status(
        &self,
        status: Option<TrackingStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Order>, i64), DatabaseError> {
        let status = status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE ($1::TEXT IS NULL OR tracking_status = $1)
             ORDER BY created_at DESC
             OFFSET $2 LIMIT $3",
            ORDER_COLUMNS
        ))
        .bind(status)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR tracking_status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok((into_orders(rows)?, total))
    }

    async fn update_payment(
        &self,
        id: Uuid,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET payment_status = $3,
                 payment_method = COALESCE($4, payment_method),
                 transaction_id = COALESCE($5, transaction_id),
                 refund_id = COALESCE($6, refund_id),
                 version = version + 1,
                 updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(expected_version)
        .bind(update.payment_status.as_str())
        .bind(update.payment_method.map(|m| m.as_str()))
        .bind(update.transaction_id)
        .bind(update.refund_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }

    async fn append_tracking(
        &self,
        id: Uuid,
        expected_version: i64,
        append: TrackingAppend,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET tracking_history = tracking_history || $3,
                 tracking_status = $4,
                 tracking_number = COALESCE(tracking_number, $5),
                 estimated_delivery = COALESCE($6, estimated_delivery),
                 version = version + 1,
                 updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(expected_version)
        .bind(Json(vec![&append.entry]))
        .bind(append.entry.status.as_str())
        .bind(append.tracking_number)
        .bind(append.estimated_delivery)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: FulfillmentStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET status = $3, version = version + 1, updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(expected_version)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_order(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_transitions_follow_state_machine() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Refunded));

        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        for next in [Pending, Completed, Failed, Refunded] {
            assert!(!Failed.can_transition_to(next));
            assert!(!Refunded.can_transition_to(next));
        }
    }

    #[test]
    fn statuses_round_trip_through_db_strings() {
        assert_eq!(
            FulfillmentStatus::from_db("Order Placed").expect("status"),
            FulfillmentStatus::OrderPlaced
        );
        assert_eq!(
            TrackingStatus::from_str("out-for-delivery").expect("status"),
            TrackingStatus::OutForDelivery
        );
        assert!(PaymentStatus::from_db("settled").is_err());
    }

    #[test]
    fn tracking_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(TrackingStatus::InTransit).expect("json"),
            "in-transit"
        );
        let parsed: TrackingStatus = serde_json::from_str("\"out-for-delivery\"").expect("parse");
        assert_eq!(parsed, TrackingStatus::OutForDelivery);
    }

    #[test]
    fn order_serializes_without_version() {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            items: vec![],
            amount: BigDecimal::from(10),
            address: Address {
                full_name: "Ada".to_string(),
                phone_number: "0800".to_string(),
                pincode: "100001".to_string(),
                area: "Yaba".to_string(),
                city: "Lagos".to_string(),
                state: "LA".to_string(),
            },
            status: FulfillmentStatus::OrderPlaced,
            payment_method: Some(PaymentMethod::MobileMoney),
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            refund_id: None,
            tracking_number: None,
            tracking_status: TrackingStatus::Processing,
            tracking_history: vec![],
            estimated_delivery: None,
            version: 3,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&order).expect("json");
        assert_eq!(json["status"], "Order Placed");
        assert_eq!(json["paymentMethod"], "mobile_money");
        assert_eq!(json["trackingStatus"], "processing");
        assert!(json.get("version").is_none());
    }
}
