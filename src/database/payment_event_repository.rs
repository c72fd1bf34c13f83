use crate::database::error::{DatabaseError, DatabaseErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Event types written by the server itself rather than received from a provider
pub const RECONCILIATION_EVENT_PREFIX: &str = "reconciliation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentEventStatus {
    Received,
    Processed,
    /// Dead letter: could not be applied to an order
    Unreconciled,
}

impl PaymentEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventStatus::Received => "received",
            PaymentEventStatus::Processed => "processed",
            PaymentEventStatus::Unreconciled => "unreconciled",
        }
    }

    pub fn from_db(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "received" => Ok(PaymentEventStatus::Received),
            "processed" => Ok(PaymentEventStatus::Processed),
            "unreconciled" => Ok(PaymentEventStatus::Unreconciled),
            other => Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unexpected payment event status '{}'", other),
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub reference: Option<String>,
    pub payload: JsonValue,
    pub status: PaymentEventStatus,
    pub reason: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// Provider notifications can be replayed; server-side gap records cannot
    pub fn is_replayable(&self) -> bool {
        !self.event_type.starts_with(RECONCILIATION_EVENT_PREFIX)
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub reference: Option<String>,
    pub payload: JsonValue,
    pub status: PaymentEventStatus,
    pub reason: Option<String>,
}

/// Durable log of provider notifications and reconciliation gaps
#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    /// Insert unless `(provider, event_id)` already exists; `Ok(None)` marks a duplicate.
    async fn record(&self, event: NewPaymentEvent) -> Result<Option<PaymentEvent>, DatabaseError>;

    async fn mark(
        &self,
        id: Uuid,
        status: PaymentEventStatus,
        reason: Option<String>,
    ) -> Result<(), DatabaseError>;

    /// Dead-lettered provider notifications retried fewer than `max_attempts` times, oldest first.
    /// Server-side reconciliation records are excluded.
    async fn list_replayable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PaymentEvent>, DatabaseError>;

    async fn increment_retry(&self, id: Uuid) -> Result<(), DatabaseError>;
}

#[derive(Debug, FromRow)]
struct PaymentEventRow {
    id: Uuid,
    provider: String,
    event_id: String,
    event_type: String,
    reference: Option<String>,
    payload: JsonValue,
    status: String,
    reason: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentEventRow> for PaymentEvent {
    type Error = DatabaseError;

    fn try_from(row: PaymentEventRow) -> Result<Self, Self::Error> {
        Ok(PaymentEvent {
            id: row.id,
            provider: row.provider,
            event_id: row.event_id,
            event_type: row.event_type,
            reference: row.reference,
            payload: row.payload,
            status: PaymentEventStatus::from_db(&row.status)?,
            reason: row.reason,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const EVENT_COLUMNS: &str = "id, provider, event_id, event_type, reference, payload, status, \
     reason, retry_count, created_at, updated_at";

pub struct PgPaymentEventRepository {
    pool: PgPool,
}

impl PgPaymentEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentEventStore for PgPaymentEventRepository {
    async fn record(&self, event: NewPaymentEvent) -> Result<Option<PaymentEvent>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentEventRow>(&format!(
            "INSERT INTO payment_events
             (id, provider, event_id, event_type, reference, payload, status, reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (provider, event_id) DO NOTHING
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&event.provider)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.reference)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(&event.reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PaymentEvent::try_from).transpose()
    }

    async fn mark(
        &self,
        id: Uuid,
        status: PaymentEventStatus,
        reason: Option<String>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE payment_events SET status = $2, reason = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("payment_event", id));
        }
        Ok(())
    }

    async fn list_replayable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PaymentEvent>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentEventRow>(&format!(
            "SELECT {} FROM payment_events
             WHERE status = 'unreconciled' AND retry_count < $1 AND event_type NOT LIKE $2
             ORDER BY created_at ASC
             LIMIT $3",
            EVENT_COLUMNS
        ))
        .bind(max_attempts)
        .bind(format!("{}%", RECONCILIATION_EVENT_PREFIX))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PaymentEvent::try_from).collect()
    }

    async fn increment_retry(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_events SET retry_count = retry_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
