use crate::database::error::DatabaseError;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::types::BigDecimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Catalog entry; orders are priced at `offer_price`
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub offer_price: BigDecimal,
    /// Seller account that lists the product
    pub seller_id: Option<Uuid>,
}

/// Read-only view of the product catalog
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, DatabaseError>;

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, DatabaseError>;
}

const PRODUCT_COLUMNS: &str = "id, name, price, offer_price, seller_id";

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductRepository {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = ANY($1)",
            PRODUCT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE seller_id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
