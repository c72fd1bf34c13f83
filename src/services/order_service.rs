use crate::database::order_repository::{
    Address, FulfillmentStatus, NewOrder, Order, OrderItem, OrderStore,
};
use crate::database::product_repository::ProductCatalog;
use crate::error::{AppResult, AuthError, DomainError, ValidationError};
use crate::middleware::auth::AuthUser;
use serde::Deserialize;
use sqlx::types::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLine>,
    pub address: Address,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductCatalog>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, products: Arc<dyn ProductCatalog>) -> Self {
        Self { orders, products }
    }

    /// Place an order, snapshotting product names and offer prices.
    pub async fn create_order(
        &self,
        user: &AuthUser,
        request: CreateOrderRequest,
    ) -> AppResult<Order> {
        if request.items.is_empty() {
            return Err(ValidationError::MissingField {
                field: "items".to_string(),
            }
            .into());
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity < 1) {
            return Err(ValidationError::OutOfRange {
                field: format!("items[{}].quantity", line.product_id),
                min: Some("1".to_string()),
                max: None,
            }
            .into());
        }
        validate_address(&request.address)?;

        let ids: Vec<Uuid> = request.items.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, _> = self
            .products
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut items = Vec::with_capacity(request.items.len());
        let mut amount = BigDecimal::from(0);
        for line in &request.items {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| DomainError::ProductNotFound {
                    product_id: line.product_id.to_string(),
                })?;
            amount += product.offer_price.clone() * BigDecimal::from(line.quantity);
            items.push(OrderItem {
                product_id: product.id,
                name: product.name.clone(),
                quantity: line.quantity,
                unit_price: product.offer_price.clone(),
            });
        }

        let order = self
            .orders
            .insert(NewOrder {
                user_id: user.user_id,
                items,
                amount,
                address: request.address,
            })
            .await?;

        info!(
            order_id = %order.id,
            user_id = %user.user_id,
            amount = %order.amount,
            items = order.items.len(),
            "order placed"
        );
        Ok(order)
    }

    pub async fn list_user_orders(&self, user: &AuthUser) -> AppResult<Vec<Order>> {
        Ok(self.orders.list_by_user(user.user_id).await?)
    }

    /// Orders that include at least one of the seller's products, newest first
    pub async fn list_seller_orders(&self, user: &AuthUser) -> AppResult<Vec<Order>> {
        user.require_seller()?;

        let product_ids: Vec<Uuid> = self
            .products
            .list_by_seller(user.user_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.orders.list_containing_products(&product_ids).await?)
    }

    pub async fn get_order(&self, user: &AuthUser, order_id: Uuid) -> AppResult<Order> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if order.user_id != user.user_id && !user.role.is_staff() {
            return Err(AuthError::Forbidden {
                reason: "order belongs to another user".to_string(),
            }
            .into());
        }
        Ok(order)
    }

    /// Staff-only update of the fulfillment status
    pub async fn update_order_status(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        status: FulfillmentStatus,
    ) -> AppResult<Order> {
        user.require_staff()?;

        for _ in 0..crate::services::payment_state::MAX_CAS_ATTEMPTS {
            let order = self
                .orders
                .find_by_id(order_id)
                .await?
                .ok_or_else(|| DomainError::OrderNotFound {
                    order_id: order_id.to_string(),
                })?;

            if let Some(updated) = self
                .orders
                .update_status(order.id, order.version, status)
                .await?
            {
                info!(order_id = %order_id, status = status.as_str(), "order status updated");
                return Ok(updated);
            }
            warn!(order_id = %order_id, "order changed concurrently, retrying status update");
        }

        Err(DomainError::ConcurrentModification {
            order_id: order_id.to_string(),
        }
        .into())
    }
}

fn validate_address(address: &Address) -> AppResult<()> {
    let fields = [
        ("address.fullName", &address.full_name),
        ("address.phoneNumber", &address.phone_number),
        ("address.pincode", &address.pincode),
        ("address.area", &address.area),
        ("address.city", &address.city),
        ("address.state", &address.state),
    ];
    match fields.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(ValidationError::MissingField {
            field: field.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryOrderStore, InMemoryProductCatalog};
    use crate::database::product_repository::Product;
    use crate::middleware::auth::UserRole;
    use std::str::FromStr;

    fn address() -> Address {
        Address {
            full_name: "Ada Obi".to_string(),
            phone_number: "08000000000".to_string(),
            pincode: "100001".to_string(),
            area: "Yaba".to_string(),
            city: "Lagos".to_string(),
            state: "Lagos".to_string(),
        }
    }

    fn customer() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Customer,
        }
    }

    async fn service_with(products: Vec<Product>) -> OrderService {
        let catalog = InMemoryProductCatalog::new();
        for product in products {
            catalog.insert(product).await;
        }
        OrderService::new(Arc::new(InMemoryOrderStore::new()), Arc::new(catalog))
    }

    fn product(name: &str, price: &str, offer: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price: BigDecimal::from_str(price).expect("decimal"),
            offer_price: BigDecimal::from_str(offer).expect("decimal"),
            seller_id: None,
        }
    }

    #[tokio::test]
    async fn amount_is_sum_of_offer_price_times_quantity() {
        let shoes = product("Shoes", "60.00", "49.99");
        let socks = product("Socks", "5.00", "4.50");
        let service = service_with(vec![shoes.clone(), socks.clone()]).await;

        let order = service
            .create_order(
                &customer(),
                CreateOrderRequest {
                    items: vec![
                        OrderLine { product_id: shoes.id, quantity: 2 },
                        OrderLine { product_id: socks.id, quantity: 3 },
                    ],
                    address: address(),
                },
            )
            .await
            .expect("order placed");

        assert_eq!(order.amount, BigDecimal::from_str("113.48").expect("decimal"));
        assert_eq!(order.items[0].name, "Shoes");
        assert_eq!(order.items[1].unit_price, socks.offer_price);
        assert_eq!(order.status, FulfillmentStatus::OrderPlaced);
    }

    #[tokio::test]
    async fn rejects_bad_lines() {
        let lamp = product("Lamp", "10", "10");
        let service = service_with(vec![lamp.clone()]).await;
        let user = customer();

        let empty = service
            .create_order(&user, CreateOrderRequest { items: vec![], address: address() })
            .await
            .expect_err("empty order");
        assert_eq!(empty.status_code(), 400);

        let zero = service
            .create_order(
                &user,
                CreateOrderRequest {
                    items: vec![OrderLine { product_id: lamp.id, quantity: 0 }],
                    address: address(),
                },
            )
            .await
            .expect_err("zero quantity");
        assert_eq!(zero.status_code(), 400);

        let unknown = service
            .create_order(
                &user,
                CreateOrderRequest {
                    items: vec![OrderLine { product_id: Uuid::new_v4(), quantity: 1 }],
                    address: address(),
                },
            )
            .await
            .expect_err("unknown product");
        assert_eq!(unknown.status_code(), 404);
    }

    #[tokio::test]
    async fn orders_are_private_to_owner_and_staff() {
        let lamp = product("Lamp", "10", "10");
        let service = service_with(vec![lamp.clone()]).await;
        let owner = customer();
        let order = service
            .create_order(
                &owner,
                CreateOrderRequest {
                    items: vec![OrderLine { product_id: lamp.id, quantity: 1 }],
                    address: address(),
                },
            )
            .await
            .expect("order placed");

        let stranger = customer();
        let err = service.get_order(&stranger, order.id).await.expect_err("forbidden");
        assert_eq!(err.status_code(), 403);

        let staff = AuthUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Fulfillment,
        };
        assert!(service.get_order(&staff, order.id).await.is_ok());

        let denied = service
            .update_order_status(&owner, order.id, FulfillmentStatus::Shipped)
            .await
            .expect_err("customers cannot update status");
        assert_eq!(denied.status_code(), 403);

        let shipped = service
            .update_order_status(&staff, order.id, FulfillmentStatus::Shipped)
            .await
            .expect("staff update");
        assert_eq!(shipped.status, FulfillmentStatus::Shipped);
        assert_eq!(shipped.amount, order.amount);
    }

    #[tokio::test]
    async fn sellers_see_orders_containing_their_products() {
        let seller = AuthUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Seller,
        };
        let mut lamp = product("Lamp", "10", "10");
        lamp.seller_id = Some(seller.user_id);
        let rug = product("Rug", "80", "75");
        let service = service_with(vec![lamp.clone(), rug.clone()]).await;

        let buyer = customer();
        let place = |product_id| CreateOrderRequest {
            items: vec![OrderLine { product_id, quantity: 1 }],
            address: address(),
        };
        let with_lamp = service.create_order(&buyer, place(lamp.id)).await.expect("lamp order");
        service.create_order(&buyer, place(rug.id)).await.expect("rug order");

        let orders = service.list_seller_orders(&seller).await.expect("seller orders");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, with_lamp.id);

        let other_seller = AuthUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Seller,
        };
        assert!(service
            .list_seller_orders(&other_seller)
            .await
            .expect("no products")
            .is_empty());

        let err = service.list_seller_orders(&buyer).await.expect_err("customers");
        assert_eq!(err.status_code(), 403);
    }
}
