use crate::{
    config::AppConfig,
    entities::cart,
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::CartRepository,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Per-user shopping cart.
///
/// Every operation resolves the caller's own cart (creating it on first use),
/// so a user can never name someone else's cart directly. Item-scoped
/// operations check that the item belongs to the caller's cart and fail with
/// `Forbidden` otherwise.
///
/// While a checkout holds the cart lease, mutations fail with `Conflict`.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    carts: CartRepository,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

/// A cart line with its live catalog price
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    #[schema(value_type = String, example = "10.00")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String, example = "20.00")]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
    /// Sum of line totals, shipping excluded
    #[schema(value_type = String, example = "25.00")]
    pub total_price: Decimal,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            carts: CartRepository::new(db.clone()),
            db,
            event_sender,
            config,
        }
    }

    /// Returns the caller's cart, creating an empty one on first access.
    #[instrument(skip(self))]
    pub async fn view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.carts.get_or_create(user_id).await?;
        self.render(&cart).await
    }

    /// Adds a product to the cart.
    ///
    /// If the product is already in the cart the quantities are summed, so
    /// the cart never holds two lines for one product. Unknown or inactive
    /// products fail with `NotFound`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        ensure_positive(quantity)?;

        self.carts
            .find_active_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = self.mutable_cart(user_id).await?;
        let item = self
            .carts
            .add_or_merge_item(&*self.db, cart.id, product_id, quantity)
            .await?;

        info!(cart_id = %cart.id, %product_id, quantity = item.quantity, "cart item added");
        self.render(&cart).await
    }

    /// Sets the quantity of one line. Zero is not a removal; use `remove_item`.
    #[instrument(skip(self))]
    pub async fn set_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        ensure_positive(quantity)?;

        let cart = self.mutable_cart(user_id).await?;
        let item = self.owned_item(&cart, item_id).await?;
        self.carts
            .set_item_quantity(&*self.db, item, quantity)
            .await?;

        self.render(&cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.mutable_cart(user_id).await?;
        self.owned_item(&cart, item_id).await?;
        self.carts.delete_item(&*self.db, item_id).await?;

        self.render(&cart).await
    }

    /// Removes every line from the caller's cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.mutable_cart(user_id).await?;
        let removed = self.carts.clear_items(&*self.db, cart.id).await?;

        if removed > 0 {
            self.event_sender
                .send_or_log(Event::CartCleared {
                    cart_id: cart.id,
                    user_id,
                })
                .await;
        }

        self.render(&cart).await
    }

    async fn mutable_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        let cart = self.carts.get_or_create(user_id).await?;
        if cart.is_leased(Utc::now(), self.config.checkout_lease()) {
            return Err(ServiceError::Conflict(
                "Cart is being checked out; try again shortly".to_string(),
            ));
        }
        Ok(cart)
    }

    async fn owned_item(
        &self,
        cart: &cart::Model,
        item_id: Uuid,
    ) -> Result<crate::entities::cart_item::Model, ServiceError> {
        let item = self
            .carts
            .find_item(item_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if item.cart_id != cart.id {
            warn!(%item_id, cart_id = %cart.id, "cart item belongs to another user's cart");
            return Err(ServiceError::Forbidden(
                "Cart item does not belong to your cart".to_string(),
            ));
        }
        Ok(item)
    }

    async fn render(&self, cart: &cart::Model) -> Result<CartView, ServiceError> {
        let rows = self.carts.items_with_products(&*self.db, cart.id).await?;

        let mut items = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let Some(product) = product else {
                warn!(item_id = %item.id, product_id = %item.product_id, "cart line references a missing product");
                continue;
            };
            items.push(CartLineView {
                id: item.id,
                product_id: item.product_id,
                product_name: product.name,
                unit_price: product.price,
                quantity: item.quantity,
                line_total: product.price * Decimal::from(item.quantity),
            });
        }

        let total_price = items.iter().map(|line| line.line_total).sum();
        Ok(CartView {
            id: cart.id,
            user_id: cart.user_id,
            items,
            total_price,
        })
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
