use chrono::{DateTime, SubsecRound, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{
    cart::{self, CartStatus, Entity as Cart},
    cart_item::{self, Entity as CartItem},
    product::{self, Entity as Product},
};
use crate::errors::{is_unique_violation, ServiceError};

use super::{BaseRepository, Repository};

/// Cart Store persistence: carts, their lines, and the checkout lease.
#[derive(Debug, Clone)]
pub struct CartRepository {
    base: BaseRepository,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?)
    }

    /// Returns the user's cart, creating it on first access. Two concurrent
    /// first accesses race on the unique `user_id` index; the loser re-reads.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        let db = self.base.get_db();
        if let Some(existing) = self.find_by_user(db, user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let insert = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await;

        match insert {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => self
                .find_by_user(db, user_id)
                .await?
                .ok_or_else(|| ServiceError::InternalError("cart vanished after insert race".into())),
            Err(err) => Err(err.into()),
        }
    }

    /// Cart lines with their live product rows, oldest first.
    pub async fn items_with_products<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<(cart_item::Model, Option<product::Model>)>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(Product)
            .all(conn)
            .await?)
    }

    pub async fn find_item(&self, item_id: Uuid) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(CartItem::find_by_id(item_id)
            .one(self.base.get_db())
            .await?)
    }

    pub async fn find_active_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        Ok(Product::find_by_id(product_id)
            .filter(product::Column::IsActive.eq(true))
            .one(self.base.get_db())
            .await?)
    }

    /// Adds `quantity` of a product, summing into the existing line if present.
    pub async fn add_or_merge_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        let now = Utc::now();
        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(conn)
            .await?;

        if let Some(item) = existing {
            let merged = item.quantity.checked_add(quantity).ok_or_else(|| {
                ServiceError::ValidationError("quantity is too large".to_string())
            })?;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(merged);
            active.updated_at = Set(now);
            return Ok(active.update(conn).await?);
        }

        Ok(cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?)
    }

    pub async fn set_item_quantity<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: cart_item::Model,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    pub async fn delete_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        item_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_by_id(item_id).exec(conn).await?;
        Ok(())
    }

    pub async fn clear_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Claims the checkout lease with a single conditional update. The claim
    /// succeeds when the cart is active or its previous lease started before
    /// `stale_before`. Returns the lease start written to the row when this
    /// caller now holds the lease; it identifies the lease for release.
    pub async fn claim_lease<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        // Microseconds survive a round trip through every supported backend.
        let claimed_at = now.trunc_subsecs(6);
        let result = Cart::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::Converting))
            .col_expr(cart::Column::UpdatedAt, Expr::value(claimed_at))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(
                Condition::any()
                    .add(cart::Column::Status.eq(CartStatus::Active))
                    .add(
                        Condition::all()
                            .add(cart::Column::Status.eq(CartStatus::Converting))
                            .add(cart::Column::UpdatedAt.lt(stale_before)),
                    ),
            )
            .exec(conn)
            .await?;
        Ok((result.rows_affected == 1).then_some(claimed_at))
    }

    /// Releases the lease started at `claimed_at`. Returns false when that
    /// lease is no longer held, i.e. it expired and another checkout took
    /// the cart; the row is then left untouched.
    pub async fn release_lease<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = Cart::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::Active))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Converting))
            .filter(cart::Column::UpdatedAt.eq(claimed_at))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
