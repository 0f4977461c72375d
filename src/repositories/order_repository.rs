use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel, OrderStatus,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Order Ledger persistence
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(self.base.get_db()).await?)
    }

    /// Loads the order row under an exclusive lock held until `conn` commits.
    /// On SQLite the transaction's write lock gives the same serialisation.
    pub async fn lock_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).lock_exclusive().one(conn).await?)
    }

    /// Orders of one user, newest first
    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }

    /// All orders, optionally filtered by status, with pagination (page is 1-based)
    pub async fn find_all(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        let paginator = query.paginate(self.base.get_db(), page_size);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    pub async fn items_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Inserts the order header and its item snapshot. Run inside a
    /// transaction so the batch lands atomically.
    pub async fn insert_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderActiveModel,
        items: Vec<OrderItemActiveModel>,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), sea_orm::DbErr> {
        let order = order.insert(conn).await?;
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            inserted.push(item.insert(conn).await?);
        }
        Ok((order, inserted))
    }

    pub async fn update<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderActiveModel,
    ) -> Result<OrderModel, ServiceError> {
        Ok(order.update(conn).await?)
    }
}
