use crate::{
    db::DbPool,
    entities::{
        order::{self, Model as OrderModel, OrderStatus},
        order_item::Model as OrderItemModel,
        payment::Model as PaymentModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{OrderRepository, PaymentRepository},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// An order with its item snapshot and payment evidence
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub payments: Vec<PaymentModel>,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order Ledger reads and administrative fulfillment transitions.
///
/// Payment status is never written here; that belongs to the reconciler.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    orders: OrderRepository,
    payments: PaymentRepository,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            orders: OrderRepository::new(db_pool.clone()),
            payments: PaymentRepository::new(db_pool.clone()),
            db_pool,
            event_sender,
        }
    }

    /// The caller's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        self.orders.find_by_user(user_id).await
    }

    /// One of the caller's orders with its items. Orders owned by someone
    /// else are reported as missing.
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = self.orders.items_for(&*self.db_pool, order.id).await?;
        Ok(OrderDetails {
            order,
            items,
            payments: Vec::new(),
        })
    }

    /// Admin listing. `None` or `"all"` disables the status filter; an
    /// unknown status is a validation error.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        status: Option<&str>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let filter = match status.map(str::trim) {
            None | Some("") => None,
            Some(raw) if raw.eq_ignore_ascii_case("all") => None,
            Some(raw) => Some(OrderStatus::from_str(raw).map_err(|_| {
                ServiceError::ValidationError(format!("unknown order status '{}'", raw))
            })?),
        };

        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let (orders, total) = self.orders.find_all(filter, page, per_page).await?;

        info!(total, page, per_page, returned = orders.len(), "orders listed");
        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Admin detail including payment evidence rows
    #[instrument(skip(self))]
    pub async fn get(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = self.orders.items_for(&*self.db_pool, order.id).await?;
        let payments = self.payments.find_by_order(order.id).await?;
        Ok(OrderDetails {
            order,
            items,
            payments,
        })
    }

    /// Applies an administrator's fulfillment transition.
    ///
    /// Only fulfillment statuses are accepted; `refunded` follows from a
    /// processor refund alone. Setting the current status again is a no-op.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        if !new_status.is_fulfillment_status() {
            return Err(ServiceError::InvalidStatus(format!(
                "'{}' is set by payment reconciliation only",
                new_status
            )));
        }

        let txn = self.db_pool.begin().await?;
        let order = self
            .orders
            .lock_by_id(&txn, order_id)
            .await?
            .ok_or_else(|| {
                warn!("Order not found for status update");
                ServiceError::NotFound(format!("Order {} not found", order_id))
            })?;

        if order.status == new_status {
            txn.commit().await?;
            return Ok(order);
        }

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order from '{}' to '{}'",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = self.orders.update(&txn, active).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit status update transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(old_status = %old_status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }
}
