use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::payment::{
    ActiveModel as PaymentActiveModel, Column, Entity as Payment, Model as PaymentModel,
    PaymentRecordStatus, PaymentSource,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Append-only store of payment evidence rows
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    base: BaseRepository,
}

impl PaymentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// The evidence row for one processor event on one order, if recorded
    pub async fn find_evidence<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        transaction_id: &str,
        status: PaymentRecordStatus,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .filter(Column::TransactionId.eq(transaction_id))
            .filter(Column::Status.eq(status))
            .one(conn)
            .await?)
    }

    pub async fn has_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        status: PaymentRecordStatus,
    ) -> Result<bool, ServiceError> {
        let count = Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .filter(Column::Status.eq(status))
            .count(conn)
            .await?;
        Ok(count > 0)
    }

    /// Processor-confirmed success rows for a payment intent; used to resolve
    /// the order of a refund that carries no order metadata. Client-reported
    /// rows are not processor evidence and are never matched.
    pub async fn find_confirmed_success_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::TransactionId.eq(transaction_id))
            .filter(Column::Status.eq(PaymentRecordStatus::Success))
            .filter(Column::Source.eq(PaymentSource::Webhook))
            .order_by_asc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }

    /// Appends a row. Unique violations surface as the raw `DbErr` so the
    /// caller can tell a duplicate from a failure.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment: PaymentActiveModel,
    ) -> Result<PaymentModel, sea_orm::DbErr> {
        payment.insert(conn).await
    }

    pub async fn find_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .order_by_asc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }
}
