use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order header. Identity and amounts are fixed at creation; afterwards only
/// `status`, `payment_status`, `transaction_id` and `updated_at` change.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub shipping_cost: Decimal,
    pub currency: String,
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,
    pub phone: String,
    /// Latest processor reference (payment intent id)
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// `total_amount == sum(price * quantity) + shipping_cost`
    pub fn totals_match(&self, items: &[super::order_item::Model]) -> bool {
        let lines: Decimal = items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum();
        lines + self.shipping_cost == self.total_amount
    }
}

/// Fulfillment lifecycle of an order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    EnumString,
    Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    /// Whether `self -> next` is a legal lifecycle step. Self-transitions are
    /// not steps; callers treat them as no-ops.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Processing, Cancelled)
                | (Processing | Shipped | Delivered | Cancelled, Refunded)
        )
    }

    /// Statuses an administrator may set; `refunded` only follows a processor refund.
    pub fn is_fulfillment_status(self) -> bool {
        !matches!(self, OrderStatus::Refunded)
    }
}

/// Payment lifecycle of an order, set only by reconciliation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    EnumString,
    Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    #[serde(alias = "cancelled")]
    #[strum(to_string = "canceled", serialize = "cancelled")]
    Canceled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    /// Whether reconciliation may move `self` to `next`. Nothing returns to
    /// `unpaid`; `canceled` is terminal. Repeated `paid`, `failed` and
    /// `refunded` are allowed so that new evidence can be appended.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unpaid | Failed, Paid | Failed | Canceled)
                | (Paid, Paid | Refunded | Canceled)
                | (Refunded, Refunded)
        )
    }

    /// A fresh payment intent may be requested for the order.
    pub fn is_payable(self) -> bool {
        matches!(self, PaymentStatus::Unpaid | PaymentStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Processing, true)]
    #[case(OrderStatus::Processing, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Processing, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Refunded, true)]
    #[case(OrderStatus::Pending, OrderStatus::Refunded, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Refunded, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Processing, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Processing, false)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, false)]
    fn order_status_transitions(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[rstest]
    #[case(PaymentStatus::Unpaid, PaymentStatus::Paid, true)]
    #[case(PaymentStatus::Unpaid, PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Unpaid, PaymentStatus::Canceled, true)]
    #[case(PaymentStatus::Unpaid, PaymentStatus::Refunded, false)]
    #[case(PaymentStatus::Failed, PaymentStatus::Paid, true)]
    #[case(PaymentStatus::Paid, PaymentStatus::Refunded, true)]
    #[case(PaymentStatus::Paid, PaymentStatus::Canceled, true)]
    #[case(PaymentStatus::Paid, PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Canceled, PaymentStatus::Paid, false)]
    #[case(PaymentStatus::Refunded, PaymentStatus::Paid, false)]
    fn payment_status_transitions(
        #[case] from: PaymentStatus,
        #[case] to: PaymentStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn nothing_returns_to_unpaid() {
        use sea_orm::Iterable;
        for from in PaymentStatus::iter() {
            assert!(!from.can_transition_to(PaymentStatus::Unpaid));
        }
    }

    #[test]
    fn payment_status_accepts_both_cancel_spellings() {
        assert_eq!(
            PaymentStatus::from_str("cancelled").unwrap(),
            PaymentStatus::Canceled
        );
        assert_eq!(
            PaymentStatus::from_str("canceled").unwrap(),
            PaymentStatus::Canceled
        );
        assert_eq!(PaymentStatus::Canceled.to_string(), "canceled");
        assert!(OrderStatus::from_str("teleported").is_err());
    }
}
