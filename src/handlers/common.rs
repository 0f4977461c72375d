use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{
    order, order_item, payment, OrderStatus, PaymentRecordStatus, PaymentSource, PaymentStatus,
};
use crate::services::orders::OrderDetails;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String, example = "20.00")]
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_total: item.price * Decimal::from(item.quantity),
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

/// Payment evidence row as shown to administrators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentRecordResponse {
    pub id: Uuid,
    pub transaction_id: String,
    #[schema(value_type = String, example = "26.35")]
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub status: PaymentRecordStatus,
    pub source: PaymentSource,
    pub created_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentRecordResponse {
    fn from(row: payment::Model) -> Self {
        Self {
            id: row.id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            currency: row.currency,
            payment_method: row.payment_method,
            status: row.status,
            source: row.source,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "550e8400-e29b-41d4-a716-446655440000",
    "order_number": "ORD-K2J4H6G8",
    "status": "pending",
    "payment_status": "unpaid",
    "total_amount": "26.35",
    "shipping_cost": "1.35",
    "currency": "usd"
}))]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    pub currency: String,
    pub shipping_address: String,
    pub phone: String,
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<PaymentRecordResponse>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn with_items(order: order::Model, items: Vec<order_item::Model>) -> Self {
        let mut response = Self::from(order);
        response.items = items.into_iter().map(OrderItemResponse::from).collect();
        response
    }

    /// Detail view; payment evidence is included only for administrators
    pub fn from_details(details: OrderDetails, include_payments: bool) -> Self {
        let mut response = Self::with_items(details.order, details.items);
        if include_payments {
            response.payments = Some(
                details
                    .payments
                    .into_iter()
                    .map(PaymentRecordResponse::from)
                    .collect(),
            );
        }
        response
    }
}

impl From<order::Model> for OrderResponse {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            shipping_cost: order.shipping_cost,
            currency: order.currency,
            shipping_address: order.shipping_address,
            phone: order.phone,
            transaction_id: order.transaction_id,
            items: Vec::new(),
            payments: None,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
