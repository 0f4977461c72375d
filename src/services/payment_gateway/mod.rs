//! Payment processor adapter.
//!
//! [`PaymentGateway`] is the narrow seam to the external processor: create a
//! payment intent for an order, and verify and translate an inbound webhook.
//! Amount conversion to and from the processor's minor units happens only in
//! this module.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{order, PaymentRecordStatus, PaymentStatus};
use crate::errors::ServiceError;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;

/// What a client needs to complete payment for an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentHandle {
    pub client_secret: String,
    /// Processor reference of the intent, stored on the order
    pub payment_intent_id: String,
    /// Null when no publishable key is configured
    pub publishable_key: Option<String>,
}

/// Internal payment outcome, independent of processor vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentOutcome {
    /// Status of the evidence row this outcome appends
    pub fn record_status(self) -> PaymentRecordStatus {
        match self {
            PaymentOutcome::Succeeded => PaymentRecordStatus::Success,
            PaymentOutcome::Failed => PaymentRecordStatus::Failed,
            PaymentOutcome::Canceled => PaymentRecordStatus::Canceled,
            PaymentOutcome::Refunded => PaymentRecordStatus::Refund,
        }
    }

    /// Order payment status this outcome moves to
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            PaymentOutcome::Succeeded => PaymentStatus::Paid,
            PaymentOutcome::Failed => PaymentStatus::Failed,
            PaymentOutcome::Canceled => PaymentStatus::Canceled,
            PaymentOutcome::Refunded => PaymentStatus::Refunded,
        }
    }
}

/// A verified processor event that maps to a payment outcome
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub outcome: PaymentOutcome,
    /// Order id echoed back from intent metadata
    pub order_id: Option<Uuid>,
    /// Payment intent id, or the charge id for refunds
    pub processor_reference: String,
    /// Payment intent the event belongs to
    pub payment_intent: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
    pub payload: serde_json::Value,
}

/// Result of verifying and translating a webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Payment(PaymentEvent),
    /// Authentic, but not an event type reconciliation acts on
    Ignored { event_id: String, event_type: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a payment intent for the order's full `total_amount`.
    async fn create_intent(&self, order: &order::Model) -> Result<PaymentHandle, ServiceError>;

    /// Verifies authenticity of a raw webhook delivery and translates it.
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError>;
}

/// Converts a 2-decimal amount into integer minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() {
        return Err(ServiceError::ValidationError(format!(
            "amount {} must not be negative",
            amount
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

/// Converts integer minor units back into a 2-decimal amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
