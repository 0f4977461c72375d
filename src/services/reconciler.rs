//! Payment Reconciler.
//!
//! Every payment outcome, whether delivered by a verified processor webhook
//! or reported by the order's owner, is applied here exactly once: under an
//! exclusive lock on the order row, the order's statuses are advanced and a
//! matching evidence row is appended in the same transaction.

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        payment::{self, PaymentRecordStatus, PaymentSource},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    metrics::CHECKOUT_METRICS,
    repositories::{OrderRepository, PaymentRepository},
    services::payment_gateway::{PaymentEvent, PaymentOutcome},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Who is asserting the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    Webhook,
    /// The order's owner; reports for other users' orders are rejected
    Client { user_id: Uuid },
}

impl ReportSource {
    fn record_source(self) -> PaymentSource {
        match self {
            ReportSource::Webhook => PaymentSource::Webhook,
            ReportSource::Client { .. } => PaymentSource::Client,
        }
    }
}

/// One payment outcome to apply to an order
#[derive(Debug, Clone)]
pub struct PaymentReport {
    pub order_id: Uuid,
    pub outcome: PaymentOutcome,
    /// Payment intent id, or charge id for refunds. Together with the
    /// outcome it identifies the event for deduplication.
    pub processor_reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub evidence: serde_json::Value,
    pub source: ReportSource,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub order: order::Model,
    /// False when the event had already been recorded
    pub applied: bool,
}

/// Client payment-status report body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ClientPaymentReport {
    #[schema(example = "processing")]
    pub status: String,
    #[schema(example = "paid")]
    pub payment_status: String,
    #[schema(example = "pi_3Nabc")]
    pub transaction_id: Option<String>,
}

/// Order state after applying an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Whether the processor reference becomes the order's `transaction_id`
    pub record_transaction: bool,
}

/// Decides the order's next state for `outcome`. Pure; the caller holds
/// the order lock and supplies whether a `success` evidence row exists.
pub fn plan_transition(
    order_id: Uuid,
    status: OrderStatus,
    payment_status: PaymentStatus,
    outcome: PaymentOutcome,
    has_prior_success: bool,
) -> Result<TransitionPlan, ServiceError> {
    if outcome == PaymentOutcome::Refunded && !has_prior_success {
        return Err(ServiceError::NoPriorPayment(order_id));
    }

    let next_payment = outcome.payment_status();
    if !payment_status.can_transition_to(next_payment) {
        return Err(ServiceError::InvalidStatus(format!(
            "payment status cannot move from '{}' to '{}'",
            payment_status, next_payment
        )));
    }

    let next_status = match outcome {
        // Only a pending order advances; a late success never pulls a
        // shipped or delivered order back to processing.
        PaymentOutcome::Succeeded if status == OrderStatus::Pending => OrderStatus::Processing,
        PaymentOutcome::Succeeded | PaymentOutcome::Failed => status,
        PaymentOutcome::Canceled if status.can_transition_to(OrderStatus::Cancelled) => {
            OrderStatus::Cancelled
        }
        PaymentOutcome::Canceled => status,
        PaymentOutcome::Refunded if status == OrderStatus::Refunded => status,
        PaymentOutcome::Refunded if status.can_transition_to(OrderStatus::Refunded) => {
            OrderStatus::Refunded
        }
        PaymentOutcome::Refunded => {
            return Err(ServiceError::InvalidStatus(format!(
                "an order in '{}' cannot be refunded",
                status
            )))
        }
    };

    Ok(TransitionPlan {
        status: next_status,
        payment_status: next_payment,
        record_transaction: outcome == PaymentOutcome::Succeeded,
    })
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DbPool>,
    orders: OrderRepository,
    payments: PaymentRepository,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl PaymentReconciler {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            payments: PaymentRepository::new(db.clone()),
            db,
            event_sender,
            config,
        }
    }

    /// Applies one outcome atomically. Re-applying an already recorded
    /// `(processor_reference, outcome)` is a successful no-op.
    #[instrument(
        skip(self, report),
        fields(
            order_id = %report.order_id,
            outcome = %report.outcome,
            processor_reference = %report.processor_reference
        )
    )]
    pub async fn apply(&self, report: PaymentReport) -> Result<Reconciliation, ServiceError> {
        let record_status = report.outcome.record_status();

        let txn = self.db.begin().await?;
        let order = self
            .orders
            .lock_by_id(&txn, report.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(report.order_id))?;

        if let ReportSource::Client { user_id } = report.source {
            if order.user_id != user_id {
                return Err(ServiceError::NotFound(format!(
                    "Order {} not found",
                    report.order_id
                )));
            }
        }

        let recorded = self
            .payments
            .find_evidence(&txn, order.id, &report.processor_reference, record_status)
            .await?;
        if recorded.is_some() {
            txn.commit().await?;
            return Ok(self.duplicate(order));
        }

        let has_prior_success = report.outcome == PaymentOutcome::Refunded
            && self
                .payments
                .has_status(&txn, order.id, PaymentRecordStatus::Success)
                .await?;
        let plan = plan_transition(
            order.id,
            order.status,
            order.payment_status,
            report.outcome,
            has_prior_success,
        )?;

        let old_status = order.status;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(plan.status);
        active.payment_status = Set(plan.payment_status);
        if plan.record_transaction {
            active.transaction_id = Set(Some(report.processor_reference.clone()));
        }
        active.updated_at = Set(now);
        let updated = self.orders.update(&txn, active).await?;

        let evidence = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(updated.id),
            transaction_id: Set(report.processor_reference.clone()),
            amount: Set(report.amount),
            currency: Set(report.currency.to_lowercase()),
            payment_method: Set(report.payment_method.clone()),
            status: Set(record_status),
            source: Set(report.source.record_source()),
            response_data: Set(report.evidence.clone()),
            created_at: Set(now),
        };
        match self.payments.insert(&txn, evidence).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                // A concurrent delivery of the same event committed first.
                txn.rollback().await?;
                return Ok(self.duplicate(order));
            }
            Err(err) => return Err(err.into()),
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit reconciliation");
            ServiceError::DatabaseError(e)
        })?;

        self.record_outcome(report.outcome);
        info!(
            payment_status = %updated.payment_status,
            status = %updated.status,
            source = %report.source.record_source(),
            "payment reconciled"
        );

        self.event_sender
            .send_or_log(Event::PaymentReconciled {
                order_id: updated.id,
                transaction_id: report.processor_reference,
                outcome: report.outcome.to_string(),
                payment_status: updated.payment_status.to_string(),
                source: report.source.record_source().to_string(),
            })
            .await;
        if updated.status != old_status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: updated.id,
                    old_status: old_status.to_string(),
                    new_status: updated.status.to_string(),
                })
                .await;
        }

        Ok(Reconciliation {
            order: updated,
            applied: true,
        })
    }

    /// Applies a verified processor event, resolving its order from the
    /// echoed metadata or, for refunds without metadata, from the success
    /// evidence row of the refunded payment intent.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn apply_webhook_event(
        &self,
        event: PaymentEvent,
    ) -> Result<Reconciliation, ServiceError> {
        let order_id = match (event.order_id, event.payment_intent.as_deref()) {
            (Some(order_id), _) => order_id,
            (None, Some(intent)) if event.outcome == PaymentOutcome::Refunded => {
                self.order_paid_by(intent).await?
            }
            _ => {
                return Err(ServiceError::NotFound(format!(
                    "event {} carries no order reference",
                    event.event_id
                )))
            }
        };

        self.apply(PaymentReport {
            order_id,
            outcome: event.outcome,
            processor_reference: event.processor_reference,
            amount: event.amount,
            currency: event.currency,
            payment_method: event.payment_method.unwrap_or_else(|| "card".to_string()),
            evidence: event.payload,
            source: ReportSource::Webhook,
        })
        .await
    }

    /// The single order the processor confirmed as paid by `intent`.
    async fn order_paid_by(&self, intent: &str) -> Result<Uuid, ServiceError> {
        let rows = self
            .payments
            .find_confirmed_success_by_transaction(intent)
            .await?;
        let mut order_ids: Vec<Uuid> = rows.iter().map(|row| row.order_id).collect();
        order_ids.sort();
        order_ids.dedup();

        match order_ids.as_slice() {
            [order_id] => Ok(*order_id),
            [] => Err(ServiceError::NotFound(format!(
                "no order paid by payment intent {}",
                intent
            ))),
            several => {
                error!(%intent, orders = ?several, "payment intent confirmed for several orders");
                Err(ServiceError::Conflict(format!(
                    "payment intent {} is recorded as paid for {} orders; refusing to pick one",
                    intent,
                    several.len()
                )))
            }
        }
    }

    /// Applies an outcome reported by the order's owner.
    ///
    /// The reported `status` is validated but not applied; fulfillment
    /// status follows from reconciliation. A reported `paid` is untrusted
    /// evidence and is refused outright when client reports are not trusted.
    #[instrument(skip(self, report), fields(payment_status = %report.payment_status))]
    pub async fn apply_client_report(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        report: ClientPaymentReport,
    ) -> Result<Reconciliation, ServiceError> {
        OrderStatus::from_str(report.status.trim()).map_err(|_| {
            ServiceError::ValidationError(format!("unknown order status '{}'", report.status))
        })?;
        let payment_status = PaymentStatus::from_str(report.payment_status.trim()).map_err(|_| {
            ServiceError::ValidationError(format!(
                "unknown payment status '{}'",
                report.payment_status
            ))
        })?;

        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let reported_reference = report
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let (outcome, processor_reference) = match payment_status {
            PaymentStatus::Unpaid if order.payment_status == PaymentStatus::Unpaid => {
                return Ok(Reconciliation {
                    order,
                    applied: false,
                })
            }
            PaymentStatus::Unpaid => {
                return Err(ServiceError::InvalidStatus(format!(
                    "payment status cannot move from '{}' back to 'unpaid'",
                    order.payment_status
                )))
            }
            PaymentStatus::Refunded => {
                return Err(ServiceError::ValidationError(
                    "refunds are reported by the payment processor only".to_string(),
                ))
            }
            PaymentStatus::Paid => {
                let reference = reported_reference.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "transaction_id is required when reporting a payment".to_string(),
                    )
                })?;
                if !self.config.trust_client_payment_reports {
                    return Err(ServiceError::Forbidden(
                        "payments are confirmed by the payment processor only".to_string(),
                    ));
                }
                warn!(%order_id, %user_id, transaction_id = %reference, "client-reported payment accepted without processor confirmation");
                (PaymentOutcome::Succeeded, reference)
            }
            PaymentStatus::Failed | PaymentStatus::Canceled => {
                let reference = reported_reference
                    .or_else(|| order.transaction_id.clone())
                    .unwrap_or_else(|| format!("client:{}", order_id));
                let outcome = if payment_status == PaymentStatus::Failed {
                    PaymentOutcome::Failed
                } else {
                    PaymentOutcome::Canceled
                };
                (outcome, reference)
            }
        };

        self.apply(PaymentReport {
            order_id,
            outcome,
            processor_reference: processor_reference.clone(),
            amount: order.total_amount,
            currency: self.config.payment.currency.clone(),
            payment_method: "card".to_string(),
            evidence: json!({
                "reported_by": user_id,
                "status": report.status,
                "payment_status": report.payment_status,
                "transaction_id": processor_reference,
            }),
            source: ReportSource::Client { user_id },
        })
        .await
    }

    fn duplicate(&self, order: order::Model) -> Reconciliation {
        CHECKOUT_METRICS.duplicate_reports.inc();
        info!(order_id = %order.id, "payment outcome already recorded");
        Reconciliation {
            order,
            applied: false,
        }
    }

    fn record_outcome(&self, outcome: PaymentOutcome) {
        let counter = match outcome {
            PaymentOutcome::Succeeded => &CHECKOUT_METRICS.payments_succeeded,
            PaymentOutcome::Failed => &CHECKOUT_METRICS.payments_failed,
            PaymentOutcome::Canceled => &CHECKOUT_METRICS.payments_canceled,
            PaymentOutcome::Refunded => &CHECKOUT_METRICS.payments_refunded,
        };
        counter.inc();
    }
}
