use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    ///
    /// Events are emitted after the owning transaction commits, so a send
    /// failure must never turn a committed change into an error response.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted by the checkout and reconciliation flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        total_amount: Decimal,
    },
    PaymentIntentCreated {
        order_id: Uuid,
        payment_intent_id: String,
    },
    PaymentInitiationFailed {
        order_id: Uuid,
        reason: String,
    },
    PaymentReconciled {
        order_id: Uuid,
        transaction_id: String,
        outcome: String,
        payment_status: String,
        source: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CartCleared {
        cart_id: Uuid,
        user_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order.created",
            Event::PaymentIntentCreated { .. } => "payment.intent_created",
            Event::PaymentInitiationFailed { .. } => "payment.initiation_failed",
            Event::PaymentReconciled { .. } => "payment.reconciled",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::CartCleared { .. } => "cart.cleared",
        }
    }
}

/// Envelope used when an event is logged or forwarded
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: Event,
}

impl From<Event> for EventEnvelope {
    fn from(payload: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: payload.name(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let envelope = EventEnvelope::from(event);
        match &envelope.payload {
            Event::PaymentInitiationFailed { order_id, reason } => {
                warn!(event = envelope.name, %order_id, %reason, "payment initiation failed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(event = envelope.name, %order_id, %old_status, %new_status, "order status changed");
            }
            _ => {
                debug!(event = envelope.name, id = %envelope.id, payload = ?envelope.payload, "event processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
