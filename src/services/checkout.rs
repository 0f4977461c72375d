use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        cart,
        order::{self, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    metrics::CHECKOUT_METRICS,
    repositories::{CartRepository, OrderRepository},
    services::{
        payment_gateway::{PaymentGateway, PaymentHandle},
        pricing::{self, CartLine, PricingSnapshot, ShippingPolicy},
    },
};
use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{Set, TransactionTrait};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

const ORDER_NUMBER_PREFIX: &str = "ORD-";
const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Produces candidate order numbers; uniqueness is enforced by storage.
pub type OrderNumberGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// `ORD-` followed by eight uppercase alphanumerics
pub fn random_order_number() -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..8)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", ORDER_NUMBER_PREFIX, token)
}

/// Delivery details supplied at checkout
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutInput {
    #[validate(
        length(min = 1, max = 500, message = "shipping_address is required"),
        custom = "not_blank"
    )]
    #[schema(example = "1 Main St, Springfield")]
    pub shipping_address: String,
    #[validate(
        length(min = 1, max = 30, message = "phone is required"),
        custom = "not_blank"
    )]
    #[schema(example = "+1-555-0100")]
    pub phone: String,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// A created order together with the handle the client pays with
#[derive(Debug, Clone)]
pub struct CheckoutResult {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: PaymentHandle,
}

/// Checkout Orchestrator: turns the caller's cart into an order and a
/// pending payment.
///
/// The cart is held by a lease for the duration of a checkout so that a
/// second concurrent checkout of the same cart is rejected with `Conflict`.
/// The order is committed before the processor is contacted; if payment
/// initiation fails the order stays `pending`/`unpaid`, the cart keeps its
/// contents, and the caller receives the order id to resume payment.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    carts: CartRepository,
    orders: OrderRepository,
    gateway: Arc<dyn PaymentGateway>,
    shipping: Arc<dyn ShippingPolicy>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    order_numbers: OrderNumberGenerator,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        shipping: Arc<dyn ShippingPolicy>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            carts: CartRepository::new(db.clone()),
            orders: OrderRepository::new(db.clone()),
            db,
            gateway,
            shipping,
            event_sender,
            config,
            order_numbers: Arc::new(random_order_number),
        }
    }

    /// Replaces the order number source
    pub fn with_order_numbers(mut self, generator: OrderNumberGenerator) -> Self {
        self.order_numbers = generator;
        self
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutResult, ServiceError> {
        input.validate()?;

        let cart = self.carts.get_or_create(user_id).await?;
        let now = Utc::now();
        let Some(claimed_at) = self
            .carts
            .claim_lease(&*self.db, cart.id, now, now - self.config.checkout_lease())
            .await?
        else {
            CHECKOUT_METRICS.checkouts_rejected.inc();
            return Err(ServiceError::Conflict(
                "A checkout for this cart is already in progress".to_string(),
            ));
        };

        match self.place_order(&cart, claimed_at, user_id, &input).await {
            Ok(placed) => Ok(placed),
            Err(err) => {
                if !matches!(err, ServiceError::PaymentInitiationFailed { .. }) {
                    CHECKOUT_METRICS.checkouts_rejected.inc();
                }
                self.release(&cart, claimed_at).await;
                Err(err)
            }
        }
    }

    /// Requests a fresh payment intent for an order that is still awaiting
    /// payment. No new order is created and the cart is not touched.
    #[instrument(skip(self))]
    pub async fn resume_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<PaymentHandle, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        ensure_awaiting_payment(&order)?;

        let handle = self.gateway.create_intent(&order).await?;

        let txn = self.db.begin().await?;
        let locked = self
            .orders
            .lock_by_id(&txn, order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        // A webhook may have settled the order while the processor was called.
        ensure_awaiting_payment(&locked)?;

        let mut active: order::ActiveModel = locked.into();
        active.transaction_id = Set(Some(handle.payment_intent_id.clone()));
        active.updated_at = Set(Utc::now());
        self.orders.update(&txn, active).await?;
        txn.commit().await?;

        CHECKOUT_METRICS.payment_intents_created.inc();
        info!(payment_intent_id = %handle.payment_intent_id, "payment resumed");
        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id,
                payment_intent_id: handle.payment_intent_id.clone(),
            })
            .await;

        Ok(handle)
    }

    async fn place_order(
        &self,
        cart: &cart::Model,
        claimed_at: DateTime<Utc>,
        user_id: Uuid,
        input: &CheckoutInput,
    ) -> Result<CheckoutResult, ServiceError> {
        let lines = self.cart_lines(cart).await?;
        let snapshot = pricing::snapshot(&lines, &input.shipping_address, self.shipping.as_ref())?;

        let (order, items) = self.insert_order(user_id, input, &snapshot).await?;
        CHECKOUT_METRICS.orders_created.inc();
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_amount = %order.total_amount,
            "order created"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                user_id,
                total_amount: order.total_amount,
            })
            .await;

        let payment = match self.gateway.create_intent(&order).await {
            Ok(handle) => handle,
            Err(err) => {
                CHECKOUT_METRICS.payment_initiation_failures.inc();
                error!(order_id = %order.id, error = %err, "payment initiation failed; order kept awaiting payment");
                self.event_sender
                    .send_or_log(Event::PaymentInitiationFailed {
                        order_id: order.id,
                        reason: err.to_string(),
                    })
                    .await;
                return Err(ServiceError::PaymentInitiationFailed {
                    order_id: order.id,
                    order_number: order.order_number,
                    message: gateway_message(err),
                });
            }
        };

        let order = self.finalize(cart, claimed_at, order, &payment).await?;
        CHECKOUT_METRICS.payment_intents_created.inc();

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id: order.id,
                payment_intent_id: payment.payment_intent_id.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_id: cart.id,
                user_id,
            })
            .await;

        Ok(CheckoutResult {
            order,
            items,
            payment,
        })
    }

    async fn cart_lines(&self, cart: &cart::Model) -> Result<Vec<CartLine>, ServiceError> {
        let rows = self.carts.items_with_products(&*self.db, cart.id).await?;
        rows.into_iter()
            .map(|(item, product)| match product {
                Some(product) if product.is_active => Ok(CartLine {
                    product_id: product.id,
                    name: product.name,
                    unit_price: product.price,
                    quantity: item.quantity,
                }),
                _ => Err(ServiceError::NotFound(format!(
                    "Product {} is no longer available",
                    item.product_id
                ))),
            })
            .collect()
    }

    /// Inserts the order and its item snapshot, drawing a new order number
    /// whenever the unique index reports a collision.
    async fn insert_order(
        &self,
        user_id: Uuid,
        input: &CheckoutInput,
        snapshot: &PricingSnapshot,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            let order_number = (self.order_numbers)();
            let (header, lines) = self.order_rows(user_id, input, snapshot, order_number.clone());

            let txn = self.db.begin().await?;
            match self.orders.insert_with_items(&txn, header, lines).await {
                Ok((order, items)) => {
                    if !order.totals_match(&items) {
                        txn.rollback().await?;
                        return Err(ServiceError::InternalError(format!(
                            "order {} totals do not add up",
                            order.order_number
                        )));
                    }
                    txn.commit().await?;
                    return Ok((order, items));
                }
                Err(err) if is_unique_violation(&err) => {
                    txn.rollback().await?;
                    CHECKOUT_METRICS.order_number_collisions.inc();
                    warn!(attempt, %order_number, "order number collision; retrying");
                }
                Err(err) => {
                    txn.rollback().await?;
                    return Err(err.into());
                }
            }
        }

        Err(ServiceError::InternalError(format!(
            "no unique order number after {} attempts",
            ORDER_NUMBER_ATTEMPTS
        )))
    }

    fn order_rows(
        &self,
        user_id: Uuid,
        input: &CheckoutInput,
        snapshot: &PricingSnapshot,
        order_number: String,
    ) -> (order::ActiveModel, Vec<order_item::ActiveModel>) {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let header = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Unpaid),
            total_amount: Set(snapshot.grand_total),
            shipping_cost: Set(snapshot.shipping_cost),
            currency: Set(self.config.payment.currency.to_lowercase()),
            shipping_address: Set(input.shipping_address.trim().to_string()),
            phone: Set(input.phone.trim().to_string()),
            transaction_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let lines = snapshot
            .lines
            .iter()
            .map(|line| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.name.clone()),
                price: Set(line.unit_price),
                quantity: Set(line.quantity),
                created_at: Set(now),
            })
            .collect();

        (header, lines)
    }

    /// Stores the processor reference, empties the cart and drops the lease
    /// in one transaction.
    ///
    /// If the lease expired during the processor call and another checkout
    /// took the cart, nothing is written: the cart now belongs to that
    /// checkout, and this order stays awaiting payment so the caller can
    /// resume it.
    async fn finalize(
        &self,
        cart: &cart::Model,
        claimed_at: DateTime<Utc>,
        order: order::Model,
        payment: &PaymentHandle,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        if !self.carts.release_lease(&txn, cart.id, claimed_at).await? {
            txn.rollback().await?;
            CHECKOUT_METRICS.checkout_leases_lost.inc();
            warn!(
                order_id = %order.id,
                cart_id = %cart.id,
                "checkout lease expired before finalisation; cart left to the newer checkout"
            );
            return Err(ServiceError::PaymentInitiationFailed {
                order_id: order.id,
                order_number: order.order_number,
                message: "Checkout took too long and the cart was released; resume payment for this order"
                    .to_string(),
            });
        }

        let mut active: order::ActiveModel = order.into();
        active.transaction_id = Set(Some(payment.payment_intent_id.clone()));
        active.updated_at = Set(Utc::now());
        let order = self.orders.update(&txn, active).await?;

        let removed = self.carts.clear_items(&txn, cart.id).await?;
        txn.commit().await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "failed to commit checkout finalisation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, removed, "cart cleared after payment initiation");
        Ok(order)
    }

    async fn release(&self, cart: &cart::Model, claimed_at: DateTime<Utc>) {
        if let Err(e) = self.carts.release_lease(&*self.db, cart.id, claimed_at).await {
            // An unreleased lease expires on its own after `checkout_lease_secs`.
            warn!(cart_id = %cart.id, error = %e, "failed to release checkout lease");
        }
    }
}

fn ensure_awaiting_payment(order: &order::Model) -> Result<(), ServiceError> {
    if order.status != OrderStatus::Pending || !order.payment_status.is_payable() {
        return Err(ServiceError::InvalidStatus(format!(
            "order {} is {}/{} and cannot accept a new payment",
            order.order_number, order.status, order.payment_status
        )));
    }
    Ok(())
}

fn gateway_message(err: ServiceError) -> String {
    match err {
        ServiceError::GatewayError(message) => message,
        other => other.response_message(),
    }
}
