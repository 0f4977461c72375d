pub mod admin_orders;
pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService,
    checkout::CheckoutService,
    orders::OrderService,
    payment_gateway::PaymentGateway,
    pricing::{FlatRateShipping, ShippingPolicy},
    reconciler::PaymentReconciler,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppServices {
    /// Wires every service against one pool, event channel and processor
    /// client. The gateway is passed in so tests and alternative processors
    /// can supply their own.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let shipping: Arc<dyn ShippingPolicy> =
            Arc::new(FlatRateShipping::new(config.shipping_flat_rate));

        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            shipping,
            event_sender.clone(),
            config.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(db_pool, event_sender, config));

        Self {
            cart,
            orders,
            checkout,
            reconciler,
            gateway,
        }
    }

    /// Replaces the checkout service, e.g. with a custom order number source
    pub fn with_checkout(mut self, checkout: CheckoutService) -> Self {
        self.checkout = Arc::new(checkout);
        self
    }
}
