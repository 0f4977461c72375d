// Cart and order ledger
pub mod cart;
pub mod orders;

// Checkout
pub mod checkout;
pub mod pricing;

// Payments
pub mod payment_gateway;
pub mod reconciler;
