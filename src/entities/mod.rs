pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product; // read-only catalog view

pub use order::{OrderStatus, PaymentStatus};
pub use payment::{PaymentRecordStatus, PaymentSource};
