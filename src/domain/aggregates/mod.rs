//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod reservation;
pub mod return_case;

pub use product::Product;
pub use order::{LineItem, NewOrder, Order, OrderError, OrderRecord, OrderStatus, RefundRecord};
pub use cart::{Cart, CartError, CartLine, CheckoutSnapshot, ShippingPolicy};
pub use reservation::Hold;
pub use return_case::{ReturnCase, ReturnError, ReturnLineRequest, ReturnRecord, ReturnStatus};
