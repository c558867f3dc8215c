//! Use cases: the stock ledger, cart holds, and the order lifecycle that ties them to payments.

pub mod ledger;
pub mod orchestrator;
pub mod ports;
pub mod reservations;

pub use ledger::{InventoryLedger, RestockReport, StockLine};
pub use orchestrator::{CheckoutRequest, CheckoutStarted, OrderOrchestrator, OrderPolicy};
pub use reservations::{HoldSweeper, ReservationService};
