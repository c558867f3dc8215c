//! Adapters behind the application ports.

pub mod memory;
pub mod notify;
pub mod postgres;
pub mod stripe;
