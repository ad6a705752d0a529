//! Shared domain model for the Stockledger inventory engine
//!
//! Ledger records, the reservation state machine and the allocation and
//! FEFO planners. Nothing in this crate performs I/O, so every storage
//! backend applies exactly the same rules.

pub mod error;
pub mod models;
pub mod planning;
pub mod types;

pub use error::*;
pub use models::*;
pub use planning::*;
pub use types::*;
