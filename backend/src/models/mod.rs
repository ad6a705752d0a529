//! Ledger models and planners
//!
//! Re-exports the pure ledger types from the shared crate so the engine and
//! the stores name them from one place.

pub use shared::error::*;
pub use shared::models::*;
pub use shared::planning::*;
pub use shared::types::*;
