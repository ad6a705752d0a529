//! Pure planners that decide where stock comes from.
//!
//! Planners only read; applying a plan is the engine's job, inside the same
//! transaction that locked the rows the plan was computed from.

mod allocation;
mod fefo;

pub use allocation::*;
pub use fefo::*;
