//! Domain models for the inventory engine

mod lot;
mod movement;
mod reservation;
mod stock;

pub use lot::*;
pub use movement::*;
pub use reservation::*;
pub use stock::*;
