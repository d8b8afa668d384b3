//! Chess data shared by the engine worker: position validation and move notation.

pub mod notation;
pub mod position;

pub use position::{validate, Position, PositionError, Side};
