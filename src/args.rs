//! Argument normalization: caller argument shapes into a uniform batch of records.

mod argument;
mod normalize;

pub use argument::{Argument, Record};
pub use normalize::{KeyPolicy, NormalizeOptions, Normalized, normalize};
