//! Pure risk primitives shared by the sanity gate and operator tooling.

pub mod multiplier;

pub use multiplier::{compute_multiplier, MultiplierInputs, MAX_MULTIPLIER, MIN_MULTIPLIER};
