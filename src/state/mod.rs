//! Shared observable ride state.

pub mod repository;

pub use repository::{RideRepository, RideSnapshot};
