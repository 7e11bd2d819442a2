//! Error handling shared across crates.
//!
//! Provides a small set of common error types plus classification traits so
//! callers can make generic retry/propagation decisions without matching on
//! concrete error enums.

mod common;
mod traits;

pub use common::*;
pub use traits::*;
