//! isahp-rs: instance-wise self-attentive Hawkes process (Burn implementation)

pub mod isahp;

pub use isahp::settings::{settings, Settings};

/// Test utilities for backend-aware tensor construction
///
/// Provides helper functions for creating tensors that work with Burn 0.18's
/// Into<TensorData> trait bounds using Vec<T> + .as_slice() pattern.
pub mod test_utils;
