// Test utilities for backend-aware tensor construction.
//
// Helper functions for creating tensors that work with Burn 0.18's
// Into<TensorData> trait bounds (Vec<T> + .as_slice() pattern), plus a
// builder for padded event batches.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

/// Create f32 tensor from data slice with specified shape
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(
    data: &[f32],
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<f32> = data.to_vec();
    let flat_tensor = Tensor::<B, 1>::from_floats(data_vec.as_slice(), device);

    let shape_obj = burn::tensor::Shape::from(shape);
    flat_tensor.reshape(shape_obj)
}

/// Create bool tensor from data slice with specified shape
pub fn tensor_from_bool_vec<B: Backend, const D: usize>(
    data: &[bool],
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D, burn::tensor::Bool> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<bool> = data.to_vec();
    let flat_tensor = Tensor::<B, 1, burn::tensor::Bool>::from_bool(data_vec.as_slice().into(), device);
    let shape_obj = burn::tensor::Shape::from(shape);
    flat_tensor.reshape(shape_obj)
}

/// Build a padded `[timestamp, type]` event batch from per-sequence event
/// lists. Sequences are right-padded with all-zero rows to the longest
/// length, the padding contract the masking utilities expect.
pub fn event_batch<B: Backend>(
    sequences: &[Vec<(f32, i64)>],
    device: &B::Device,
) -> Tensor<B, 3> {
    let max_len = sequences.iter().map(|s| s.len()).max().unwrap_or(0);
    assert!(max_len > 0, "event batch needs at least one event");

    let mut data = vec![0.0f32; sequences.len() * max_len * 2];
    for (b, seq) in sequences.iter().enumerate() {
        for (pos, &(t, ty)) in seq.iter().enumerate() {
            data[(b * max_len + pos) * 2] = t;
            data[(b * max_len + pos) * 2 + 1] = ty as f32;
        }
    }

    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([sequences.len(), max_len, 2])
}
