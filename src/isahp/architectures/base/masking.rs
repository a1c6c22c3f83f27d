//! Causal, padding and sequence-length masks for padded event batches.
//!
//! Masks are materialized with explicit index loops and uploaded as boolean
//! tensors, so the (i, j) semantics stay readable and no broadcasting rules
//! are relied upon.

use burn::prelude::*;
use burn::tensor::Bool;

/// Lower-triangular causal mask: true where key position j <= query position i.
pub fn subsequent_mask<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 2, Bool> {
    let mut data = Vec::with_capacity(size * size);
    for i in 0..size {
        for j in 0..size {
            data.push(j <= i);
        }
    }
    Tensor::<B, 1, Bool>::from_bool(data.as_slice().into(), device).reshape([size, size])
}

/// Per-position padding mask: true where the value differs from `pad`.
pub fn padding_mask<B: Backend>(seq: &Tensor<B, 2>, pad: f32) -> Tensor<B, 2, Bool> {
    seq.clone().not_equal_elem(pad)
}

/// Combined causal + padding attention mask of shape (batch, len, len).
///
/// Entry (b, i, j) is true iff j <= i and neither i nor j is a padding
/// position, so no query attends to padding or to the future.
pub fn combined_mask<B: Backend>(seq: &Tensor<B, 2>, pad: f32) -> Tensor<B, 3, Bool> {
    let [batch, len] = seq.dims();
    let device = seq.device();

    let valid = padding_mask(seq, pad).float();

    let valid_q: Tensor<B, 3> = valid.clone().unsqueeze_dim(2); // (batch, len, 1)
    let valid_q = valid_q.repeat(&[1, 1, len]);
    let valid_k: Tensor<B, 3> = valid.unsqueeze_dim(1); // (batch, 1, len)
    let valid_k = valid_k.repeat(&[1, len, 1]);

    let causal: Tensor<B, 3> = subsequent_mask::<B>(len, &device).float().unsqueeze_dim(0);
    let causal = causal.repeat(&[batch, 1, 1]);

    (valid_q * valid_k * causal).greater_elem(0.5)
}

/// Per-(batch, position) validity mask: true where position < length.
pub fn sequence_length_mask<B: Backend>(
    lengths: &[usize],
    max_len: usize,
    device: &B::Device,
) -> Tensor<B, 2, Bool> {
    let mut data = Vec::with_capacity(lengths.len() * max_len);
    for &length in lengths {
        for pos in 0..max_len {
            data.push(pos < length);
        }
    }
    Tensor::<B, 1, Bool>::from_bool(data.as_slice().into(), device)
        .reshape([lengths.len(), max_len])
}

/// Derive per-sequence lengths from a padded batch as the number of rows
/// whose absolute sum is non-zero. Padding rows are all-zero by contract.
pub fn sequence_lengths<B: Backend>(batch: &Tensor<B, 3>) -> Vec<usize> {
    let [n_batch, max_len, width] = batch.dims();
    let data = batch.clone().abs().to_data();
    let values = data
        .as_slice::<f32>()
        .expect("event batch must be an f32 tensor");

    let mut lengths = Vec::with_capacity(n_batch);
    for b in 0..n_batch {
        let mut length = 0;
        for pos in 0..max_len {
            let row = &values[(b * max_len + pos) * width..(b * max_len + pos + 1) * width];
            if row.iter().sum::<f32>() > 0.0 {
                length = pos + 1;
            }
        }
        lengths.push(length);
    }
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_subsequent_mask_is_lower_triangular() {
        let device = Default::default();
        let mask = subsequent_mask::<TestBackend>(4, &device);
        let values: Vec<bool> = mask.into_data().to_vec().unwrap();

        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(values[i * 4 + j], j <= i, "entry ({}, {})", i, j);
            }
        }
    }

    #[test]
    fn test_padding_mask_marks_non_pad() {
        let device = Default::default();
        let seq = Tensor::<TestBackend, 1>::from_floats([1.5, 2.0, 0.0, 0.0].as_slice(), &device)
            .reshape([1, 4]);
        let mask = padding_mask(&seq, 0.0);
        let values: Vec<bool> = mask.into_data().to_vec().unwrap();
        assert_eq!(values, vec![true, true, false, false]);
    }

    #[test]
    fn test_combined_mask_blocks_future_and_padding() {
        let device = Default::default();
        // One sequence of 3 valid positions followed by one pad.
        let seq = Tensor::<TestBackend, 1>::from_floats([0.5, 1.0, 2.5, 0.0].as_slice(), &device)
            .reshape([1, 4]);
        let mask = combined_mask(&seq, 0.0);
        assert_eq!(mask.dims(), [1, 4, 4]);
        let values: Vec<bool> = mask.into_data().to_vec().unwrap();

        for i in 0..4 {
            for j in 0..4 {
                let expected = j <= i && i < 3 && j < 3;
                assert_eq!(values[i * 4 + j], expected, "entry ({}, {})", i, j);
            }
        }
    }

    #[test]
    fn test_sequence_length_mask() {
        let device = Default::default();
        let mask = sequence_length_mask::<TestBackend>(&[2, 4], 4, &device);
        let values: Vec<bool> = mask.into_data().to_vec().unwrap();
        assert_eq!(
            values,
            vec![true, true, false, false, true, true, true, true]
        );
    }

    #[test]
    fn test_sequence_lengths_from_batch() {
        let device = Default::default();
        // Two sequences padded to 3 rows of [t, type]; second has one pad row.
        let data = [
            0.5f32, 1.0, 1.5, 0.0, 2.5, 2.0, //
            1.0, 0.0, 2.0, 1.0, 0.0, 0.0,
        ];
        let batch =
            Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &device).reshape([2, 3, 2]);
        assert_eq!(sequence_lengths(&batch), vec![3, 2]);
    }
}
