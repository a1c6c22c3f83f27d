// Causal + padding mask properties over padded event batches.

use burn::prelude::*;
use burn_ndarray::NdArray;
use isahp_rs::isahp::architectures::base::masking;
use isahp_rs::test_utils::event_batch;

type TestBackend = NdArray<f32>;

#[test]
fn test_combined_mask_never_allows_future_or_padding() {
    let device = <TestBackend as Backend>::Device::default();

    // Two sequences with different lengths; the model grid covers events 1..
    let batch: Tensor<TestBackend, 3> = event_batch(
        &[
            vec![(0.5, 0), (1.0, 1), (1.5, 2), (2.5, 0), (3.0, 1)],
            vec![(0.2, 1), (0.8, 0), (1.1, 1)],
        ],
        &device,
    );
    let [n_batch, seq_len, _] = batch.dims();
    let len = seq_len - 1;

    let times: Tensor<TestBackend, 2> = batch
        .clone()
        .slice([0..n_batch, 1..seq_len, 0..1])
        .squeeze(2);
    let mask = masking::combined_mask(&times, 0.0);
    assert_eq!(mask.dims(), [n_batch, len, len]);

    let lengths = masking::sequence_lengths(&batch);
    assert_eq!(lengths, vec![5, 3]);

    let values: Vec<bool> = mask.into_data().to_vec().unwrap();
    for b in 0..n_batch {
        // Valid model positions for sequence b: 0..lengths[b] - 1.
        let valid_len = lengths[b] - 1;
        for i in 0..len {
            for j in 0..len {
                let allowed = values[(b * len + i) * len + j];
                if j > i || i >= valid_len || j >= valid_len {
                    assert!(!allowed, "mask ({}, {}, {}) must be false", b, i, j);
                } else {
                    assert!(allowed, "mask ({}, {}, {}) must be true", b, i, j);
                }
            }
        }
    }
}

#[test]
fn test_sequence_length_mask_matches_lengths() {
    let device = <TestBackend as Backend>::Device::default();

    let batch: Tensor<TestBackend, 3> = event_batch(
        &[
            vec![(1.0, 0), (2.0, 1), (3.0, 0), (4.0, 1)],
            vec![(0.5, 1), (1.5, 0)],
        ],
        &device,
    );
    let lengths = masking::sequence_lengths(&batch);
    let mask = masking::sequence_length_mask::<TestBackend>(&lengths, 4, &device);
    let values: Vec<bool> = mask.into_data().to_vec().unwrap();

    assert_eq!(
        values,
        vec![true, true, true, true, true, true, false, false]
    );
}

#[test]
fn test_subsequent_mask_diagonal_is_allowed() {
    let device = <TestBackend as Backend>::Device::default();
    let mask = masking::subsequent_mask::<TestBackend>(5, &device);
    let values: Vec<bool> = mask.into_data().to_vec().unwrap();

    for i in 0..5 {
        assert!(values[i * 5 + i], "position {} must attend to itself", i);
    }
}
