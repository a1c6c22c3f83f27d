//! Negative log-likelihood of a padded event batch under the learned
//! intensity, with a Monte-Carlo estimate of the continuous-time integral.

use burn::prelude::*;
use burn::tensor::Bool;
use rand::{rngs::StdRng, Rng};

use super::model::SelfAttentiveHawkes;

/// Floor applied to the intensity before taking the log. The tanh keeps the
/// intensity below 1 but nothing in the parameterization bounds it away from
/// zero, so the log term needs an explicit floor.
pub const INTENSITY_FLOOR: f64 = 1e-9;

/// Batch-normalized likelihood terms. `nll` is the training objective;
/// `integral` and `log_sum` are the two sub-terms kept for diagnostics.
#[derive(Debug, Clone)]
pub struct NllOutput<B: Backend> {
    pub nll: Tensor<B, 1>,
    pub integral: Tensor<B, 1>,
    pub log_sum: Tensor<B, 1>,
}

/// Host-side pairwise elapsed-time grids for one batch.
///
/// All entries live on the (seq_len - 1) model grid. `dt_arr[b, i, j]` is the
/// elapsed time from event j to event i+1 (lower-triangular including the
/// first superdiagonal band, which the zeroed excitation parameters render
/// inert); `dt_seq` is its diagonal, the gap to the immediately preceding
/// event. `dt_meta` replicates `dt_seq` across each row so Monte-Carlo
/// samples can be scaled to the correct inter-event interval, and
/// `dt_offset` is the residual offset back to earlier events. The tril /
/// mask order of the decomposition must stay as is: magnitudes are only
/// meaningful after masking.
struct PairwiseGaps {
    dt_arr: Vec<f32>,
    dt_seq: Vec<f32>,
    dt_meta: Vec<f32>,
    dt_offset: Vec<f32>,
}

fn pairwise_gaps(timestamps: &[f32], src_valid: &[bool], batch: usize, seq_len: usize) -> PairwiseGaps {
    let len = seq_len - 1;
    let mut dt_arr = vec![0.0f32; batch * len * len];
    let mut dt_seq = vec![0.0f32; batch * len];
    let mut dt_meta = vec![0.0f32; batch * len * len];
    let mut dt_offset = vec![0.0f32; batch * len * len];

    for b in 0..batch {
        let ts = &timestamps[b * seq_len..(b + 1) * seq_len];
        for i in 0..len {
            dt_seq[b * len + i] = (ts[i + 1] - ts[i]).abs();
            for j in 0..len {
                let idx = (b * len + i) * len + j;
                // Lower triangle of the full pairwise grid, sliced to the
                // model steps: entry (i, j) maps to original events (i+1, j).
                if j <= i + 1 {
                    dt_arr[idx] = (ts[i + 1] - ts[j]).abs();
                }
                if src_valid[idx] {
                    dt_meta[idx] = dt_seq[b * len + i];
                    dt_offset[idx] = dt_arr[idx] - dt_meta[idx];
                }
            }
        }
    }

    PairwiseGaps {
        dt_arr,
        dt_seq,
        dt_meta,
        dt_offset,
    }
}

fn host_floats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<f32> {
    tensor
        .to_data()
        .to_vec::<f32>()
        .expect("tensor must hold f32 data")
}

fn host_bools<B: Backend, const D: usize>(mask: &Tensor<B, D, Bool>) -> Vec<bool> {
    host_floats(&mask.clone().float())
        .into_iter()
        .map(|v| v > 0.5)
        .collect()
}

/// Dense per-position event types, accepting both the `[t, type]` layout and
/// the `[t, onehot...]` layout.
pub fn event_types_host<B: Backend>(event_seqs: &Tensor<B, 3>, n_types: usize) -> Vec<usize> {
    let [batch, seq_len, width] = event_seqs.dims();
    let values = host_floats(event_seqs);

    let mut types = Vec::with_capacity(batch * seq_len);
    for b in 0..batch {
        for pos in 0..seq_len {
            let row = &values[(b * seq_len + pos) * width..(b * seq_len + pos + 1) * width];
            let ty = if width == 2 {
                row[1].round() as usize
            } else {
                // One-hot layout: the set bit after the timestamp column.
                let mut best = 0;
                for (k, &value) in row[1..].iter().enumerate() {
                    if value > row[1 + best] {
                        best = k;
                    }
                }
                best
            };
            assert!(
                ty < n_types,
                "event type {} out of range for {} types",
                ty,
                n_types
            );
            types.push(ty);
        }
    }
    types
}

/// Intensity per (valid step, type) evaluated at the observed event times.
///
/// This is the quantity whose log enters the likelihood and whose argmax
/// predicts the next event type.
pub fn observed_intensities<B: Backend>(
    model: &SelfAttentiveHawkes<B>,
    event_seqs: &Tensor<B, 3>,
    src_mask: &Tensor<B, 3, Bool>,
    mu: &Tensor<B, 3>,
    alpha: &Tensor<B, 4>,
    gamma: &Tensor<B, 4>,
) -> Tensor<B, 3> {
    let [batch, seq_len, _] = event_seqs.dims();
    let len = seq_len - 1;
    let device = event_seqs.device();

    let timestamps = host_floats(
        &event_seqs
            .clone()
            .slice([0..batch, 0..seq_len, 0..1])
            .squeeze::<2>(2),
    );
    let src_valid = host_bools(src_mask);
    let gaps = pairwise_gaps(&timestamps, &src_valid, batch, seq_len);

    let dt_arr =
        Tensor::<B, 1>::from_floats(gaps.dt_arr.as_slice(), &device).reshape([batch, len, len]);
    model.state_decay(mu, alpha, gamma, &dt_arr)
}

/// Monte-Carlo negative log-likelihood of one batch.
///
/// The log-likelihood term evaluates the intensity at the observed gaps and
/// reads off the true event type; the integral term draws `n_mc_samples`
/// uniform times inside every inter-event interval (shifted per key by
/// `dt_offset`), averages the total intensity over the draws and scales by
/// the interval length. Both terms reduce over valid steps only and are
/// normalized by the batch size.
///
/// The estimator is reproducible for a fixed `rng` seed and unbiased in the
/// integral; its variance shrinks as `n_mc_samples` grows.
pub fn eval_nll<B: Backend>(
    model: &SelfAttentiveHawkes<B>,
    event_seqs: &Tensor<B, 3>,
    src_mask: &Tensor<B, 3, Bool>,
    seq_mask: &Tensor<B, 2, Bool>,
    mu: &Tensor<B, 3>,
    alpha: &Tensor<B, 4>,
    gamma: &Tensor<B, 4>,
    n_mc_samples: usize,
    rng: &mut StdRng,
) -> NllOutput<B> {
    assert!(n_mc_samples > 0, "n_mc_samples must be positive");

    let [batch, seq_len, _] = event_seqs.dims();
    let len = seq_len - 1;
    let n_types = model.n_types();
    let device = event_seqs.device();

    let timestamps = host_floats(
        &event_seqs
            .clone()
            .slice([0..batch, 0..seq_len, 0..1])
            .squeeze::<2>(2),
    );
    let src_valid = host_bools(src_mask);
    let gaps = pairwise_gaps(&timestamps, &src_valid, batch, seq_len);

    let step_mask = seq_mask.clone().float();

    // Log-likelihood term: log intensity of the type that actually occurred,
    // at the observed event time, over valid steps.
    let dt_arr =
        Tensor::<B, 1>::from_floats(gaps.dt_arr.as_slice(), &device).reshape([batch, len, len]);
    let cell_t = model.state_decay(mu, alpha, gamma, &dt_arr);

    let types = event_types_host(event_seqs, n_types);
    let mut onehot = vec![0.0f32; batch * len * n_types];
    for b in 0..batch {
        for i in 0..len {
            // Step i predicts event i+1.
            onehot[(b * len + i) * n_types + types[b * seq_len + i + 1]] = 1.0;
        }
    }
    let type_mask =
        Tensor::<B, 1>::from_floats(onehot.as_slice(), &device).reshape([batch, len, n_types]);

    let log_intensities = cell_t.clamp_min(INTENSITY_FLOOR).log();
    let log_selected: Tensor<B, 2> = (log_intensities * type_mask).sum_dim(2).squeeze(2);
    let log_sum = (log_selected * step_mask.clone()).sum();

    // Integral term: importance-style samples inside each interval. Draw
    // order is fixed (batch, query, key, sample) so a given seed always
    // produces the same estimate.
    let mut taus = vec![0.0f32; batch * len * len * n_mc_samples];
    for pair in 0..batch * len * len {
        for m in 0..n_mc_samples {
            let u: f32 = rng.r#gen();
            taus[pair * n_mc_samples + m] = gaps.dt_meta[pair] * u + gaps.dt_offset[pair];
        }
    }
    let taus = Tensor::<B, 1>::from_floats(taus.as_slice(), &device)
        .reshape([batch, len, len, n_mc_samples]);

    let cell_tau = model.state_decay_sampled(mu, alpha, gamma, &taus);
    let total_intensity: Tensor<B, 3> = cell_tau.sum_dim(2).squeeze(2); // over types
    let sample_mean: Tensor<B, 2> = total_intensity.mean_dim(2).squeeze(2);

    let dt_seq =
        Tensor::<B, 1>::from_floats(gaps.dt_seq.as_slice(), &device).reshape([batch, len]);
    let partial_integrals = dt_seq * sample_mean * step_mask;
    let integral_sum = partial_integrals.sum();

    let nll = (integral_sum.clone() - log_sum.clone()).div_scalar(batch as f32);
    let integral = integral_sum.div_scalar(batch as f32);
    let log_sum = log_sum.neg().div_scalar(batch as f32);

    NllOutput {
        nll,
        integral,
        log_sum,
    }
}
