//! Training and evaluation loops for the self-attentive Hawkes process.

use burn::config::Config;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Bool;

use super::config::ModelConfig;
use super::masking;
use super::model::SelfAttentiveHawkes;
use super::nll::{eval_nll, event_types_host, observed_intensities};
use super::rng::DeterministicRngContext;

/// Training hyper-parameters.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Adam learning rate
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    /// Weight of the group-variance regularizer over excitation magnitudes
    #[config(default = 0.0)]
    pub type_reg: f64,
    /// Weight of the group-sparsity (L1-like) regularizer over group means
    #[config(default = 0.0)]
    pub l1_reg: f64,
    /// Monte-Carlo samples per (query, key) pair in the NLL integral
    #[config(default = 20)]
    pub n_mc_samples: usize,
    /// L2 gradient-norm clipping threshold
    #[config(default = 5.0)]
    pub grad_clip_norm: f32,
}

/// Running average of a scalar metric.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    sum: f64,
    count: usize,
}

impl AverageMeter {
    pub fn update(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.count += n;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainMetrics {
    pub loss: AverageMeter,
    pub nll: AverageMeter,
    pub type_reg: AverageMeter,
    pub l1_reg: AverageMeter,
}

#[derive(Debug, Clone, Default)]
pub struct EvalMetrics {
    pub nll: AverageMeter,
    pub integral: AverageMeter,
    pub log_sum: AverageMeter,
    pub accuracy: AverageMeter,
}

/// Build the causal+padding attention mask and the valid-step mask for one
/// padded batch. Both live on the (seq_len - 1) model grid.
pub fn batch_masks<B: Backend>(batch: &Tensor<B, 3>) -> (Tensor<B, 3, Bool>, Tensor<B, 2, Bool>) {
    let [n_batch, seq_len, _] = batch.dims();
    let device = batch.device();

    let lengths = masking::sequence_lengths(batch);
    let seq_mask_full = masking::sequence_length_mask::<B>(&lengths, seq_len, &device);
    let seq_mask = seq_mask_full.slice([0..n_batch, 1..seq_len]);

    // Padding detection runs on the timestamps of events 1.., as padded rows
    // are all-zero.
    let times: Tensor<B, 2> = batch
        .clone()
        .slice([0..n_batch, 1..seq_len, 0..1])
        .squeeze(2);
    let src_mask = masking::combined_mask(&times, 0.0);

    (src_mask, seq_mask)
}

/// Group-variance and group-sparsity penalties over the excitation tensor.
///
/// Excitation entries are grouped by the type of the triggering (key) event;
/// within each group the per-target-type mean and unbiased variance are
/// computed over the valid causal pairs. Groups with at most one selected
/// pair are skipped: a one-element variance is undefined and skipping is the
/// contract, not an error. Returns `None` when no group qualifies.
fn group_regularizers<B: Backend>(
    alpha: &Tensor<B, 4>,
    src_mask: &Tensor<B, 3, Bool>,
    key_types: &[usize],
    n_types: usize,
) -> Option<(Tensor<B, 1>, Tensor<B, 1>)> {
    let [batch, len, _, _] = alpha.dims();
    let device = alpha.device();

    let src_valid: Vec<f32> = src_mask
        .clone()
        .float()
        .to_data()
        .to_vec::<f32>()
        .expect("mask data");

    let mut variance_total: Option<Tensor<B, 1>> = None;
    let mut mean_total: Option<Tensor<B, 1>> = None;

    for source_type in 0..n_types {
        let mut group = vec![0.0f32; batch * len * len];
        let mut count = 0usize;
        for b in 0..batch {
            for i in 0..len {
                for j in 0..len {
                    let idx = (b * len + i) * len + j;
                    if src_valid[idx] > 0.5 && key_types[b * len + j] == source_type {
                        group[idx] = 1.0;
                        count += 1;
                    }
                }
            }
        }
        if count <= 1 {
            continue;
        }

        let group_mask: Tensor<B, 4> = Tensor::<B, 1>::from_floats(group.as_slice(), &device)
            .reshape([batch, len, len, 1])
            .repeat(&[1, 1, 1, n_types]);

        // Per-target-type first and second moments over the group.
        let selected = alpha.clone() * group_mask.clone();
        let sums = selected
            .sum_dim(0)
            .sum_dim(1)
            .sum_dim(2)
            .reshape([n_types]);
        let sq_sums = (alpha.clone() * alpha.clone() * group_mask)
            .sum_dim(0)
            .sum_dim(1)
            .sum_dim(2)
            .reshape([n_types]);

        let mean = sums.div_scalar(count as f32);
        let variance = (sq_sums - mean.clone() * mean.clone() * (count as f32))
            .div_scalar((count - 1) as f32);

        let var_sum = variance.sum();
        let mean_sum = mean.sum();

        variance_total = Some(match variance_total {
            Some(acc) => acc + var_sum,
            None => var_sum,
        });
        mean_total = Some(match mean_total {
            Some(acc) => acc + mean_sum,
            None => mean_sum,
        });
    }

    match (variance_total, mean_total) {
        (Some(var), Some(mean)) => Some((var, mean)),
        _ => None,
    }
}

/// Training state: the model, its Adam optimizer (with L2-norm gradient
/// clipping) and the deterministic RNG context driving the Monte-Carlo
/// draws.
pub struct HawkesTrainer<B: AutodiffBackend> {
    pub model: SelfAttentiveHawkes<B>,
    pub config: TrainingConfig,
    pub iteration: usize,
    rng_context: DeterministicRngContext<B>,
    optimizer: OptimizerAdaptor<Adam, SelfAttentiveHawkes<B>, B>,
}

impl<B: AutodiffBackend> HawkesTrainer<B> {
    pub fn new(
        model_config: &ModelConfig,
        config: TrainingConfig,
        device: &B::Device,
    ) -> Result<Self, String> {
        let rng_context = DeterministicRngContext::new(model_config.seed, device.clone());
        let model = SelfAttentiveHawkes::new(model_config, &rng_context)?;

        let adam_config = AdamConfig::new()
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clip_norm)));
        let optimizer = OptimizerAdaptor::from(adam_config.init());

        Ok(Self {
            model,
            config,
            iteration: 0,
            rng_context,
            optimizer,
        })
    }

    /// One pass over the batches: forward, NLL, regularizers, backward,
    /// clipped optimizer step. Returns running-average metrics.
    pub fn train_epoch(&mut self, batches: &[Tensor<B, 3>], onehot: bool) -> TrainMetrics {
        let mut metrics = TrainMetrics::default();

        for batch in batches {
            let [n_batch, _, _] = batch.dims();
            let (src_mask, seq_mask) = batch_masks(batch);

            let (mu, alpha, gamma) = self.model.forward(batch, &src_mask, onehot);

            let mc_seed = self.rng_context.seed + 1000 + self.iteration as u64;
            let out = self.rng_context.with_isolated_seed(Some(mc_seed), |rng| {
                eval_nll(
                    &self.model,
                    batch,
                    &src_mask,
                    &seq_mask,
                    &mu,
                    &alpha,
                    &gamma,
                    self.config.n_mc_samples,
                    rng,
                )
            });

            let n_types = self.model.n_types();
            let seq_len = batch.dims()[1];
            let len = seq_len - 1;
            let all_types = event_types_host(batch, n_types);
            // Key j of the model grid embeds event j (the triggering event).
            let key_types: Vec<usize> = (0..n_batch)
                .flat_map(|b| all_types[b * seq_len..b * seq_len + len].to_vec())
                .collect();

            let regs = if self.config.type_reg > 0.0 || self.config.l1_reg > 0.0 {
                group_regularizers(&alpha, &src_mask, &key_types, n_types)
            } else {
                None
            };

            let mut type_reg_value = 0.0f64;
            let mut l1_reg_value = 0.0f64;
            let mut loss = out.nll.clone();
            if let Some((group_variance, group_mean)) = regs {
                if self.config.type_reg > 0.0 {
                    let term = group_variance.mul_scalar(self.config.type_reg);
                    type_reg_value = scalar_value(&term);
                    loss = loss + term;
                }
                if self.config.l1_reg > 0.0 {
                    let term = group_mean.mul_scalar(self.config.l1_reg);
                    l1_reg_value = scalar_value(&term);
                    loss = loss + term;
                }
            }

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model =
                self.optimizer
                    .step(self.config.learning_rate, self.model.clone(), grads);
            self.iteration += 1;

            let loss_value = scalar_value(&loss);
            let nll_value = scalar_value(&out.nll);
            log::debug!(
                "iteration {}: loss {:.6}, nll {:.6}",
                self.iteration,
                loss_value,
                nll_value
            );

            metrics.loss.update(loss_value, n_batch);
            metrics.nll.update(nll_value, n_batch);
            metrics.type_reg.update(type_reg_value, n_batch);
            metrics.l1_reg.update(l1_reg_value, n_batch);
        }

        metrics
    }

    /// Evaluate on the inner (non-autodiff) backend: NLL and next-event-type
    /// accuracy, no gradient tracking, deterministic per batch index.
    pub fn evaluate(&self, batches: &[Tensor<B::InnerBackend, 3>], onehot: bool) -> EvalMetrics {
        evaluate_batches(
            &self.model.valid(),
            batches,
            onehot,
            self.config.n_mc_samples,
            self.rng_context.seed,
        )
    }

    /// Type-to-type infectivity estimate aggregated over the batches.
    pub fn get_infectivity(
        &self,
        batches: &[Tensor<B::InnerBackend, 3>],
        onehot: bool,
    ) -> Tensor<B::InnerBackend, 2> {
        infectivity_matrix(&self.model.valid(), batches, onehot)
    }

    /// Per-step predicted and true event types over the batches.
    pub fn predict_next_event_type(
        &self,
        batches: &[Tensor<B::InnerBackend, 3>],
        onehot: bool,
    ) -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
        predict_next_event_type(&self.model.valid(), batches, onehot)
    }
}

fn scalar_value<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor
        .clone()
        .into_data()
        .to_vec::<f32>()
        .expect("scalar metric tensor")[0] as f64
}

/// NLL and next-event-type accuracy over the batches, without gradient
/// tracking. The Monte-Carlo seed is derived from the batch index, so two
/// calls on the same data produce identical numbers.
pub fn evaluate_batches<B: Backend>(
    model: &SelfAttentiveHawkes<B>,
    batches: &[Tensor<B, 3>],
    onehot: bool,
    n_mc_samples: usize,
    seed: u64,
) -> EvalMetrics {
    let mut metrics = EvalMetrics::default();
    if batches.is_empty() {
        return metrics;
    }
    let rng_context = DeterministicRngContext::<B>::new(seed, batches[0].device());

    for (batch_idx, batch) in batches.iter().enumerate() {
        let [n_batch, seq_len, _] = batch.dims();
        let len = seq_len - 1;
        let (src_mask, seq_mask) = batch_masks(batch);

        let (mu, alpha, gamma) = model.forward(batch, &src_mask, onehot);

        let mc_seed = seed + 1000 + batch_idx as u64;
        let out = rng_context.with_isolated_seed(Some(mc_seed), |rng| {
            eval_nll(
                model, batch, &src_mask, &seq_mask, &mu, &alpha, &gamma, n_mc_samples, rng,
            )
        });

        metrics.nll.update(scalar_value(&out.nll), n_batch);
        metrics.integral.update(scalar_value(&out.integral), n_batch);
        metrics.log_sum.update(scalar_value(&out.log_sum), n_batch);

        // Next-event-type accuracy at the observed gaps.
        let intensities = observed_intensities(model, batch, &src_mask, &mu, &alpha, &gamma);
        let preds: Vec<i64> = intensities
            .argmax(2)
            .reshape([n_batch * len])
            .into_data()
            .to_vec()
            .expect("argmax data");
        let truths = event_types_host(batch, model.n_types());
        let valid: Vec<f32> = seq_mask
            .float()
            .into_data()
            .to_vec()
            .expect("mask data");

        let mut correct = 0usize;
        let mut total = 0usize;
        for b in 0..n_batch {
            for i in 0..len {
                if valid[b * len + i] > 0.5 {
                    total += 1;
                    if preds[b * len + i] as usize == truths[b * seq_len + i + 1] {
                        correct += 1;
                    }
                }
            }
        }
        if total > 0 {
            metrics
                .accuracy
                .update(correct as f64 / total as f64, total);
        }
    }

    metrics
}

/// K x K infectivity matrix: how strongly each source type excites each
/// target type.
///
/// For every valid causal pair (query i, key j) the excitation
/// `alpha[b, i, j, type(i)]` is accumulated into cell
/// `(type(i), type(j))` and normalized by the per-cell pair count plus one.
/// Only valid (causal, non-padding) pairs are counted.
pub fn infectivity_matrix<B: Backend>(
    model: &SelfAttentiveHawkes<B>,
    batches: &[Tensor<B, 3>],
    onehot: bool,
) -> Tensor<B, 2> {
    assert!(!batches.is_empty(), "infectivity needs at least one batch");
    let n_types = model.n_types();
    let device = batches[0].device();
    let mut scores = vec![0.0f64; n_types * n_types];
    let mut counts = vec![0.0f64; n_types * n_types];

    for batch in batches {
        let [n_batch, seq_len, _] = batch.dims();
        let len = seq_len - 1;
        let (src_mask, _) = batch_masks(batch);

        let (_, alpha, _) = model.forward(batch, &src_mask, onehot);

        let alpha_vals: Vec<f32> = alpha.into_data().to_vec().expect("alpha data");
        let src_valid: Vec<f32> = src_mask
            .float()
            .into_data()
            .to_vec()
            .expect("mask data");
        let types = event_types_host(batch, n_types);

        for b in 0..n_batch {
            for i in 0..len {
                let target_type = types[b * seq_len + i + 1];
                for j in 0..len {
                    let pair = (b * len + i) * len + j;
                    if src_valid[pair] > 0.5 {
                        let source_type = types[b * seq_len + j];
                        scores[target_type * n_types + source_type] +=
                            alpha_vals[pair * n_types + target_type] as f64;
                        counts[target_type * n_types + source_type] += 1.0;
                    }
                }
            }
        }
    }

    let matrix: Vec<f32> = scores
        .iter()
        .zip(counts.iter())
        .map(|(&score, &count)| (score / (count + 1.0)) as f32)
        .collect();
    Tensor::<B, 1>::from_floats(matrix.as_slice(), &device).reshape([n_types, n_types])
}

/// Predicted (argmax intensity) and true event types per valid step, one
/// vector pair per batch.
pub fn predict_next_event_type<B: Backend>(
    model: &SelfAttentiveHawkes<B>,
    batches: &[Tensor<B, 3>],
    onehot: bool,
) -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
    let mut all_preds = Vec::with_capacity(batches.len());
    let mut all_truths = Vec::with_capacity(batches.len());

    for batch in batches {
        let [n_batch, seq_len, _] = batch.dims();
        let len = seq_len - 1;
        let (src_mask, seq_mask) = batch_masks(batch);

        let (mu, alpha, gamma) = model.forward(batch, &src_mask, onehot);
        let intensities = observed_intensities(model, batch, &src_mask, &mu, &alpha, &gamma);

        let preds: Vec<i64> = intensities
            .argmax(2)
            .reshape([n_batch * len])
            .into_data()
            .to_vec()
            .expect("argmax data");
        let truths = event_types_host(batch, model.n_types());
        let valid: Vec<f32> = seq_mask
            .float()
            .into_data()
            .to_vec()
            .expect("mask data");

        let mut batch_preds = Vec::new();
        let mut batch_truths = Vec::new();
        for b in 0..n_batch {
            for i in 0..len {
                if valid[b * len + i] > 0.5 {
                    batch_preds.push(preds[b * len + i]);
                    batch_truths.push(truths[b * seq_len + i + 1] as i64);
                }
            }
        }
        all_preds.push(batch_preds);
        all_truths.push(batch_truths);
    }

    (all_preds, all_truths)
}
