//! Instance-wise self-attentive Hawkes process model.

use burn::module::Module;
use burn::prelude::*;
use burn::tensor::Bool;

use super::attention::intensity::IntensityAttention;
use super::config::ModelConfig;
use super::rng::{DeterministicLinear, DeterministicRngContext};

/// Self-attentive Hawkes process over K event types.
///
/// Embeds each event as a time-gap scalar concatenated with a learned type
/// embedding, runs the intensity projector over the embedded sequence and
/// exposes the closed-form state-decay law used by the likelihood estimator.
///
/// There is no positional encoding; event ordering enters through the causal
/// mask and the explicit time gaps.
#[derive(Module, Debug)]
pub struct SelfAttentiveHawkes<B: Backend> {
    #[module(skip)]
    n_types: usize,
    /// Bias-free linear map from a one-hot type row to the type embedding
    embed: DeterministicLinear<B>,
    attention: IntensityAttention<B>,
}

impl<B: Backend> SelfAttentiveHawkes<B> {
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Result<Self, String> {
        config.validate_consistent()?;

        Ok(Self {
            n_types: config.n_types,
            embed: rng_ctx.create_deterministic_linear(
                config.n_types,
                config.embedding_dim,
                false,
                rng_ctx.seed + 30,
            ),
            attention: IntensityAttention::new(config, rng_ctx)?,
        })
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    /// Forward pass over a padded event batch.
    ///
    /// `event_seqs` has shape (batch, seq_len, 2) in dense mode
    /// (`[timestamp, type]` rows) or (batch, seq_len, 1 + n_types) in
    /// one-hot mode; padding rows are all-zero. `src_mask` is the causal +
    /// padding mask over the (seq_len - 1) model steps.
    ///
    /// Returns `(mu, alpha, gamma)` shaped (batch, L, K), (batch, L, L, K),
    /// (batch, L, L, K) with L = seq_len - 1. The last event contributes no
    /// feature row; it only terminates the final observed interval.
    pub fn forward(
        &self,
        event_seqs: &Tensor<B, 3>,
        src_mask: &Tensor<B, 3, Bool>,
        onehot: bool,
    ) -> (Tensor<B, 3>, Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, seq_len, width] = event_seqs.dims();
        let expected_width = 1 + if onehot { self.n_types } else { 1 };
        assert_eq!(
            width, expected_width,
            "event feature width {} does not match onehot={} with {} types",
            width, onehot, self.n_types
        );
        assert!(seq_len >= 2, "sequences must contain at least two events");
        let len = seq_len - 1;

        // Inter-event gaps with an implicit zero timestamp prepended:
        // dt[i] = t[i] - t[i-1], t[-1] = 0.
        let timestamps: Tensor<B, 2> = event_seqs
            .clone()
            .slice([0..batch, 0..seq_len, 0..1])
            .squeeze(2);
        let zero_lead = Tensor::<B, 2>::zeros([batch, 1], &event_seqs.device());
        let padded = Tensor::cat(vec![zero_lead, timestamps], 1); // (batch, seq_len + 1)
        let dt = padded.clone().slice([0..batch, 1..seq_len + 1])
            - padded.slice([0..batch, 0..seq_len]); // (batch, seq_len)

        let temp_feat: Tensor<B, 3> = dt.slice([0..batch, 0..len]).unsqueeze_dim(2);

        let type_feat = if onehot {
            let onehot_rows =
                event_seqs
                    .clone()
                    .slice([0..batch, 0..len, 1..1 + self.n_types]);
            self.embed.forward_3d(onehot_rows)
        } else {
            let onehot_rows = self.one_hot_types(event_seqs, len);
            self.embed.forward_3d(onehot_rows)
        };

        let feat = Tensor::cat(vec![temp_feat, type_feat], 2); // (batch, len, hidden)

        self.attention
            .forward(feat.clone(), feat.clone(), feat, src_mask)
    }

    /// Closed-form intensity at the given elapsed-time offsets.
    ///
    /// `dt` holds, per (query i, key j), the elapsed time from event j to the
    /// evaluation point of step i. Excitation is summed over keys; pairs the
    /// mask disallowed contribute nothing because their `alpha`/`gamma` are
    /// exactly zero. The tanh keeps every intensity inside (-1, 1).
    pub fn state_decay(
        &self,
        mu: &Tensor<B, 3>,
        alpha: &Tensor<B, 4>,
        gamma: &Tensor<B, 4>,
        dt: &Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [_, _, _, n_types] = alpha.dims();

        let dt_rep: Tensor<B, 4> = dt.clone().unsqueeze_dim::<4>(3).repeat(&[1, 1, 1, n_types]);
        let excitation =
            alpha.clone() * gamma.clone() * (gamma.clone() * dt_rep).neg().exp();
        let summed: Tensor<B, 3> = excitation.sum_dim(2).squeeze(2);

        (mu.clone() + summed).tanh()
    }

    /// State decay evaluated at `n_samples` randomized offsets per
    /// (query, key) pair, for the Monte-Carlo integral term.
    ///
    /// `taus` has shape (batch, L, L, n_samples); the result is
    /// (batch, L, n_types, n_samples).
    pub fn state_decay_sampled(
        &self,
        mu: &Tensor<B, 3>,
        alpha: &Tensor<B, 4>,
        gamma: &Tensor<B, 4>,
        taus: &Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, _, n_types] = alpha.dims();
        let n_samples = taus.dims()[3];

        let alpha_rep: Tensor<B, 5> = alpha
            .clone()
            .unsqueeze_dim::<5>(4)
            .repeat(&[1, 1, 1, 1, n_samples]);
        let gamma_rep: Tensor<B, 5> = gamma
            .clone()
            .unsqueeze_dim::<5>(4)
            .repeat(&[1, 1, 1, 1, n_samples]);
        let taus_rep: Tensor<B, 5> = taus
            .clone()
            .unsqueeze_dim::<5>(3)
            .repeat(&[1, 1, 1, n_types, 1]);

        let excitation =
            alpha_rep.clone() * gamma_rep.clone() * (gamma_rep * taus_rep).neg().exp();
        let summed: Tensor<B, 4> = excitation.sum_dim(2).squeeze(2);

        let mu_rep: Tensor<B, 4> = mu
            .clone()
            .unsqueeze_dim::<4>(3)
            .repeat(&[1, 1, 1, n_samples]);

        (mu_rep + summed).tanh()
    }

    /// Host-side one-hot expansion of the dense type column for events
    /// 0..len. Fails fast on types outside [0, n_types).
    fn one_hot_types(&self, event_seqs: &Tensor<B, 3>, len: usize) -> Tensor<B, 3> {
        let [batch, seq_len, _] = event_seqs.dims();
        let types: Tensor<B, 2> = event_seqs
            .clone()
            .slice([0..batch, 0..seq_len, 1..2])
            .squeeze(2);
        let data = types.to_data();
        let values = data
            .as_slice::<f32>()
            .expect("event batch must be an f32 tensor");

        let mut onehot = vec![0.0f32; batch * len * self.n_types];
        for b in 0..batch {
            for pos in 0..len {
                let ty = values[b * seq_len + pos].round() as usize;
                assert!(
                    ty < self.n_types,
                    "event type {} out of range for {} types",
                    ty,
                    self.n_types
                );
                onehot[(b * len + pos) * self.n_types + ty] = 1.0;
            }
        }

        Tensor::<B, 1>::from_floats(onehot.as_slice(), &event_seqs.device()).reshape([
            batch,
            len,
            self.n_types,
        ])
    }
}
