//! Multi-head projector from attention signals to Hawkes process parameters.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::*;
use burn::tensor::{activation, Bool};

use super::scaled_dot_product;
use crate::isahp::architectures::base::config::ModelConfig;
use crate::isahp::architectures::base::rng::{DeterministicLinear, DeterministicRngContext};

/// Softplus sharpness for the excitation head.
const ALPHA_BETA: f64 = 1.0;
/// Softplus sharpness for the decay head; steeper so decay rates stay small
/// unless the signal is strong.
const GAMMA_BETA: f64 = 10.0;

/// Multi-head attention whose head outputs are reinterpreted as Hawkes
/// process parameters instead of plain embeddings.
///
/// The attention heads are split into two fixed groups: the first
/// `num_heads / 2` heads drive the excitation magnitudes (`alpha`), the
/// second half the decay rates (`gamma`). The attention-weighted value
/// (aggregated over all heads) feeds the background-rate head (`mu`). The
/// head split is a structural constant of the parameterization, not a
/// data-driven choice.
#[derive(Module, Debug)]
pub struct IntensityAttention<B: Backend> {
    #[module(skip)]
    d_model: usize,
    #[module(skip)]
    num_heads: usize,
    #[module(skip)]
    head_dim: usize,
    #[module(skip)]
    n_types: usize,

    linear_query: DeterministicLinear<B>,
    linear_key: DeterministicLinear<B>,
    linear_value: DeterministicLinear<B>,

    /// Background-rate head: Linear(d_model -> n_types) + sigmoid
    mu_head: DeterministicLinear<B>,
    /// Excitation head over the first half of the heads:
    /// Linear(d_model / 2 -> n_types) + softplus(beta=1)
    alpha_head: DeterministicLinear<B>,
    /// Decay head over the second half of the heads:
    /// Linear(d_model / 2 -> n_types) + softplus(beta=10)
    gamma_head: DeterministicLinear<B>,

    dropout: Dropout,
}

impl<B: Backend> IntensityAttention<B> {
    /// Build the projector from the model configuration.
    ///
    /// Fails when `num_heads` is not a positive even number or does not
    /// divide `hidden_size`.
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Result<Self, String> {
        let d_model = config.hidden_size;
        let num_heads = config.num_heads;
        let n_types = config.n_types;

        if num_heads == 0 || num_heads % 2 != 0 {
            return Err(format!(
                "num_heads must be a positive even number, got {}",
                num_heads
            ));
        }
        if d_model % num_heads != 0 {
            return Err(format!(
                "hidden_size {} must be divisible by num_heads {}",
                d_model, num_heads
            ));
        }
        let head_dim = d_model / num_heads;
        let half_width = (num_heads / 2) * head_dim;

        Ok(Self {
            d_model,
            num_heads,
            head_dim,
            n_types,
            linear_query: rng_ctx.create_deterministic_linear(d_model, d_model, true, rng_ctx.seed + 10),
            linear_key: rng_ctx.create_deterministic_linear(d_model, d_model, true, rng_ctx.seed + 11),
            linear_value: rng_ctx.create_deterministic_linear(d_model, d_model, true, rng_ctx.seed + 12),
            mu_head: rng_ctx.create_deterministic_linear(d_model, n_types, true, rng_ctx.seed + 20),
            alpha_head: rng_ctx.create_deterministic_linear(half_width, n_types, true, rng_ctx.seed + 21),
            gamma_head: rng_ctx.create_deterministic_linear(half_width, n_types, true, rng_ctx.seed + 22),
            dropout: DropoutConfig::new(config.dropout).init(),
        })
    }

    /// Project (batch, len, d_model) features into per-type process
    /// parameters.
    ///
    /// Returns `mu` (batch, len, n_types), `alpha` and `gamma`
    /// (batch, len, len, n_types), with `alpha`/`gamma` exactly zero at every
    /// (query, key) pair the mask disallows.
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: &Tensor<B, 3, Bool>,
    ) -> (Tensor<B, 3>, Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, len, width] = query.dims();
        assert_eq!(
            width, self.d_model,
            "expected feature width {}, got {}",
            self.d_model, width
        );

        let heads = self.num_heads;
        let head_dim = self.head_dim;
        let half = heads / 2;

        // (batch, len, d_model) -> (batch, heads, len, head_dim)
        let q = self
            .linear_query
            .forward_3d(query)
            .reshape([batch, len, heads, head_dim])
            .swap_dims(1, 2);
        let k = self
            .linear_key
            .forward_3d(key)
            .reshape([batch, len, heads, head_dim])
            .swap_dims(1, 2);
        let v = self
            .linear_value
            .forward_3d(value)
            .reshape([batch, len, heads, head_dim])
            .swap_dims(1, 2);

        let attn_mask: Tensor<B, 4, Bool> =
            mask.clone().unsqueeze_dim::<4>(1).repeat(&[1, heads, 1, 1]);

        let (value_mu, attn) =
            scaled_dot_product(q, k, v.clone(), Some(&attn_mask), Some(&self.dropout));

        // Pairwise head signal (batch, heads, len_q, len_k, head_dim): the
        // attention probability broadcast over the feature axis times the key
        // value broadcast over the query axis.
        let attn_rep: Tensor<B, 5> = attn.unsqueeze_dim::<5>(4).repeat(&[1, 1, 1, 1, head_dim]);
        let value_rep: Tensor<B, 5> = v.unsqueeze_dim::<5>(2).repeat(&[1, 1, len, 1, 1]);
        let signal = attn_rep * value_rep;

        // Head groups, permuted to (batch, len_q, len_k, half * head_dim).
        let excitation_signal = signal
            .clone()
            .slice([0..batch, 0..half, 0..len, 0..len, 0..head_dim])
            .swap_dims(1, 2)
            .swap_dims(2, 3)
            .reshape([batch, len, len, half * head_dim]);
        let decay_signal = signal
            .slice([0..batch, half..heads, 0..len, 0..len, 0..head_dim])
            .swap_dims(1, 2)
            .swap_dims(2, 3)
            .reshape([batch, len, len, half * head_dim]);

        let pair_mask: Tensor<B, 4, Bool> = mask
            .clone()
            .unsqueeze_dim::<4>(3)
            .repeat(&[1, 1, 1, self.n_types]);

        let alpha = activation::softplus(self.alpha_head.forward_4d(excitation_signal), ALPHA_BETA)
            .mask_fill(pair_mask.clone().bool_not(), 0.0);
        let gamma = activation::softplus(self.gamma_head.forward_4d(decay_signal), GAMMA_BETA)
            .mask_fill(pair_mask.bool_not(), 0.0);

        // (batch, heads, len, head_dim) -> (batch, len, d_model)
        let value_mu = value_mu
            .swap_dims(1, 2)
            .reshape([batch, len, heads * head_dim]);
        let mu = activation::sigmoid(self.mu_head.forward_3d(value_mu));

        (mu, alpha, gamma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isahp::architectures::base::masking;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn projector(n_types: usize, hidden: usize, heads: usize) -> IntensityAttention<TestBackend> {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(3, device);
        let mut config = ModelConfig::new(n_types);
        config.hidden_size = hidden;
        config.embedding_dim = hidden - 1;
        config.num_heads = heads;
        IntensityAttention::new(&config, &ctx).expect("valid projector config")
    }

    fn feature_tensor(
        batch: usize,
        len: usize,
        width: usize,
        device: &<TestBackend as Backend>::Device,
    ) -> Tensor<TestBackend, 3> {
        let data: Vec<f32> = (0..batch * len * width)
            .map(|i| (i as f32 * 0.13).cos())
            .collect();
        Tensor::<TestBackend, 1>::from_floats(data.as_slice(), device).reshape([batch, len, width])
    }

    #[test]
    fn test_rejects_odd_head_count() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let mut config = ModelConfig::new(3);
        config.hidden_size = 6;
        config.embedding_dim = 5;
        config.num_heads = 3;
        assert!(IntensityAttention::new(&config, &ctx).is_err());
    }

    #[test]
    fn test_rejects_non_dividing_head_count() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let mut config = ModelConfig::new(3);
        config.hidden_size = 7;
        config.embedding_dim = 6;
        config.num_heads = 2;
        assert!(IntensityAttention::new(&config, &ctx).is_err());
    }

    #[test]
    fn test_output_shapes_and_ranges() {
        let device = Default::default();
        let attn = projector(3, 6, 2);
        let feat = feature_tensor(2, 4, 6, &device);

        let times =
            Tensor::<TestBackend, 1>::from_floats([1.0f32; 8].as_slice(), &device).reshape([2, 4]);
        let mask = masking::combined_mask(&times, 0.0);

        let (mu, alpha, gamma) = attn.forward(feat.clone(), feat.clone(), feat, &mask);
        assert_eq!(mu.dims(), [2, 4, 3]);
        assert_eq!(alpha.dims(), [2, 4, 4, 3]);
        assert_eq!(gamma.dims(), [2, 4, 4, 3]);

        let mu_vals: Vec<f32> = mu.into_data().to_vec().unwrap();
        assert!(mu_vals.iter().all(|&m| m.is_finite() && (0.0..=1.0).contains(&m)));

        let alpha_vals: Vec<f32> = alpha.into_data().to_vec().unwrap();
        let gamma_vals: Vec<f32> = gamma.into_data().to_vec().unwrap();
        assert!(alpha_vals.iter().all(|&a| a.is_finite() && a >= 0.0));
        assert!(gamma_vals.iter().all(|&g| g.is_finite() && g >= 0.0));
    }

    #[test]
    fn test_masked_pairs_are_exactly_zero() {
        let device = Default::default();
        let attn = projector(2, 4, 2);
        let feat = feature_tensor(1, 3, 4, &device);

        let times = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 0.0].as_slice(), &device)
            .reshape([1, 3]);
        let mask = masking::combined_mask(&times, 0.0);

        let (_, alpha, gamma) = attn.forward(feat.clone(), feat.clone(), feat, &mask);
        let len = 3;
        let k = 2;
        let alpha_vals: Vec<f32> = alpha.into_data().to_vec().unwrap();
        let gamma_vals: Vec<f32> = gamma.into_data().to_vec().unwrap();

        for i in 0..len {
            for j in 0..len {
                // Position 2 is padding; j > i is the future.
                let disallowed = j > i || i == 2 || j == 2;
                for t in 0..k {
                    let idx = (i * len + j) * k + t;
                    if disallowed {
                        assert_eq!(alpha_vals[idx], 0.0, "alpha ({}, {}, {})", i, j, t);
                        assert_eq!(gamma_vals[idx], 0.0, "gamma ({}, {}, {})", i, j, t);
                    }
                }
            }
        }
    }
}
