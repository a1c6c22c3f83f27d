//! Scaled dot-product attention and the intensity-parameter projector.

use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::{activation, Bool};

pub mod intensity;

/// Score sentinel for masked positions, effectively -inf under softmax.
const MASK_FILL: f64 = -1.0e9;

/// Scaled dot-product attention over (batch, heads, len, head_dim) tensors.
///
/// Where the mask is false the score is replaced by a large negative
/// sentinel before the softmax, and the resulting probability is forced back
/// to exactly zero afterwards so no numerical leakage from the sentinel
/// survives. Dropout applies to the probabilities and is a no-op outside
/// autodiff training.
///
/// Returns the weighted value sum (batch, heads, len, head_dim) and the
/// attention probabilities (batch, heads, len, len); the probabilities are
/// consumed downstream, not just the weighted output.
pub fn scaled_dot_product<B: Backend>(
    query: Tensor<B, 4>,
    key: Tensor<B, 4>,
    value: Tensor<B, 4>,
    mask: Option<&Tensor<B, 4, Bool>>,
    dropout: Option<&Dropout>,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let head_dim = query.dims()[3];
    assert_eq!(
        head_dim,
        key.dims()[3],
        "query and key must share the head dimension"
    );

    // (batch, heads, len_q, len_k)
    let scale = 1.0 / (head_dim as f64).sqrt();
    let scores = query.matmul(key.swap_dims(2, 3)) * scale;

    let scores = match mask {
        Some(mask) => scores.mask_fill(mask.clone().bool_not(), MASK_FILL),
        None => scores,
    };

    let mut probs = activation::softmax(scores, 3);

    if let Some(mask) = mask {
        probs = probs.mask_fill(mask.clone().bool_not(), 0.0);
    }

    if let Some(dropout) = dropout {
        probs = dropout.forward(probs);
    }

    let context = probs.clone().matmul(value);
    (context, probs)
}
