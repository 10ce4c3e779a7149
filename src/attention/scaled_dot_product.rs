//! Scaled dot-product attention, the primitive every other attention block
//! builds on.

use tch::Tensor;

use crate::mask::AttentionMask;
use crate::{AttentionError, Result};

/// Computes `softmax(Q Kᵗ / sqrt(dim)) V` over batched rank-3 tensors.
///
/// The block holds no parameters; `dim` fixes the softmax temperature and
/// `dropout_p` regularizes the normalized weights during training.
#[derive(Debug, Clone)]
pub struct ScaledDotProductAttention {
    sqrt_dim: f64,
    dropout_p: f64,
}

impl ScaledDotProductAttention {
    pub fn new(dim: i64, dropout_p: f64) -> Result<Self> {
        if dim <= 0 {
            return Err(AttentionError::Config(format!(
                "Attention dimension must be positive, got {dim}"
            )));
        }
        if !(0.0..=1.0).contains(&dropout_p) {
            return Err(AttentionError::Config(format!(
                "Dropout rate must be between 0 and 1, got {dropout_p}"
            )));
        }
        Ok(Self {
            sqrt_dim: (dim as f64).sqrt(),
            dropout_p,
        })
    }

    /// Returns `(context, attention_weights)`.
    ///
    /// `query` is `[B, Lq, D]`, `key` is `[B, Lk, D]`, `value` is `[B, Lk, Dv]`.
    /// The context is `[B, Lq, Dv]` and the weights `[B, Lq, Lk]`; weight rows
    /// sum to 1 whenever dropout is inactive. Dropout only fires when `train`
    /// is set.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: &AttentionMask,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        self.validate_shapes(query, key, value)?;

        let score = query.bmm(&key.transpose(1, 2)) / self.sqrt_dim;
        let score = mask.apply_to_scores(score)?;

        let mut attn = score.softmax(-1, query.kind());
        if train && self.dropout_p > 0.0 {
            attn = attn.dropout(self.dropout_p, train);
        }
        let context = attn.bmm(value);

        Ok((context, attn))
    }

    fn validate_shapes(&self, query: &Tensor, key: &Tensor, value: &Tensor) -> Result<()> {
        let q = query.size();
        let k = key.size();
        let v = value.size();

        if q.len() != 3 || k.len() != 3 || v.len() != 3 {
            return Err(AttentionError::ShapeMismatch(format!(
                "Query/key/value must be rank 3, got {:?} / {:?} / {:?}",
                q, k, v
            )));
        }
        if q[0] != k[0] || k[0] != v[0] {
            return Err(AttentionError::ShapeMismatch(format!(
                "Batch dimensions disagree: {} / {} / {}",
                q[0], k[0], v[0]
            )));
        }
        if q[2] != k[2] {
            return Err(AttentionError::ShapeMismatch(format!(
                "Query feature dim {} does not match key feature dim {}",
                q[2], k[2]
            )));
        }
        if k[1] != v[1] {
            return Err(AttentionError::ShapeMismatch(format!(
                "Key length {} does not match value length {}",
                k[1], v[1]
            )));
        }
        Ok(())
    }
}
