//! Attention masks as a first-class sum type.
//!
//! "No masking" is an explicit variant rather than a null default, so every
//! call site states which path it is on. A boolean mask marks query/key pairs
//! to *exclude*: `true` entries receive a `-inf` score before softmax and end
//! up with zero weight.

use tch::{Kind, Tensor};

use crate::{AttentionError, Result};

/// Optional boolean mask over attention scores.
#[derive(Debug)]
pub enum AttentionMask {
    /// Attend to every key.
    None,
    /// Exclude pairs where the tensor is `true`. Must be a rank-3 bool tensor
    /// broadcastable to the `[batch(.heads), len_q, len_k]` score shape.
    Boolean(Tensor),
}

impl Clone for AttentionMask {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Boolean(mask) => Self::Boolean(mask.shallow_clone()),
        }
    }
}

impl AttentionMask {
    /// Wrap a boolean exclusion mask, validating rank and dtype up front.
    pub fn boolean(mask: Tensor) -> Result<Self> {
        if mask.kind() != Kind::Bool {
            return Err(AttentionError::ShapeMismatch(format!(
                "Attention mask must be a bool tensor, got {:?}",
                mask.kind()
            )));
        }
        if mask.dim() != 3 {
            return Err(AttentionError::ShapeMismatch(format!(
                "Attention mask must be rank 3, got shape {:?}",
                mask.size()
            )));
        }
        Ok(Self::Boolean(mask))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Replicate the mask across attention heads so a single scaled
    /// dot-product call can cover the merged `[batch * heads, ...]` layout.
    pub fn repeat_for_heads(&self, n_heads: i64) -> Self {
        match self {
            Self::None => Self::None,
            Self::Boolean(mask) => Self::Boolean(mask.repeat([n_heads, 1, 1])),
        }
    }

    /// Overwrite excluded scores with `-inf` so softmax assigns them zero
    /// weight. Rejects masks that cannot broadcast to the score shape, and
    /// rejects any query row whose keys are all excluded (the softmax would
    /// produce a NaN row).
    pub fn apply_to_scores(&self, scores: Tensor) -> Result<Tensor> {
        let mask = match self {
            Self::None => return Ok(scores),
            Self::Boolean(mask) => mask,
        };

        let score_size = scores.size();
        let mask_size = mask.size();
        let broadcastable = mask_size
            .iter()
            .zip(score_size.iter())
            .all(|(&m, &s)| m == s || m == 1);
        if mask_size.len() != score_size.len() || !broadcastable {
            return Err(AttentionError::ShapeMismatch(format!(
                "Mask shape {:?} does not broadcast to score shape {:?}",
                mask_size, score_size
            )));
        }

        let fully_masked = mask.all_dim(-1, false).any().double_value(&[]) > 0.0;
        if fully_masked {
            log::error!("Attention mask excludes every key for at least one query row");
            return Err(AttentionError::NumericDegenerate(
                "every query row needs at least one unmasked key".to_string(),
            ));
        }

        Ok(scores.masked_fill(mask, f64::NEG_INFINITY))
    }
}
