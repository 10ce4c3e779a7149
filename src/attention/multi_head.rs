//! Multi-head attention in the transformer style.
//!
//! The three projections widen to `n_heads * attn_dim`, the head axis is merged
//! into the batch axis, and a single scaled dot-product call covers every head
//! at once. The returned attention weights keep the merged
//! `[batch * heads, len_q, len_k]` layout.

use serde::{Deserialize, Serialize};
use tch::{nn, Tensor};

use crate::attention::ScaledDotProductAttention;
use crate::mask::AttentionMask;
use crate::{init, AttentionError, Result};

/// Static configuration for [`MultiHeadAttention`].
///
/// Plain data so the hosting backbone can deserialize it from its config
/// files; validation happens when the block is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHeadConfig {
    pub d_model: i64,
    pub n_heads: i64,
    #[serde(default = "default_dropout")]
    pub dropout_p: f64,
}

fn default_dropout() -> f64 {
    0.1
}

impl MultiHeadConfig {
    pub fn new(d_model: i64, n_heads: i64) -> Self {
        Self {
            d_model,
            n_heads,
            dropout_p: default_dropout(),
        }
    }

    pub fn with_dropout(self, dropout_p: f64) -> Self {
        Self { dropout_p, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model <= 0 || self.n_heads <= 0 {
            return Err(AttentionError::Config(format!(
                "d_model and n_heads must be positive, got {} / {}",
                self.d_model, self.n_heads
            )));
        }
        if self.d_model % self.n_heads != 0 {
            return Err(AttentionError::Config(format!(
                "d_model ({}) must be divisible by n_heads ({})",
                self.d_model, self.n_heads
            )));
        }
        Ok(())
    }

    /// Per-head feature width.
    pub fn attn_dim(&self) -> i64 {
        self.d_model / self.n_heads
    }
}

/// Multi-head attention over `[batch, length, d_model]` sequences.
#[derive(Debug)]
pub struct MultiHeadAttention {
    d_model: i64,
    n_heads: i64,
    attn_dim: i64,
    linear_q: nn::Linear,
    linear_k: nn::Linear,
    linear_v: nn::Linear,
    scaled_dot: ScaledDotProductAttention,
}

impl MultiHeadAttention {
    /// Registers the three projection layers under `path` with Xavier weights
    /// and zero biases. Fails with a configuration error when `d_model` is not
    /// divisible by `n_heads`.
    pub fn new(config: &MultiHeadConfig, path: &nn::Path) -> Result<Self> {
        config.validate()?;
        let attn_dim = config.attn_dim();
        let proj_dim = attn_dim * config.n_heads;

        let mut linear_q = nn::linear(path / "q_proj", config.d_model, proj_dim, Default::default());
        let mut linear_k = nn::linear(path / "k_proj", config.d_model, proj_dim, Default::default());
        let mut linear_v = nn::linear(path / "v_proj", config.d_model, proj_dim, Default::default());
        for linear in [&mut linear_q, &mut linear_k, &mut linear_v] {
            init::xavier_uniform(&mut linear.ws)?;
            if let Some(bs) = linear.bs.as_mut() {
                init::zeros(bs)?;
            }
        }

        log::debug!(
            "MultiHeadAttention: d_model={}, n_heads={}, attn_dim={}",
            config.d_model,
            config.n_heads,
            attn_dim
        );

        Ok(Self {
            d_model: config.d_model,
            n_heads: config.n_heads,
            attn_dim,
            linear_q,
            linear_k,
            linear_v,
            scaled_dot: ScaledDotProductAttention::new(attn_dim, config.dropout_p)?,
        })
    }

    /// Returns `(context, attention_weights)` with context `[B, Lq, d_model]`
    /// and weights `[B * n_heads, Lq, Lk]`. Query and key/value lengths may
    /// differ; a supplied mask is replicated across heads.
    pub fn forward(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &AttentionMask,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (q_size, k_size, v_size) = (q.size(), k.size(), v.size());
        if q_size.len() != 3 || k_size.len() != 3 || v_size.len() != 3 {
            return Err(AttentionError::ShapeMismatch(format!(
                "Multi-head inputs must be rank 3, got {:?} / {:?} / {:?}",
                q_size, k_size, v_size
            )));
        }
        if q_size[0] != k_size[0] || k_size[0] != v_size[0] {
            return Err(AttentionError::ShapeMismatch(format!(
                "Batch dimensions disagree: {} / {} / {}",
                q_size[0], k_size[0], v_size[0]
            )));
        }
        if q_size[2] != self.d_model || k_size[2] != self.d_model || v_size[2] != self.d_model {
            return Err(AttentionError::ShapeMismatch(format!(
                "Inputs must carry d_model = {} features, got {} / {} / {}",
                self.d_model, q_size[2], k_size[2], v_size[2]
            )));
        }
        if k_size[1] != v_size[1] {
            return Err(AttentionError::ShapeMismatch(format!(
                "Key length {} does not match value length {}",
                k_size[1], v_size[1]
            )));
        }
        let batch = v_size[0];

        // [B, L, d_model] -> [B, L, H, Dh] -> head-major [B * H, L, Dh]
        let query = self.split_heads(&q.apply(&self.linear_q), batch);
        let key = self.split_heads(&k.apply(&self.linear_k), batch);
        let value = self.split_heads(&v.apply(&self.linear_v), batch);

        let mask = mask.repeat_for_heads(self.n_heads);
        let (context, attn) = self.scaled_dot.forward(&query, &key, &value, &mask, train)?;

        // [B * H, Lq, Dh] -> [B, Lq, H * Dh]
        let context = context
            .view([self.n_heads, batch, -1, self.attn_dim])
            .permute([1, 2, 0, 3])
            .contiguous()
            .view([batch, -1, self.n_heads * self.attn_dim]);

        Ok((context, attn))
    }

    fn split_heads(&self, projected: &Tensor, batch: i64) -> Tensor {
        projected
            .view([batch, -1, self.n_heads, self.attn_dim])
            .permute([2, 0, 1, 3])
            .contiguous()
            .view([batch * self.n_heads, -1, self.attn_dim])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn rand(shape: &[i64]) -> Tensor {
        Tensor::rand(shape, (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_config_validation() {
        assert!(MultiHeadConfig::new(512, 8).validate().is_ok());
        assert!(MultiHeadConfig::new(512, 7).validate().is_err());
        assert!(MultiHeadConfig::new(-1, 2).validate().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = MultiHeadConfig::new(512, 8);
        let mha = MultiHeadAttention::new(&config, &vs.root()).unwrap();

        let x = rand(&[4, 10, 512]);
        let (context, attn) = mha
            .forward(&x, &x, &x, &AttentionMask::None, false)
            .unwrap();
        assert_eq!(context.size(), vec![4, 10, 512]);
        assert_eq!(attn.size(), vec![32, 10, 10]);
    }

    #[test]
    fn test_cross_attention_lengths() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = MultiHeadConfig::new(64, 4);
        let mha = MultiHeadAttention::new(&config, &vs.root()).unwrap();

        let q = rand(&[2, 5, 64]);
        let kv = rand(&[2, 9, 64]);
        let (context, attn) = mha
            .forward(&q, &kv, &kv, &AttentionMask::None, false)
            .unwrap();
        assert_eq!(context.size(), vec![2, 5, 64]);
        assert_eq!(attn.size(), vec![8, 5, 9]);
    }

    #[test]
    fn test_projection_biases_start_at_zero() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = MultiHeadConfig::new(64, 4);
        let mha = MultiHeadAttention::new(&config, &vs.root()).unwrap();

        let bias = mha.linear_q.bs.as_ref().unwrap();
        assert_eq!(bias.abs().sum(Kind::Float).double_value(&[]), 0.0);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = MultiHeadConfig::new(512, 8).with_dropout(0.2);
        let json = serde_json::to_string(&config).unwrap();
        let back: MultiHeadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d_model, 512);
        assert_eq!(back.n_heads, 8);
        assert!((back.dropout_p - 0.2).abs() < 1e-12);
    }
}
