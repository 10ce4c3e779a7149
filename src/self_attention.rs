//! Global self-attention over a 2D feature map (SAGAN style).
//!
//! Every spatial position attends to every other position, so the cost is
//! quadratic in `freq * time`; callers keep the spatial extent modest. The
//! learned scalar `gamma` starts at zero, making the block an identity map
//! until training pulls global context in.

use tch::{nn, Tensor};

use crate::{init, AttentionError, Result};

/// SAGAN-style self-attention over `[batch, channel, freq, time]` maps.
#[derive(Debug)]
pub struct SelfAttention2d {
    in_channels: i64,
    conv_q: nn::Conv2D,
    conv_k: nn::Conv2D,
    conv_v: nn::Conv2D,
    gamma: Tensor,
}

impl SelfAttention2d {
    /// Query/key projections reduce the channel width to `max(1, C / 8)`;
    /// the value projection keeps full width. All three are 1x1 convolutions
    /// with Xavier weights and zero biases.
    pub fn new(path: &nn::Path, in_channels: i64) -> Result<Self> {
        if in_channels <= 0 {
            return Err(AttentionError::Config(format!(
                "in_channels must be positive, got {in_channels}"
            )));
        }
        let qk_channels = (in_channels / 8).max(1);

        let mut conv_q = nn::conv2d(path / "conv_q", in_channels, qk_channels, 1, Default::default());
        let mut conv_k = nn::conv2d(path / "conv_k", in_channels, qk_channels, 1, Default::default());
        let mut conv_v = nn::conv2d(path / "conv_v", in_channels, in_channels, 1, Default::default());
        for conv in [&mut conv_q, &mut conv_k, &mut conv_v] {
            init::xavier_uniform(&mut conv.ws)?;
            if let Some(bs) = conv.bs.as_mut() {
                init::zeros(bs)?;
            }
        }

        let gamma = path.var("gamma", &[1], nn::Init::Const(0.0));

        Ok(Self {
            in_channels,
            conv_q,
            conv_k,
            conv_v,
            gamma,
        })
    }

    /// Returns `(gamma * attended + x, attention)` where the attention matrix
    /// is `[batch, freq * time, freq * time]` and the output keeps the input
    /// shape.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let size = x.size();
        if size.len() != 4 {
            return Err(AttentionError::ShapeMismatch(format!(
                "SelfAttention2d expects [batch, channel, freq, time], got {:?}",
                size
            )));
        }
        if size[1] != self.in_channels {
            return Err(AttentionError::ShapeMismatch(format!(
                "SelfAttention2d built for {} channels, input has {}",
                self.in_channels, size[1]
            )));
        }
        let (batch, channel, freq, time) = (size[0], size[1], size[2], size[3]);
        let n = freq * time;

        // [B, Cq, H, W] -> [B, N, Cq] for the query, [B, Cq, N] for the key
        let query = x.apply(&self.conv_q).view([batch, -1, n]).permute([0, 2, 1]);
        let key = x.apply(&self.conv_k).view([batch, -1, n]);
        let value = x.apply(&self.conv_v).view([batch, -1, n]);

        let energy = query.bmm(&key); // [B, N, N]
        let attn = energy.softmax(-1, x.kind());

        let attended = value.bmm(&attn.permute([0, 2, 1])).view([batch, channel, freq, time]);
        let out = &attended * &self.gamma + x;

        Ok((out, attn))
    }

    /// Current residual blend coefficient.
    pub fn gamma(&self) -> f64 {
        self.gamma.double_value(&[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device, Kind};

    #[test]
    fn test_identity_at_initialization() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = SelfAttention2d::new(&vs.root(), 1).unwrap();
        assert_eq!(block.gamma(), 0.0);

        let x = Tensor::rand([2, 1, 12, 9], (Kind::Float, Device::Cpu));
        let (out, attn) = block.forward(&x).unwrap();
        assert!(out.allclose(&x, 1e-7, 1e-9, false));
        assert_eq!(attn.size(), vec![2, 108, 108]);
    }

    #[test]
    fn test_attention_rows_normalized() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = SelfAttention2d::new(&vs.root(), 4).unwrap();

        let x = Tensor::rand([1, 4, 6, 5], (Kind::Float, Device::Cpu));
        let (_, attn) = block.forward(&x).unwrap();
        let sums = attn.sum_dim_intlist(&[-1i64][..], false, Kind::Float);
        let ones = Tensor::ones([1, 30], (Kind::Float, Device::Cpu));
        assert!(sums.allclose(&ones, 1e-5, 1e-6, false));
    }

    #[test]
    fn test_shape_preserved_after_gamma_update() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = SelfAttention2d::new(&vs.root(), 2).unwrap();
        tch::no_grad(|| {
            let mut gamma = block.gamma.shallow_clone();
            let _ = gamma.f_fill_(0.5).unwrap();
        });

        let x = Tensor::rand([3, 2, 7, 11], (Kind::Float, Device::Cpu));
        let (out, _) = block.forward(&x).unwrap();
        assert_eq!(out.size(), x.size());
        // With gamma nonzero the block is no longer an identity.
        assert!(!out.allclose(&x, 1e-7, 1e-9, false));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = SelfAttention2d::new(&vs.root(), 2).unwrap();
        let x = Tensor::rand([1, 3, 5, 5], (Kind::Float, Device::Cpu));
        assert!(matches!(
            block.forward(&x),
            Err(AttentionError::ShapeMismatch(_))
        ));
    }
}
