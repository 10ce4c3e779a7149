//! Channel gating: pool the spatial extent, run the pooled vector through a
//! bottleneck MLP, and rescale channels by a sigmoid gate.

use serde::{Deserialize, Serialize};
use tch::{nn, Kind, Tensor};

use crate::{init, AttentionError, Result};

/// Spatial pooling applied before the bottleneck MLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Mean over the spatial extent.
    Avg,
    /// Maximum over the spatial extent.
    Max,
    /// L2 norm over the spatial extent.
    Lp,
    /// Log-sum-exp over the spatial extent.
    Lse,
}

/// Static configuration for [`ChannelGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGateConfig {
    pub gate_channels: i64,
    #[serde(default = "default_reduction")]
    pub reduction_ratio: i64,
    #[serde(default = "default_pools")]
    pub pool_kinds: Vec<PoolKind>,
}

fn default_reduction() -> i64 {
    16
}

fn default_pools() -> Vec<PoolKind> {
    vec![PoolKind::Avg, PoolKind::Max]
}

impl ChannelGateConfig {
    pub fn new(gate_channels: i64) -> Self {
        Self {
            gate_channels,
            reduction_ratio: default_reduction(),
            pool_kinds: default_pools(),
        }
    }

    pub fn with_reduction(self, reduction_ratio: i64) -> Self {
        Self {
            reduction_ratio,
            ..self
        }
    }

    pub fn with_pools(self, pool_kinds: Vec<PoolKind>) -> Self {
        Self { pool_kinds, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gate_channels <= 0 || self.reduction_ratio <= 0 {
            return Err(AttentionError::Config(format!(
                "gate_channels and reduction_ratio must be positive, got {} / {}",
                self.gate_channels, self.reduction_ratio
            )));
        }
        if self.gate_channels % self.reduction_ratio != 0 {
            return Err(AttentionError::Config(format!(
                "gate_channels ({}) must be divisible by reduction_ratio ({})",
                self.gate_channels, self.reduction_ratio
            )));
        }
        if self.pool_kinds.is_empty() {
            return Err(AttentionError::Config(
                "at least one pooling kind is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-channel gate over a `[batch, channel, freq, time]` feature map.
///
/// One bottleneck MLP (`C -> C/r -> C`, ReLU in between) is shared by every
/// configured pooling kind; raw per-kind signals are summed, not averaged, so
/// a channel surfaced strongly by any single pooling kind is amplified.
#[derive(Debug)]
pub struct ChannelGate {
    gate_channels: i64,
    pool_kinds: Vec<PoolKind>,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

impl ChannelGate {
    pub fn new(config: &ChannelGateConfig, path: &nn::Path) -> Result<Self> {
        config.validate()?;
        let hidden = config.gate_channels / config.reduction_ratio;

        let mut fc1 = nn::linear(path / "fc1", config.gate_channels, hidden, Default::default());
        let mut fc2 = nn::linear(path / "fc2", hidden, config.gate_channels, Default::default());
        for linear in [&mut fc1, &mut fc2] {
            init::xavier_uniform(&mut linear.ws)?;
            if let Some(bs) = linear.bs.as_mut() {
                init::zeros(bs)?;
            }
        }

        Ok(Self {
            gate_channels: config.gate_channels,
            pool_kinds: config.pool_kinds.clone(),
            fc1,
            fc2,
        })
    }

    /// Rescales `x` per channel; the output shape equals the input shape.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let size = x.size();
        if size.len() != 4 {
            return Err(AttentionError::ShapeMismatch(format!(
                "ChannelGate expects [batch, channel, freq, time], got {:?}",
                size
            )));
        }
        if size[1] != self.gate_channels {
            return Err(AttentionError::ShapeMismatch(format!(
                "ChannelGate built for {} channels, input has {}",
                self.gate_channels, size[1]
            )));
        }

        let mut gate_sum: Option<Tensor> = None;
        for kind in &self.pool_kinds {
            let pooled = self.pool(x, *kind);
            let raw = pooled.apply(&self.fc1).relu().apply(&self.fc2);
            gate_sum = Some(match gate_sum {
                None => raw,
                Some(sum) => sum + raw,
            });
        }
        // validate() guarantees at least one pooling kind
        let gate_sum = gate_sum.ok_or_else(|| {
            AttentionError::Config("at least one pooling kind is required".to_string())
        })?;

        let scale = gate_sum.sigmoid().unsqueeze(-1).unsqueeze(-1);
        Ok(x * scale)
    }

    /// Reduce the spatial extent to a `[batch, channel]` summary.
    fn pool(&self, x: &Tensor, kind: PoolKind) -> Tensor {
        match kind {
            PoolKind::Avg => x.mean_dim(&[2i64, 3][..], false, Kind::Float),
            PoolKind::Max => x.amax(&[2i64, 3][..], false),
            PoolKind::Lp => x
                .square()
                .sum_dim_intlist(&[2i64, 3][..], false, Kind::Float)
                .sqrt(),
            PoolKind::Lse => {
                let size = x.size();
                x.view([size[0], size[1], -1]).logsumexp(&[-1i64][..], false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device};

    fn gate(channels: i64, pools: Vec<PoolKind>) -> (nn::VarStore, ChannelGate) {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ChannelGateConfig::new(channels)
            .with_reduction(4)
            .with_pools(pools);
        let gate = ChannelGate::new(&config, &vs.root()).unwrap();
        (vs, gate)
    }

    #[test]
    fn test_shape_preserved_for_every_pool_kind() {
        for kind in [PoolKind::Avg, PoolKind::Max, PoolKind::Lp, PoolKind::Lse] {
            let (_vs, gate) = gate(8, vec![kind]);
            let x = Tensor::rand([2, 8, 11, 7], (Kind::Float, Device::Cpu));
            let out = gate.forward(&x).unwrap();
            assert_eq!(out.size(), x.size());
        }
    }

    #[test]
    fn test_indivisible_reduction_is_config_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ChannelGateConfig::new(10).with_reduction(16);
        assert!(matches!(
            ChannelGate::new(&config, &vs.root()),
            Err(AttentionError::Config(_))
        ));
    }

    #[test]
    fn test_empty_pool_set_is_config_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ChannelGateConfig::new(8).with_reduction(4).with_pools(vec![]);
        assert!(ChannelGate::new(&config, &vs.root()).is_err());
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let (_vs, gate) = gate(8, vec![PoolKind::Avg]);
        let x = Tensor::rand([2, 16, 5, 5], (Kind::Float, Device::Cpu));
        assert!(matches!(
            gate.forward(&x),
            Err(AttentionError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_gate_attenuates_toward_input() {
        // The gate is sigmoid-bounded, so |out| <= |x| elementwise on a
        // non-negative input.
        let (_vs, gate) = gate(8, vec![PoolKind::Avg, PoolKind::Max]);
        let x = Tensor::rand([1, 8, 6, 6], (Kind::Float, Device::Cpu));
        let out = gate.forward(&x).unwrap();
        let diff = (&x - &out).min().double_value(&[]);
        assert!(diff >= -1e-6);
    }

    #[test]
    fn test_pool_kind_serde_names() {
        let json = serde_json::to_string(&vec![
            PoolKind::Avg,
            PoolKind::Max,
            PoolKind::Lp,
            PoolKind::Lse,
        ])
        .unwrap();
        assert_eq!(json, r#"["avg","max","lp","lse"]"#);
    }
}
