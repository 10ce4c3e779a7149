//! CCBAM: channel and spatial gating applied independently to the real and
//! imaginary planes of a complex spectrogram.
//!
//! The two planes are carried as a struct of two real tensors. The backbone's
//! trailing-axis-2 convention is supported only at the boundary through
//! explicit converters, so a complex spectrum can never be confused with a
//! feature tensor that happens to end in a size-2 axis.

use serde::{Deserialize, Serialize};
use tch::{nn, Tensor};

use crate::gate::channel::{ChannelGate, ChannelGateConfig, PoolKind};
use crate::gate::spatial::{SpatialGate, SpatialGateConfig};
use crate::{AttentionError, Result};

/// A complex feature map as two parallel real planes of identical shape.
#[derive(Debug)]
pub struct ComplexSpectrum {
    pub real: Tensor,
    pub imag: Tensor,
}

impl Clone for ComplexSpectrum {
    fn clone(&self) -> Self {
        Self {
            real: self.real.shallow_clone(),
            imag: self.imag.shallow_clone(),
        }
    }
}

impl ComplexSpectrum {
    pub fn new(real: Tensor, imag: Tensor) -> Result<Self> {
        if real.size() != imag.size() {
            return Err(AttentionError::ShapeMismatch(format!(
                "Real plane {:?} and imaginary plane {:?} disagree",
                real.size(),
                imag.size()
            )));
        }
        Ok(Self { real, imag })
    }

    /// Split a stacked `[batch, channel, freq, time, 2]` tensor into planes.
    pub fn from_stacked(stacked: &Tensor) -> Result<Self> {
        let size = stacked.size();
        if size.len() != 5 || size[4] != 2 {
            return Err(AttentionError::ShapeMismatch(format!(
                "Expected [batch, channel, freq, time, 2], got {:?}",
                size
            )));
        }
        Ok(Self {
            real: stacked.select(4, 0),
            imag: stacked.select(4, 1),
        })
    }

    /// Recombine the planes along a new trailing axis in (real, imag) order.
    pub fn to_stacked(&self) -> Tensor {
        Tensor::stack(&[&self.real, &self.imag], -1)
    }

    /// Shape of one plane.
    pub fn plane_size(&self) -> Vec<i64> {
        self.real.size()
    }
}

/// Static configuration for [`ComplexChannelSpatialGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcbamConfig {
    pub gate_channels: i64,
    #[serde(default = "default_reduction")]
    pub reduction_ratio: i64,
    #[serde(default = "default_pools")]
    pub pool_kinds: Vec<PoolKind>,
    /// Skip the spatial gating stage entirely.
    #[serde(default)]
    pub no_spatial: bool,
}

fn default_reduction() -> i64 {
    16
}

fn default_pools() -> Vec<PoolKind> {
    vec![PoolKind::Avg, PoolKind::Max]
}

impl CcbamConfig {
    pub fn new(gate_channels: i64) -> Self {
        Self {
            gate_channels,
            reduction_ratio: default_reduction(),
            pool_kinds: default_pools(),
            no_spatial: false,
        }
    }

    fn channel_config(&self) -> ChannelGateConfig {
        ChannelGateConfig::new(self.gate_channels)
            .with_reduction(self.reduction_ratio)
            .with_pools(self.pool_kinds.clone())
    }
}

/// Complex channel-and-spatial gate (CCBAM).
///
/// Real and imaginary planes run through structurally identical but
/// parametrically independent gate pipelines and never read each other's
/// intermediate values, so each domain learns its own attention pattern.
#[derive(Debug)]
pub struct ComplexChannelSpatialGate {
    channel_real: ChannelGate,
    channel_imag: ChannelGate,
    spatial: Option<(SpatialGate, SpatialGate)>,
}

impl ComplexChannelSpatialGate {
    pub fn new(config: &CcbamConfig, path: &nn::Path) -> Result<Self> {
        let channel_config = config.channel_config();
        let channel_real = ChannelGate::new(&channel_config, &(path / "channel_real"))?;
        let channel_imag = ChannelGate::new(&channel_config, &(path / "channel_imag"))?;

        let spatial = if config.no_spatial {
            None
        } else {
            let spatial_config = SpatialGateConfig::default();
            Some((
                SpatialGate::new(&spatial_config, &(path / "spatial_real"))?,
                SpatialGate::new(&spatial_config, &(path / "spatial_imag"))?,
            ))
        };

        log::debug!(
            "CCBAM: channels={}, reduction={}, pools={:?}, no_spatial={}",
            config.gate_channels,
            config.reduction_ratio,
            config.pool_kinds,
            config.no_spatial
        );

        Ok(Self {
            channel_real,
            channel_imag,
            spatial,
        })
    }

    /// Gates each plane independently; output planes keep the input shape.
    pub fn forward(&self, x: &ComplexSpectrum, train: bool) -> Result<ComplexSpectrum> {
        let mut real = self.channel_real.forward(&x.real)?;
        let mut imag = self.channel_imag.forward(&x.imag)?;

        if let Some((spatial_real, spatial_imag)) = &self.spatial {
            real = spatial_real.forward(&real, train)?;
            imag = spatial_imag.forward(&imag, train)?;
        }

        ComplexSpectrum::new(real, imag)
    }

    /// Convenience path for the backbone's stacked `[B, C, H, W, 2]` tensors.
    pub fn forward_stacked(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let spectrum = ComplexSpectrum::from_stacked(x)?;
        Ok(self.forward(&spectrum, train)?.to_stacked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device, Kind};

    #[test]
    fn test_stacked_round_trip() {
        let stacked = Tensor::rand([2, 4, 6, 5, 2], (Kind::Float, Device::Cpu));
        let spectrum = ComplexSpectrum::from_stacked(&stacked).unwrap();
        assert_eq!(spectrum.plane_size(), vec![2, 4, 6, 5]);
        assert!(spectrum.to_stacked().allclose(&stacked, 1e-6, 1e-8, false));
    }

    #[test]
    fn test_from_stacked_requires_trailing_two() {
        let bad = Tensor::rand([2, 4, 6, 5, 3], (Kind::Float, Device::Cpu));
        assert!(ComplexSpectrum::from_stacked(&bad).is_err());
        let rank4 = Tensor::rand([2, 4, 6, 5], (Kind::Float, Device::Cpu));
        assert!(ComplexSpectrum::from_stacked(&rank4).is_err());
    }

    #[test]
    fn test_plane_shape_agreement_enforced() {
        let real = Tensor::rand([1, 2, 3, 3], (Kind::Float, Device::Cpu));
        let imag = Tensor::rand([1, 2, 3, 4], (Kind::Float, Device::Cpu));
        assert!(ComplexSpectrum::new(real, imag).is_err());
    }

    #[test]
    fn test_forward_preserves_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut config = CcbamConfig::new(8);
        config.reduction_ratio = 4;
        let ccbam = ComplexChannelSpatialGate::new(&config, &vs.root()).unwrap();

        let x = Tensor::rand([2, 8, 13, 9, 2], (Kind::Float, Device::Cpu));
        let out = ccbam.forward_stacked(&x, false).unwrap();
        assert_eq!(out.size(), vec![2, 8, 13, 9, 2]);
    }

    #[test]
    fn test_no_spatial_skips_spatial_stage() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut config = CcbamConfig::new(8);
        config.reduction_ratio = 4;
        config.no_spatial = true;
        let ccbam = ComplexChannelSpatialGate::new(&config, &vs.root()).unwrap();
        assert!(ccbam.spatial.is_none());

        let x = Tensor::rand([1, 8, 5, 5, 2], (Kind::Float, Device::Cpu));
        assert_eq!(ccbam.forward_stacked(&x, false).unwrap().size(), x.size());
    }

    #[test]
    fn test_zero_imag_plane_stays_zero() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut config = CcbamConfig::new(4);
        config.reduction_ratio = 2;
        let ccbam = ComplexChannelSpatialGate::new(&config, &vs.root()).unwrap();

        let spectrum = ComplexSpectrum::new(
            Tensor::rand([1, 4, 6, 6], (Kind::Float, Device::Cpu)),
            Tensor::zeros([1, 4, 6, 6], (Kind::Float, Device::Cpu)),
        )
        .unwrap();
        let out = ccbam.forward(&spectrum, false).unwrap();
        assert_eq!(out.imag.abs().max().double_value(&[]), 0.0);
    }
}
