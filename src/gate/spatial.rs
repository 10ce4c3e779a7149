//! Spatial gating: summarize the channel axis at every position, convolve the
//! 2-channel summary down to a single-plane gate, and rescale positions.

use serde::{Deserialize, Serialize};
use tch::{nn, Kind, Tensor};

use crate::{init, AttentionError, Result};

/// Static configuration for [`SpatialGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialGateConfig {
    /// Convolution kernel size; must be odd so `(k - 1) / 2` padding preserves
    /// the spatial extent.
    #[serde(default = "default_kernel")]
    pub kernel_size: i64,
    /// Batch-normalize the raw gate plane before the sigmoid.
    #[serde(default = "default_batch_norm")]
    pub batch_norm: bool,
}

fn default_kernel() -> i64 {
    7
}

fn default_batch_norm() -> bool {
    true
}

impl Default for SpatialGateConfig {
    fn default() -> Self {
        Self {
            kernel_size: default_kernel(),
            batch_norm: default_batch_norm(),
        }
    }
}

impl SpatialGateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kernel_size <= 0 || self.kernel_size % 2 == 0 {
            return Err(AttentionError::Config(format!(
                "Spatial kernel size must be odd and positive, got {}",
                self.kernel_size
            )));
        }
        Ok(())
    }
}

/// Per-position gate over a `[batch, channel, freq, time]` feature map.
#[derive(Debug)]
pub struct SpatialGate {
    conv: nn::Conv2D,
    norm: Option<nn::BatchNorm>,
}

impl SpatialGate {
    pub fn new(config: &SpatialGateConfig, path: &nn::Path) -> Result<Self> {
        config.validate()?;

        let mut conv = nn::conv2d(
            path / "spatial",
            2,
            1,
            config.kernel_size,
            nn::ConvConfig {
                padding: (config.kernel_size - 1) / 2,
                bias: false,
                ..Default::default()
            },
        );
        init::xavier_uniform(&mut conv.ws)?;

        let norm = if config.batch_norm {
            Some(nn::batch_norm2d(path / "norm", 1, Default::default()))
        } else {
            None
        };

        Ok(Self { conv, norm })
    }

    /// Rescales `x` per spatial position; the output shape equals the input
    /// shape. `train` drives batch-norm statistics when normalization is
    /// enabled.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        if x.dim() != 4 {
            return Err(AttentionError::ShapeMismatch(format!(
                "SpatialGate expects [batch, channel, freq, time], got {:?}",
                x.size()
            )));
        }

        // [B, C, H, W] -> [B, 2, H, W]: max and mean across the channel axis
        let (max_pool, _) = x.max_dim(1, true);
        let mean_pool = x.mean_dim(&[1i64][..], true, Kind::Float);
        let compressed = Tensor::cat(&[max_pool, mean_pool], 1);

        let mut raw = compressed.apply(&self.conv);
        if let Some(norm) = &self.norm {
            raw = raw.apply_t(norm, train);
        }

        Ok(x * raw.sigmoid())
    }
}
