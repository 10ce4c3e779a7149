//! # Spectral Attention
//!
//! Attention and gating building blocks for complex-spectrogram speech denoising.
//!
//! ## Features
//!
//! - **Sequence attention**: scaled dot-product attention and multi-head attention
//!   over `[batch, length, d_model]` tensors
//! - **Feature-map gating**: channel and spatial gates over `[batch, channel, freq, time]`
//!   spectrograms, and a complex-valued combination (CCBAM) that gates real and
//!   imaginary planes independently
//! - **Global self-attention**: SAGAN-style quadratic self-attention over 2D feature
//!   maps with a learned residual blend
//!
//! Blocks consume and produce plain `tch::Tensor`s. They register their parameters
//! through `tch::nn::Path`, so the hosting network owns the `VarStore` and drives
//! optimization; the blocks themselves never update weights.
//!
//! ## Usage
//!
//! ```no_run
//! use spectral_attention::{
//!     attention::{MultiHeadAttention, MultiHeadConfig},
//!     mask::AttentionMask,
//! };
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let vs = nn::VarStore::new(Device::Cpu);
//! let config = MultiHeadConfig::new(512, 8);
//! let mha = MultiHeadAttention::new(&config, &vs.root()).unwrap();
//!
//! let x = Tensor::rand([4, 10, 512], (Kind::Float, Device::Cpu));
//! let (context, attn) = mha.forward(&x, &x, &x, &AttentionMask::None, false).unwrap();
//! assert_eq!(context.size(), vec![4, 10, 512]);
//! assert_eq!(attn.size(), vec![32, 10, 10]);
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// Sequence attention: scaled dot-product and multi-head attention
pub mod attention;

/// Channel, spatial, and complex (CCBAM) gating over feature maps
pub mod gate;

/// Weight initialization helpers shared by all blocks
pub mod init;

/// Logging setup for hosts and binaries
pub mod logging;

/// First-class attention mask variants
pub mod mask;

/// Global 2D self-attention with learned residual blend
pub mod self_attention;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use attention::{MultiHeadAttention, MultiHeadConfig, ScaledDotProductAttention};
pub use gate::{
    CcbamConfig, ChannelGate, ChannelGateConfig, ComplexChannelSpatialGate, ComplexSpectrum,
    PoolKind, SpatialGate, SpatialGateConfig,
};
pub use mask::AttentionMask;
pub use self_attention::SelfAttention2d;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Main error type for the attention library.
///
/// Failures are detected and raised at the boundary of the offending block;
/// nothing is silently corrected and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum AttentionError {
    /// Construction-time configuration problem (e.g. `d_model % n_heads != 0`).
    /// Never recoverable; the caller must fix the configuration before use.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Forward-time tensor shape disagreement, surfaced immediately.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A softmax row that would be entirely masked out and yield NaN weights.
    #[error("Numeric degenerate: {0}")]
    NumericDegenerate(String),

    /// Error propagated from a fallible libtorch operation.
    #[error("Tensor error: {0}")]
    Tensor(#[from] tch::TchError),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AttentionError>;

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
