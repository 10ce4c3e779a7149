//! Channel, spatial, and complex-valued gating over `[batch, channel, freq, time]`
//! feature maps.

pub mod channel;
pub mod complex;
pub mod spatial;

pub use channel::{ChannelGate, ChannelGateConfig, PoolKind};
pub use complex::{CcbamConfig, ComplexChannelSpatialGate, ComplexSpectrum};
pub use spatial::{SpatialGate, SpatialGateConfig};
