//! Sequence attention over `[batch, length, dim]` tensors.

pub mod multi_head;
pub mod scaled_dot_product;

pub use multi_head::{MultiHeadAttention, MultiHeadConfig};
pub use scaled_dot_product::ScaledDotProductAttention;
