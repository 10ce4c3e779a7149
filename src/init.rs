//! Weight initialization helpers.
//!
//! Every block in this crate follows the same contract: linear and convolution
//! weights are Xavier/Glorot-uniform initialized from layer fan-in/fan-out,
//! biases start at zero, and the self-attention residual coefficient starts at
//! zero. The helpers here mutate already-registered variables in place under
//! `tch::no_grad` so the autograd graph never sees the initialization writes.

use tch::Tensor;

use crate::{AttentionError, Result};

/// Xavier/Glorot uniform initialization: `U(-b, b)` with
/// `b = sqrt(6 / (fan_in + fan_out))`.
///
/// Supports 2-D linear weights `[out, in]` and 4-D convolution kernels
/// `[out, in, kh, kw]`.
pub fn xavier_uniform(param: &mut Tensor) -> Result<()> {
    let size = param.size();
    let (fan_in, fan_out) = match size.len() {
        2 => (size[1] as f64, size[0] as f64),
        4 => {
            let receptive = (size[2] * size[3]) as f64;
            (size[1] as f64 * receptive, size[0] as f64 * receptive)
        }
        _ => {
            return Err(AttentionError::Config(format!(
                "Xavier initialization expects a 2-D or 4-D weight, got shape {:?}",
                size
            )));
        }
    };
    let bound = (6.0 / (fan_in + fan_out)).sqrt();
    tch::no_grad(|| param.f_uniform_(-bound, bound))?;
    Ok(())
}

/// Zero initialization for bias vectors.
pub fn zeros(param: &mut Tensor) -> Result<()> {
    tch::no_grad(|| param.f_zero_())?;
    Ok(())
}
