//! Built-in operations used by the CLI demo graph and by tests.
//!
//! Pixel math is shared between the CPU writes and the reference accelerator kernels, so both
//! sides produce identical results.

pub mod filter;
pub mod sink;
pub mod source;

pub use filter::{CachePoint, Invert, Mix, PrefixSumRows};
pub use sink::{Viewer, ViewerHandle};
pub use source::{Checker, Constant, ImageInput};

use crate::device::sim::{SimDevice, SimKernelCtx};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::OperationKey;

pub const CHECKER_KERNEL: &str = "tessera.checker";
pub const MIX_KERNEL: &str = "tessera.mix";

/// Install the kernels of every built-in accelerated operation.
pub fn register_sim_kernels(device: &mut SimDevice) {
    device.register_kernel(CHECKER_KERNEL, |k: &mut SimKernelCtx<'_>| {
        let cell = u32::try_from(k.int_param(0)?)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| TesseraError::device("checker cell size must be positive"))?;
        let mut a = [0.0; 4];
        let mut b = [0.0; 4];
        for (c, (ca, cb)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
            *ca = k.float_param(1 + c)?;
            *cb = k.float_param(5 + c)?;
        }
        source::checker_rect(k.rect, cell, &a, &b, &mut k.output);
        Ok(())
    });
    device.register_kernel(MIX_KERNEL, |k: &mut SimKernelCtx<'_>| {
        let factor = k.float_param(0)?;
        let [a, b] = k.inputs.as_slice() else {
            return Err(TesseraError::device(format!(
                "mix expects 2 inputs, got {}",
                k.inputs.len()
            )));
        };
        let (a, b) = (*a, *b);
        filter::mix_rect(k.rect, &a, &b, factor, &mut k.output);
        Ok(())
    });
}

/// Resolved input of an operation under construction.
pub(crate) struct InputInfo {
    pub id: OpId,
    pub key: OperationKey,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub elem: crate::foundation::core::ElemType,
}

pub(crate) fn input_info(graph: &OperationGraph, id: OpId) -> TesseraResult<InputInfo> {
    let op = graph.op(id)?;
    Ok(InputInfo {
        id,
        key: op.key(),
        width: op.width(),
        height: op.height(),
        channels: op.channel_count(),
        elem: op.elem_type(),
    })
}
