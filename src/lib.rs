//! Tessera is a two-phase dataflow execution engine for node-graph image compositing.
//!
//! Given a DAG of image-producing operations it decides when each operation's pixels are
//! computed, where they live (host memory, accelerator memory, or both) and how long that
//! memory stays alive before it is recycled:
//!
//! - Build an [`OperationGraph`] of [`Operation`]s
//! - Create a long-lived [`Engine`], optionally with a [`Device`]
//! - [`Engine::execute`] an [`ExecutionRequest`] and read the [`ExecutionReport`]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod device;
pub mod exec;
pub mod foundation;
pub mod graph;
pub mod ops;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::device::sim::SimDevice;
pub use crate::device::{Device, DeviceHandle, KernelArg};
pub use crate::exec::{
    AuditReport, BreakFlag, Engine, EngineOpts, ExecStats, ExecutionReport, ExecutionRequest,
    RecyclerOpts, RecyclerStats,
};
pub use crate::foundation::core::{ElemType, ExecSide, ImageBuf, PixelRect};
pub use crate::foundation::error::{TesseraError, TesseraResult};
pub use crate::graph::{
    BufferType, InputPixels, KernelSpec, OpId, Operation, OperationGraph, OperationKey, WriteCtx,
};
