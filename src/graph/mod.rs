//! Operation graph model: identities, the operation contract and traversal.

#[allow(clippy::module_inception)]
pub mod graph;
pub mod key;
pub mod operation;
pub mod scheduler;

pub use graph::{OpId, OperationGraph};
pub use key::{KeyBuilder, OperationKey};
pub use operation::{
    BufferType, HostView, InputPixels, InputSet, KernelSpec, Operation, RowsMut, WriteCtx,
};
