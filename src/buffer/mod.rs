//! Working buffers and their per-facet state machines.

pub mod tmp_buffer;

pub use tmp_buffer::{
    AllocId, DeviceFacet, DeviceMem, HostData, HostFacet, HostMem, MappedHost, Ownership,
    TmpBuffer,
};
