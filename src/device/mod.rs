//! Accelerator contract consumed by the engine.
//!
//! Blocking vs. enqueue semantics:
//! - `alloc`, `free`, `map_to_host`, `read_to_host` complete before returning. `map_to_host` and
//!   `read_to_host` observe every previously enqueued command.
//! - `write_from_host`, `unmap`, `enqueue_kernel` are enqueued on a single in-order queue.
//!   Results are only guaranteed after [`Device::wait_queue_to_finish`].

pub mod sim;

use smallvec::SmallVec;

use crate::foundation::core::PixelRect;
use crate::foundation::error::TesseraResult;
use crate::graph::operation::{HostView, RowsMut};

/// Opaque accelerator memory handle.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct DeviceHandle(pub u64);

/// Host-visible window onto mapped device memory.
#[derive(Debug)]
pub struct HostMapping {
    pub data: Vec<f32>,
    /// Elements per row as reported by the device; may exceed `width * channels`.
    pub row_pitch: usize,
}

/// Argument bound to a kernel launch.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelArg {
    /// Destination buffer.
    Output(DeviceHandle),
    /// Source buffer.
    Input(DeviceHandle),
    /// Constant source element (single-element input).
    Elem(SmallVec<[f32; 4]>),
    Float(f32),
    Int(i32),
}

/// One compute job over a pixel rectangle.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelLaunch {
    pub name: String,
    pub rect: PixelRect,
    pub pass: u32,
    pub args: Vec<KernelArg>,
}

pub trait Device: Send {
    fn alloc(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
        host_mappable: bool,
    ) -> TesseraResult<DeviceHandle>;

    fn free(&mut self, handle: DeviceHandle) -> TesseraResult<()>;

    /// Map device memory into host space. Only valid for host-mappable allocations.
    fn map_to_host(&mut self, handle: DeviceHandle) -> TesseraResult<HostMapping>;

    fn unmap(&mut self, handle: DeviceHandle, mapping: HostMapping) -> TesseraResult<()>;

    /// Copy device memory into `dst` (blocking).
    fn read_to_host(&mut self, handle: DeviceHandle, dst: RowsMut<'_>) -> TesseraResult<()>;

    /// Copy `src` into device memory (enqueued).
    fn write_from_host(&mut self, handle: DeviceHandle, src: HostView<'_>) -> TesseraResult<()>;

    /// Enqueue a zero fill of the whole allocation.
    fn clear(&mut self, handle: DeviceHandle) -> TesseraResult<()>;

    fn enqueue_kernel(&mut self, launch: KernelLaunch) -> TesseraResult<()>;

    fn wait_queue_to_finish(&mut self) -> TesseraResult<()>;

    fn compute_units(&self) -> u32;

    /// Largest `(width, height)` a single image allocation may have.
    fn max_image_size(&self) -> (u32, u32);
}

/// Shorten the borrow of an optional device so it can be handed to a callee.
pub(crate) fn reborrow<'a>(device: &'a mut Option<&mut dyn Device>) -> Option<&'a mut dyn Device> {
    match device {
        Some(d) => Some(&mut **d),
        None => None,
    }
}
