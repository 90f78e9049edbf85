use std::sync::Arc;

use crate::device::{Device, DeviceHandle, HostMapping};
use crate::foundation::core::ImageBuf;
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::operation::{HostView, RowsMut};

/// Identity of one allocation made by the recycler.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct AllocId(pub u64);

impl std::fmt::Display for AllocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alloc#{}", self.0)
    }
}

/// Who owns a piece of host memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Ownership {
    /// Created by the recycler and returned to it after the last read.
    Owned,
    /// Belongs to the cache or to an operation. Never pooled.
    BorrowedExternal,
}

#[derive(Clone, Debug)]
pub enum HostData {
    Owned(Vec<f32>),
    /// Read-only pixels shared with the cache or an operation.
    Shared(Arc<ImageBuf>),
}

/// Host allocation with its current layout.
#[derive(Debug)]
pub struct HostMem {
    pub(crate) id: Option<AllocId>,
    pub(crate) data: HostData,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) channels: u32,
    pub(crate) row_pitch: usize,
    pub(crate) ownership: Ownership,
}

impl HostMem {
    /// Zeroed recycler allocation laid out tightly for `width x height x channels`.
    pub(crate) fn owned(id: AllocId, width: u32, height: u32, channels: u32) -> Self {
        let row_pitch = (width as usize) * (channels as usize);
        Self {
            id: Some(id),
            data: HostData::Owned(vec![0.0; row_pitch * height as usize]),
            width,
            height,
            channels,
            row_pitch,
            ownership: Ownership::Owned,
        }
    }

    /// Writable memory that belongs to someone else (a cache slot).
    pub(crate) fn external(data: Vec<f32>, width: u32, height: u32, channels: u32) -> Self {
        Self {
            id: None,
            data: HostData::Owned(data),
            width,
            height,
            channels,
            row_pitch: (width as usize) * (channels as usize),
            ownership: Ownership::BorrowedExternal,
        }
    }

    pub(crate) fn shared(img: Arc<ImageBuf>) -> Self {
        Self {
            id: None,
            width: img.width,
            height: img.height,
            channels: img.channels,
            row_pitch: img.row_pitch(),
            data: HostData::Shared(img),
            ownership: Ownership::BorrowedExternal,
        }
    }

    /// Allocated elements.
    pub fn capacity(&self) -> usize {
        match &self.data {
            HostData::Owned(v) => v.len(),
            HostData::Shared(img) => img.data.len(),
        }
    }

    pub fn bytes(&self) -> usize {
        self.capacity() * std::mem::size_of::<f32>()
    }

    pub fn is_recyclable(&self) -> bool {
        self.ownership == Ownership::Owned && self.id.is_some()
    }

    /// Reuse this allocation for a new request: tight layout, zeroed.
    pub(crate) fn relayout(&mut self, width: u32, height: u32, channels: u32) -> TesseraResult<()> {
        let row_pitch = (width as usize) * (channels as usize);
        let need = row_pitch * height as usize;
        let HostData::Owned(v) = &mut self.data else {
            return Err(TesseraError::invariant("relayout of shared host memory"));
        };
        if v.len() < need {
            return Err(TesseraError::invariant(format!(
                "host allocation of {} elements cannot hold {width}x{height}x{channels}",
                v.len()
            )));
        }
        v.fill(0.0);
        self.width = width;
        self.height = height;
        self.channels = channels;
        self.row_pitch = row_pitch;
        Ok(())
    }

    /// Read view at a logical size no larger than the current layout.
    pub(crate) fn view(&self, width: u32, height: u32, channels: u32) -> TesseraResult<HostView<'_>> {
        let data: &[f32] = match &self.data {
            HostData::Owned(v) => v,
            HostData::Shared(img) => &img.data,
        };
        HostView::new(data, width, height, channels, self.row_pitch)
    }

    pub(crate) fn rows_mut(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
    ) -> TesseraResult<RowsMut<'_>> {
        let HostData::Owned(v) = &mut self.data else {
            return Err(TesseraError::invariant("write into shared host memory"));
        };
        RowsMut::new(v, width, height, channels, self.row_pitch)
    }
}

/// Device allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceMem {
    pub(crate) id: AllocId,
    pub(crate) handle: DeviceHandle,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) channels: u32,
    pub(crate) host_mappable: bool,
}

impl DeviceMem {
    pub fn bytes(&self) -> usize {
        (self.width as usize)
            * (self.height as usize)
            * (self.channels as usize)
            * std::mem::size_of::<f32>()
    }

    /// Whether this allocation can back a `width x height x channels` request.
    pub(crate) fn fits(&self, width: u32, height: u32, channels: u32) -> bool {
        self.channels == channels && self.width >= width && self.height >= height
    }
}

/// Device memory currently mapped into host space.
#[derive(Debug)]
pub struct MappedHost {
    pub(crate) device: DeviceMem,
    pub(crate) mapping: HostMapping,
}

impl MappedHost {
    pub(crate) fn map(device: &mut dyn Device, mem: DeviceMem) -> TesseraResult<Self> {
        if !mem.host_mappable {
            return Err(TesseraError::invariant(format!(
                "{} was allocated without host mapping",
                mem.id
            )));
        }
        let mapping = device.map_to_host(mem.handle)?;
        Ok(Self {
            device: mem,
            mapping,
        })
    }

    pub(crate) fn unmap(self, device: &mut dyn Device) -> TesseraResult<DeviceMem> {
        device.unmap(self.device.handle, self.mapping)?;
        Ok(self.device)
    }

    fn view(&self, width: u32, height: u32, channels: u32) -> TesseraResult<HostView<'_>> {
        HostView::new(
            &self.mapping.data,
            width,
            height,
            channels,
            self.mapping.row_pitch,
        )
    }

    fn rows_mut(&mut self, width: u32, height: u32, channels: u32) -> TesseraResult<RowsMut<'_>> {
        RowsMut::new(
            &mut self.mapping.data,
            width,
            height,
            channels,
            self.mapping.row_pitch,
        )
    }
}

#[derive(Debug, Default)]
pub enum HostFacet {
    #[default]
    Unallocated,
    Cleared(HostMem),
    Filled(HostMem),
    MappedFromDevice(MappedHost),
}

#[derive(Debug, Default)]
pub enum DeviceFacet {
    #[default]
    Unallocated,
    Cleared(DeviceMem),
    Filled(DeviceMem),
    /// Storage is currently lent to the host facet.
    MappedToHost(DeviceHandle),
}

impl HostFacet {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::Cleared(_) => "cleared",
            Self::Filled(_) => "filled",
            Self::MappedFromDevice(_) => "mapped-from-device",
        }
    }
}

impl DeviceFacet {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::Cleared(_) => "cleared",
            Self::Filled(_) => "filled",
            Self::MappedToHost(_) => "mapped-to-host",
        }
    }
}

/// Working buffer of one operation during one execution.
///
/// `width`, `height` and `channels` are the requested logical size. Every facet's allocation is
/// at least that large.
#[derive(Debug)]
pub struct TmpBuffer {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) channels: u32,
    pub(crate) execution_id: Arc<str>,
    pub(crate) host: HostFacet,
    pub(crate) device: DeviceFacet,
    /// Host memory set aside while the host facet views mapped device memory.
    pub(crate) orig_host: Option<HostMem>,
}

impl TmpBuffer {
    pub fn new(width: u32, height: u32, channels: u32, execution_id: Arc<str>) -> Self {
        Self {
            width,
            height,
            channels,
            execution_id,
            host: HostFacet::Unallocated,
            device: DeviceFacet::Unallocated,
            orig_host: None,
        }
    }

    pub fn host_state(&self) -> &'static str {
        self.host.state_name()
    }

    pub fn device_state(&self) -> &'static str {
        self.device.state_name()
    }

    pub fn has_host(&self) -> bool {
        !matches!(self.host, HostFacet::Unallocated)
    }

    pub fn has_device(&self) -> bool {
        !matches!(self.device, DeviceFacet::Unallocated)
    }

    pub fn host_readable(&self) -> bool {
        matches!(
            self.host,
            HostFacet::Filled(_) | HostFacet::MappedFromDevice(_)
        )
    }

    pub fn device_readable(&self) -> bool {
        matches!(self.device, DeviceFacet::Filled(_))
    }

    pub(crate) fn attach_host(&mut self, mem: HostMem, filled: bool) -> TesseraResult<()> {
        if self.has_host() {
            return Err(TesseraError::invariant(format!(
                "host facet already {}",
                self.host_state()
            )));
        }
        if mem.channels != self.channels || mem.width < self.width || mem.height < self.height {
            return Err(TesseraError::invariant(format!(
                "{}x{}x{} host memory attached to {}x{}x{} buffer",
                mem.width, mem.height, mem.channels, self.width, self.height, self.channels
            )));
        }
        self.host = if filled {
            HostFacet::Filled(mem)
        } else {
            HostFacet::Cleared(mem)
        };
        Ok(())
    }

    pub(crate) fn attach_device(&mut self, mem: DeviceMem) -> TesseraResult<()> {
        if self.has_device() {
            return Err(TesseraError::invariant(format!(
                "device facet already {}",
                self.device_state()
            )));
        }
        if !mem.fits(self.width, self.height, self.channels) {
            return Err(TesseraError::invariant(format!(
                "{}x{}x{} device memory attached to {}x{}x{} buffer",
                mem.width, mem.height, mem.channels, self.width, self.height, self.channels
            )));
        }
        self.device = DeviceFacet::Cleared(mem);
        Ok(())
    }

    /// Attach device memory that is already mapped into host space.
    pub(crate) fn attach_mapped(&mut self, mapped: MappedHost) -> TesseraResult<()> {
        if self.has_device() || matches!(self.host, HostFacet::MappedFromDevice(_)) {
            return Err(TesseraError::invariant(format!(
                "cannot attach mapped memory to a buffer with host {} / device {}",
                self.host_state(),
                self.device_state()
            )));
        }
        if !mapped.device.fits(self.width, self.height, self.channels) {
            return Err(TesseraError::invariant(format!(
                "{}x{}x{} mapped memory attached to {}x{}x{} buffer",
                mapped.device.width,
                mapped.device.height,
                mapped.device.channels,
                self.width,
                self.height,
                self.channels
            )));
        }
        if let HostFacet::Cleared(m) | HostFacet::Filled(m) = std::mem::take(&mut self.host) {
            self.orig_host = Some(m);
        }
        self.device = DeviceFacet::MappedToHost(mapped.device.handle);
        self.host = HostFacet::MappedFromDevice(mapped);
        Ok(())
    }

    /// Map the filled device facet into host space, setting any host memory aside.
    pub(crate) fn map_device_to_host(&mut self, device: &mut dyn Device) -> TesseraResult<()> {
        let mem = match self.device {
            DeviceFacet::Filled(m) => m,
            _ => {
                return Err(TesseraError::invariant(format!(
                    "map of device facet in state {}",
                    self.device_state()
                )));
            }
        };
        if matches!(self.host, HostFacet::MappedFromDevice(_)) {
            return Err(TesseraError::invariant("host facet is already mapped"));
        }
        let mapped = MappedHost::map(device, mem)?;
        self.device = DeviceFacet::Unallocated;
        self.attach_mapped(mapped)
    }

    /// Return mapped storage to the device. The device facet ends up filled and any saved host
    /// memory comes back cleared.
    pub(crate) fn unmap(&mut self, device: &mut dyn Device) -> TesseraResult<()> {
        let mapped = match std::mem::take(&mut self.host) {
            HostFacet::MappedFromDevice(m) => m,
            other => {
                let state = other.state_name();
                self.host = other;
                return Err(TesseraError::invariant(format!(
                    "unmap of host facet in state {state}"
                )));
            }
        };
        let mem = mapped.unmap(device)?;
        self.device = DeviceFacet::Filled(mem);
        if let Some(orig) = self.orig_host.take() {
            self.host = HostFacet::Cleared(orig);
        }
        Ok(())
    }

    /// Enqueue a host to device copy of the filled host facet.
    pub(crate) fn upload(&mut self, device: &mut dyn Device) -> TesseraResult<()> {
        let mem = match self.device {
            DeviceFacet::Cleared(m) | DeviceFacet::Filled(m) => m,
            _ => {
                return Err(TesseraError::invariant(format!(
                    "upload into device facet in state {}",
                    self.device_state()
                )));
            }
        };
        let src = self.host_view()?;
        device.write_from_host(mem.handle, src)?;
        self.device = DeviceFacet::Filled(mem);
        Ok(())
    }

    /// Blocking device to host copy into the host facet.
    pub(crate) fn download(&mut self, device: &mut dyn Device) -> TesseraResult<()> {
        let DeviceFacet::Filled(mem) = self.device else {
            return Err(TesseraError::invariant(format!(
                "download from device facet in state {}",
                self.device_state()
            )));
        };
        let (w, h, ch) = (self.width, self.height, self.channels);
        let mut host = match std::mem::take(&mut self.host) {
            HostFacet::Cleared(m) | HostFacet::Filled(m) => m,
            other => {
                let state = other.state_name();
                self.host = other;
                return Err(TesseraError::invariant(format!(
                    "download into host facet in state {state}"
                )));
            }
        };
        let res = host
            .rows_mut(w, h, ch)
            .and_then(|rows| device.read_to_host(mem.handle, rows));
        self.host = match res {
            Ok(()) => HostFacet::Filled(host),
            Err(_) => HostFacet::Cleared(host),
        };
        res
    }

    pub(crate) fn mark_host_filled(&mut self) -> TesseraResult<()> {
        match std::mem::take(&mut self.host) {
            HostFacet::Cleared(m) | HostFacet::Filled(m) => {
                self.host = HostFacet::Filled(m);
                Ok(())
            }
            mapped @ HostFacet::MappedFromDevice(_) => {
                self.host = mapped;
                Ok(())
            }
            HostFacet::Unallocated => Err(TesseraError::invariant(
                "host write completed without host memory",
            )),
        }
    }

    pub(crate) fn mark_device_filled(&mut self) -> TesseraResult<()> {
        match self.device {
            DeviceFacet::Cleared(m) | DeviceFacet::Filled(m) => {
                self.device = DeviceFacet::Filled(m);
                Ok(())
            }
            _ => Err(TesseraError::invariant(format!(
                "device write completed with device facet {}",
                self.device_state()
            ))),
        }
    }

    /// Readable host pixels at the logical size.
    pub fn host_view(&self) -> TesseraResult<HostView<'_>> {
        let (w, h, ch) = (self.width, self.height, self.channels);
        match &self.host {
            HostFacet::Filled(m) => m.view(w, h, ch),
            HostFacet::MappedFromDevice(m) => m.view(w, h, ch),
            other => Err(TesseraError::invariant(format!(
                "host read of buffer in state {}",
                other.state_name()
            ))),
        }
    }

    /// Writable host pixels at the logical size.
    pub fn host_target_mut(&mut self) -> TesseraResult<RowsMut<'_>> {
        let (w, h, ch) = (self.width, self.height, self.channels);
        match &mut self.host {
            HostFacet::Cleared(m) | HostFacet::Filled(m) => m.rows_mut(w, h, ch),
            HostFacet::MappedFromDevice(m) => m.rows_mut(w, h, ch),
            HostFacet::Unallocated => Err(TesseraError::invariant(
                "host write into buffer without host memory",
            )),
        }
    }

    pub fn device_handle(&self) -> TesseraResult<DeviceHandle> {
        match self.device {
            DeviceFacet::Cleared(m) | DeviceFacet::Filled(m) => Ok(m.handle),
            _ => Err(TesseraError::invariant(format!(
                "device access to buffer in state {}",
                self.device_state()
            ))),
        }
    }

    /// Check that facet states are mutually consistent.
    pub fn check_facets(&self) -> TesseraResult<()> {
        match (&self.host, &self.device) {
            (HostFacet::MappedFromDevice(m), DeviceFacet::MappedToHost(h)) => {
                if m.device.handle != *h {
                    return Err(TesseraError::invariant(format!(
                        "host facet maps {:?} but device facet lent {h:?}",
                        m.device.handle
                    )));
                }
            }
            (HostFacet::MappedFromDevice(_), _) | (_, DeviceFacet::MappedToHost(_)) => {
                return Err(TesseraError::invariant(format!(
                    "half-mapped buffer: host {} / device {}",
                    self.host_state(),
                    self.device_state()
                )));
            }
            _ => {
                if self.orig_host.is_some() {
                    return Err(TesseraError::invariant(
                        "saved host memory on an unmapped buffer",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Split into the allocations it holds, for return to the recycler.
    pub(crate) fn into_parts(self) -> BufferParts {
        let mut parts = BufferParts::default();
        match self.host {
            HostFacet::Cleared(m) | HostFacet::Filled(m) => parts.host = Some(m),
            HostFacet::MappedFromDevice(m) => parts.mapped = Some(m),
            HostFacet::Unallocated => {}
        }
        if let DeviceFacet::Cleared(m) | DeviceFacet::Filled(m) = self.device {
            parts.device = Some(m);
        }
        parts.orig_host = self.orig_host;
        parts
    }
}

/// Allocations released by a [`TmpBuffer`].
#[derive(Debug, Default)]
pub(crate) struct BufferParts {
    pub(crate) host: Option<HostMem>,
    pub(crate) device: Option<DeviceMem>,
    pub(crate) mapped: Option<MappedHost>,
    pub(crate) orig_host: Option<HostMem>,
}

#[cfg(test)]
#[path = "../../tests/unit/buffer/tmp_buffer.rs"]
mod tests;
