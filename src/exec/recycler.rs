use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::buffer::tmp_buffer::BufferParts;
use crate::buffer::{AllocId, DeviceMem, HostMem, MappedHost, TmpBuffer};
use crate::device::Device;
use crate::foundation::error::{TesseraError, TesseraResult};

/// Allocation shape a pooled buffer is filed under.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum RecycleClass {
    Host,
    Device,
    /// Device memory allocated with host-mapping capability, currently unmapped.
    DeviceHostAlloc,
    /// Host-mappable device memory currently mapped into host space.
    DeviceMapped,
}

impl RecycleClass {
    pub const ALL: [Self; 4] = [
        Self::Host,
        Self::Device,
        Self::DeviceHostAlloc,
        Self::DeviceMapped,
    ];

    fn idx(self) -> usize {
        match self {
            Self::Host => 0,
            Self::Device => 1,
            Self::DeviceHostAlloc => 2,
            Self::DeviceMapped => 3,
        }
    }

    fn is_device(self) -> bool {
        self != Self::Host
    }
}

/// Memory handed out by, and returned to, the recycler.
#[derive(Debug)]
pub enum Recyclable {
    Host(HostMem),
    Device(DeviceMem),
    DeviceHostAlloc(DeviceMem),
    DeviceMapped(MappedHost),
}

impl Recyclable {
    pub fn class(&self) -> RecycleClass {
        match self {
            Self::Host(_) => RecycleClass::Host,
            Self::Device(_) => RecycleClass::Device,
            Self::DeviceHostAlloc(_) => RecycleClass::DeviceHostAlloc,
            Self::DeviceMapped(_) => RecycleClass::DeviceMapped,
        }
    }

    /// `None` only for host memory the recycler does not own.
    pub fn id(&self) -> Option<AllocId> {
        match self {
            Self::Host(m) => m.id,
            Self::Device(m) | Self::DeviceHostAlloc(m) => Some(m.id),
            Self::DeviceMapped(m) => Some(m.device.id),
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Host(m) => m.bytes(),
            Self::Device(m) | Self::DeviceHostAlloc(m) => m.bytes(),
            Self::DeviceMapped(m) => m.device.bytes(),
        }
    }

    /// Capacity in the unit best-fit compares against a request: elements for host memory,
    /// pixels for device memory. `None` when the allocation cannot hold the request at all.
    fn capacity_for(&self, width: u32, height: u32, channels: u32) -> Option<u64> {
        let device = match self {
            Self::Host(m) => {
                let need = u64::from(width) * u64::from(height) * u64::from(channels);
                let cap = m.capacity() as u64;
                return (cap >= need).then_some(cap);
            }
            Self::Device(m) | Self::DeviceHostAlloc(m) => m,
            Self::DeviceMapped(m) => &m.device,
        };
        device
            .fits(width, height, channels)
            .then(|| u64::from(device.width) * u64::from(device.height))
    }

    /// Attach to the matching facet of `buf`.
    pub(crate) fn attach_to(self, buf: &mut TmpBuffer) -> TesseraResult<()> {
        match self {
            Self::Host(m) => buf.attach_host(m, false),
            Self::Device(m) | Self::DeviceHostAlloc(m) => buf.attach_device(m),
            Self::DeviceMapped(m) => buf.attach_mapped(m),
        }
    }
}

fn request_units(class: RecycleClass, width: u32, height: u32, channels: u32) -> u64 {
    let px = u64::from(width) * u64::from(height);
    if class.is_device() {
        px
    } else {
        px * u64::from(channels)
    }
}

/// Index of the smallest candidate whose capacity is at least `req` and at most
/// `ratio * req`. Stops early on an exact fit.
pub(crate) fn best_fit<T>(
    pool: &[T],
    req: u64,
    ratio: f64,
    capacity: impl Fn(&T) -> Option<u64>,
) -> Option<usize> {
    let bound = (req as f64) * ratio;
    let mut best: Option<(usize, u64)> = None;
    for (i, entry) in pool.iter().enumerate() {
        let Some(cap) = capacity(entry) else { continue };
        if cap < req || (cap as f64) > bound {
            continue;
        }
        if cap == req {
            return Some(i);
        }
        if best.is_none_or(|(_, b)| cap < b) {
            best = Some((i, cap));
        }
    }
    best.map(|(i, _)| i)
}

/// Recycler configuration.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RecyclerOpts {
    /// Largest pooled-capacity to request-size ratio `take` accepts.
    pub max_oversize_ratio: f64,
    /// Pooled bytes above which returned memory is destroyed instead of kept.
    pub max_retained_bytes: usize,
}

impl Default for RecyclerOpts {
    fn default() -> Self {
        Self {
            max_oversize_ratio: 5.0,
            max_retained_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecyclerStats {
    pub fresh_allocations: u64,
    pub fresh_bytes: u64,
    pub reuses: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub destroyed: u64,
    pub retained_entries: usize,
    pub retained_bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AllocKind {
    Host,
    Device { host_mappable: bool },
}

#[derive(Clone, Debug)]
struct AllocRecord {
    kind: AllocKind,
    bytes: usize,
    execution_id: Arc<str>,
    destroyed: bool,
}

/// Result of a clean-teardown consistency check.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AuditReport {
    pub created: usize,
    pub destroyed: usize,
    pub pooled: usize,
    pub pooled_bytes: usize,
}

/// Pooled host/device memory, reused by approximate shape.
///
/// Only the orchestrating thread touches the recycler; it is never shared with workers.
pub struct BufferRecycler {
    opts: RecyclerOpts,
    stats: RecyclerStats,
    next_id: u64,
    pools: [Vec<Recyclable>; 4],
    pooled_ids: BTreeSet<AllocId>,
    created: BTreeMap<AllocId, AllocRecord>,
}

impl BufferRecycler {
    pub fn new(opts: RecyclerOpts) -> Self {
        Self {
            opts,
            stats: RecyclerStats::default(),
            next_id: 1,
            pools: Default::default(),
            pooled_ids: BTreeSet::new(),
            created: BTreeMap::new(),
        }
    }

    pub fn opts(&self) -> RecyclerOpts {
        self.opts
    }

    pub fn stats(&self) -> RecyclerStats {
        self.stats
    }

    pub fn pooled(&self, class: RecycleClass) -> usize {
        self.pools[class.idx()].len()
    }

    pub fn is_pooled(&self, id: AllocId) -> bool {
        self.pooled_ids.contains(&id)
    }

    /// Allocations made so far and not destroyed.
    pub fn live_allocations(&self) -> usize {
        self.created.values().filter(|r| !r.destroyed).count()
    }

    fn register(&mut self, kind: AllocKind, bytes: usize, execution_id: &Arc<str>) -> AllocId {
        let id = AllocId(self.next_id);
        self.next_id += 1;
        self.created.insert(
            id,
            AllocRecord {
                kind,
                bytes,
                execution_id: Arc::clone(execution_id),
                destroyed: false,
            },
        );
        self.stats.fresh_allocations += 1;
        self.stats.fresh_bytes += bytes as u64;
        id
    }

    fn pop(&mut self, class: RecycleClass, width: u32, height: u32, channels: u32) -> Option<Recyclable> {
        let req = request_units(class, width, height, channels);
        let pool = &mut self.pools[class.idx()];
        let i = best_fit(pool, req, self.opts.max_oversize_ratio, |e| {
            e.capacity_for(width, height, channels)
        })?;
        let entry = pool.swap_remove(i);
        if let Some(id) = entry.id() {
            self.pooled_ids.remove(&id);
        }
        self.stats.retained_entries = self.stats.retained_entries.saturating_sub(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(entry.bytes());
        Some(entry)
    }

    /// Hand out memory of `class` able to hold `width x height x channels`.
    ///
    /// Returns `true` alongside the memory when accelerator work was enqueued, in which case the
    /// caller must drain the device queue before relying on the contents.
    pub fn take(
        &mut self,
        class: RecycleClass,
        width: u32,
        height: u32,
        channels: u32,
        execution_id: &Arc<str>,
        device: Option<&mut dyn Device>,
    ) -> TesseraResult<(Recyclable, bool)> {
        if let Some(mut entry) = self.pop(class, width, height, channels) {
            if let Recyclable::Host(m) = &mut entry {
                m.relayout(width, height, channels)?;
            }
            self.stats.reuses += 1;
            return Ok((entry, false));
        }

        if class == RecycleClass::Host {
            let bytes = (width as usize) * (height as usize) * (channels as usize) * 4;
            let id = self.register(AllocKind::Host, bytes, execution_id);
            tracing::trace!(%id, bytes, "fresh host allocation");
            return Ok((
                Recyclable::Host(HostMem::owned(id, width, height, channels)),
                false,
            ));
        }

        let device = device.ok_or_else(|| {
            TesseraError::invariant(format!("{class:?} memory requested without a device"))
        })?;

        match class {
            RecycleClass::DeviceMapped => {
                if let Some(Recyclable::DeviceHostAlloc(m)) =
                    self.pop(RecycleClass::DeviceHostAlloc, width, height, channels)
                {
                    let mapped = MappedHost::map(device, m)?;
                    self.stats.reuses += 1;
                    self.stats.maps += 1;
                    return Ok((Recyclable::DeviceMapped(mapped), false));
                }
            }
            RecycleClass::DeviceHostAlloc => {
                if let Some(Recyclable::DeviceMapped(m)) =
                    self.pop(RecycleClass::DeviceMapped, width, height, channels)
                {
                    let mem = m.unmap(device)?;
                    self.stats.reuses += 1;
                    self.stats.unmaps += 1;
                    return Ok((Recyclable::DeviceHostAlloc(mem), true));
                }
            }
            _ => {}
        }

        let host_mappable = class != RecycleClass::Device;
        let handle = device.alloc(width, height, channels, host_mappable)?;
        let bytes = (width as usize) * (height as usize) * (channels as usize) * 4;
        let id = self.register(AllocKind::Device { host_mappable }, bytes, execution_id);
        tracing::debug!(%id, ?class, bytes, "fresh device allocation");
        let mem = DeviceMem {
            id,
            handle,
            width,
            height,
            channels,
            host_mappable,
        };
        let entry = match class {
            RecycleClass::Device => Recyclable::Device(mem),
            RecycleClass::DeviceHostAlloc => Recyclable::DeviceHostAlloc(mem),
            _ => {
                self.stats.maps += 1;
                Recyclable::DeviceMapped(MappedHost::map(device, mem)?)
            }
        };
        Ok((entry, false))
    }

    /// Take memory and attach it to the matching facet of `buf`.
    pub fn take_into(
        &mut self,
        buf: &mut TmpBuffer,
        class: RecycleClass,
        device: Option<&mut dyn Device>,
    ) -> TesseraResult<bool> {
        let exec_id = Arc::clone(&buf.execution_id);
        let (entry, enqueued) =
            self.take(class, buf.width, buf.height, buf.channels, &exec_id, device)?;
        entry.attach_to(buf)?;
        Ok(enqueued)
    }

    /// Decompose `buf` into recyclable entries and pool them.
    ///
    /// Host memory the recycler does not own is dropped.
    pub fn give(&mut self, buf: TmpBuffer, mut device: Option<&mut dyn Device>) -> TesseraResult<()> {
        buf.check_facets()?;
        let BufferParts {
            host,
            device: dev_mem,
            mapped,
            orig_host,
        } = buf.into_parts();

        for m in [host, orig_host].into_iter().flatten() {
            if m.is_recyclable() {
                self.give_entry(Recyclable::Host(m), crate::device::reborrow(&mut device))?;
            }
        }
        if let Some(m) = dev_mem {
            let entry = if m.host_mappable {
                Recyclable::DeviceHostAlloc(m)
            } else {
                Recyclable::Device(m)
            };
            self.give_entry(entry, crate::device::reborrow(&mut device))?;
        }
        if let Some(m) = mapped {
            self.give_entry(Recyclable::DeviceMapped(m), device)?;
        }
        Ok(())
    }

    /// Pool a single entry. Already-pooled allocations are ignored.
    pub fn give_entry(
        &mut self,
        entry: Recyclable,
        device: Option<&mut dyn Device>,
    ) -> TesseraResult<()> {
        let id = entry
            .id()
            .ok_or_else(|| TesseraError::invariant("pooling host memory the recycler does not own"))?;
        let record = self
            .created
            .get(&id)
            .ok_or_else(|| TesseraError::invariant(format!("{id} was not created by this recycler")))?;
        if record.destroyed {
            return Err(TesseraError::invariant(format!("{id} returned after destruction")));
        }
        check_class(id, record.kind, entry.class())?;
        if self.pooled_ids.contains(&id) {
            return Ok(());
        }

        let bytes = entry.bytes();
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_retained_bytes {
            tracing::trace!(%id, bytes, "retention budget exceeded, destroying");
            return self.destroy(entry, device);
        }

        self.pooled_ids.insert(id);
        self.pools[entry.class().idx()].push(entry);
        self.stats.retained_entries += 1;
        self.stats.retained_bytes += bytes;
        Ok(())
    }

    fn destroy(&mut self, entry: Recyclable, device: Option<&mut dyn Device>) -> TesseraResult<()> {
        let id = entry
            .id()
            .ok_or_else(|| TesseraError::invariant("destroying host memory the recycler does not own"))?;
        match entry {
            Recyclable::Host(m) => drop(m),
            Recyclable::Device(m) | Recyclable::DeviceHostAlloc(m) => {
                let device = device.ok_or_else(|| {
                    TesseraError::invariant(format!("{id} destroyed without a device"))
                })?;
                device.free(m.handle)?;
            }
            Recyclable::DeviceMapped(m) => {
                let device = device.ok_or_else(|| {
                    TesseraError::invariant(format!("{id} destroyed without a device"))
                })?;
                let mem = m.unmap(&mut *device)?;
                device.free(mem.handle)?;
            }
        }
        if let Some(r) = self.created.get_mut(&id) {
            r.destroyed = true;
        }
        self.stats.destroyed += 1;
        Ok(())
    }

    /// Destroy every pooled allocation.
    pub fn clear(&mut self, mut device: Option<&mut dyn Device>) -> TesseraResult<()> {
        for class in RecycleClass::ALL {
            let entries = std::mem::take(&mut self.pools[class.idx()]);
            for entry in entries {
                if let Some(id) = entry.id() {
                    self.pooled_ids.remove(&id);
                }
                self.destroy(entry, crate::device::reborrow(&mut device))?;
            }
        }
        self.stats.retained_entries = 0;
        self.stats.retained_bytes = 0;
        Ok(())
    }

    /// Check that every allocation is either destroyed or pooled exactly once in a class
    /// matching its shape, and that every pooled entry is known.
    pub fn audit(&self) -> TesseraResult<AuditReport> {
        let mut seen = BTreeMap::<AllocId, usize>::new();
        let mut report = AuditReport::default();
        for class in RecycleClass::ALL {
            for entry in &self.pools[class.idx()] {
                let id = entry.id().ok_or_else(|| {
                    TesseraError::invariant(format!("{class:?} pool holds unowned host memory"))
                })?;
                let record = self.created.get(&id).ok_or_else(|| {
                    TesseraError::invariant(format!("{class:?} pool holds unknown {id}"))
                })?;
                if record.destroyed {
                    return Err(TesseraError::invariant(format!(
                        "{class:?} pool holds destroyed {id}"
                    )));
                }
                check_class(id, record.kind, class)?;
                *seen.entry(id).or_default() += 1;
                report.pooled += 1;
                report.pooled_bytes += record.bytes;
            }
        }
        for (id, record) in &self.created {
            report.created += 1;
            if record.destroyed {
                report.destroyed += 1;
                continue;
            }
            match seen.get(id).copied().unwrap_or(0) {
                1 => {}
                0 => {
                    return Err(TesseraError::invariant(format!(
                        "{id} ({} bytes, created by execution '{}') leaked",
                        record.bytes, record.execution_id
                    )));
                }
                n => {
                    return Err(TesseraError::invariant(format!(
                        "{id} is pooled {n} times"
                    )));
                }
            }
        }
        Ok(report)
    }
}

fn check_class(id: AllocId, kind: AllocKind, class: RecycleClass) -> TesseraResult<()> {
    let ok = match kind {
        AllocKind::Host => class == RecycleClass::Host,
        AllocKind::Device {
            host_mappable: false,
        } => class == RecycleClass::Device,
        AllocKind::Device {
            host_mappable: true,
        } => matches!(
            class,
            RecycleClass::DeviceHostAlloc | RecycleClass::DeviceMapped
        ),
    };
    if !ok {
        return Err(TesseraError::invariant(format!(
            "{id} ({kind:?}) filed under {class:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/exec/recycler.rs"]
mod tests;
