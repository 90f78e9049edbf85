//! In-process reference accelerator.
//!
//! Allocations live in host memory with a padded row pitch, commands go through a FIFO queue
//! that only executes on drain, and kernels are plain closures registered by name. Every command
//! kind is counted so tests can assert exactly which transfers the engine issued.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::device::{Device, DeviceHandle, HostMapping, KernelArg, KernelLaunch};
use crate::foundation::core::PixelRect;
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::operation::{HostView, InputPixels, RowsMut};

/// Row pitch alignment, in elements.
const SIM_ROW_ALIGN: usize = 16;

/// Arguments visible to a simulated kernel.
pub struct SimKernelCtx<'a> {
    pub rect: PixelRect,
    pub pass: u32,
    pub output: RowsMut<'a>,
    /// Buffer and constant-element arguments, in launch order.
    pub inputs: Vec<InputPixels<'a>>,
    /// Scalar arguments, in launch order.
    pub params: Vec<KernelArg>,
}

impl SimKernelCtx<'_> {
    pub fn float_param(&self, i: usize) -> TesseraResult<f32> {
        match self.params.get(i) {
            Some(KernelArg::Float(v)) => Ok(*v),
            other => Err(TesseraError::device(format!(
                "kernel param {i} is not a float: {other:?}"
            ))),
        }
    }

    pub fn int_param(&self, i: usize) -> TesseraResult<i32> {
        match self.params.get(i) {
            Some(KernelArg::Int(v)) => Ok(*v),
            other => Err(TesseraError::device(format!(
                "kernel param {i} is not an int: {other:?}"
            ))),
        }
    }
}

pub type SimKernel = Arc<dyn Fn(&mut SimKernelCtx<'_>) -> TesseraResult<()> + Send + Sync>;

/// Command counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SimStats {
    pub allocs: u64,
    pub frees: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub reads_to_host: u64,
    pub writes_from_host: u64,
    pub kernels: u64,
    pub clears: u64,
    pub drains: u64,
}

struct SimAlloc {
    width: u32,
    height: u32,
    channels: u32,
    row_pitch: usize,
    host_mappable: bool,
    // `None` while mapped into host space.
    data: Option<Vec<f32>>,
}

enum Command {
    Upload {
        handle: DeviceHandle,
        image: Vec<f32>,
        width: u32,
        height: u32,
        channels: u32,
    },
    Unmap {
        handle: DeviceHandle,
        data: Vec<f32>,
    },
    Clear(DeviceHandle),
    Kernel(KernelLaunch),
}

pub struct SimDevice {
    next_handle: u64,
    allocs: HashMap<DeviceHandle, SimAlloc>,
    queue: VecDeque<Command>,
    kernels: HashMap<String, SimKernel>,
    stats: SimStats,
    compute_units: u32,
    max_size: (u32, u32),
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            allocs: HashMap::new(),
            queue: VecDeque::new(),
            kernels: HashMap::new(),
            stats: SimStats::default(),
            compute_units: 8,
            max_size: (16384, 16384),
        }
    }

    pub fn with_max_image_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = (width, height);
        self
    }

    /// A device reporting zero compute units never receives operations.
    pub fn with_compute_units(mut self, units: u32) -> Self {
        self.compute_units = units;
        self
    }

    pub fn register_kernel<F>(&mut self, name: &str, kernel: F)
    where
        F: Fn(&mut SimKernelCtx<'_>) -> TesseraResult<()> + Send + Sync + 'static,
    {
        self.kernels.insert(name.to_string(), Arc::new(kernel));
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn live_allocations(&self) -> usize {
        self.allocs.len()
    }

    pub fn mapped_allocations(&self) -> usize {
        self.allocs.values().filter(|a| a.data.is_none()).count()
    }

    /// Commands enqueued but not yet executed.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Copy of an allocation's visible pixels, tightly packed. Drains the queue first.
    pub fn snapshot(&mut self, handle: DeviceHandle) -> TesseraResult<Vec<f32>> {
        self.drain()?;
        let a = self.alloc_ref(handle)?;
        let data = a
            .data
            .as_deref()
            .ok_or_else(|| TesseraError::device(format!("{handle:?} is mapped")))?;
        let view = HostView::new(data, a.width, a.height, a.channels, a.row_pitch)?;
        Ok(view.to_image().data)
    }

    fn alloc_ref(&self, handle: DeviceHandle) -> TesseraResult<&SimAlloc> {
        self.allocs
            .get(&handle)
            .ok_or_else(|| TesseraError::device(format!("unknown device handle {handle:?}")))
    }

    fn alloc_mut(&mut self, handle: DeviceHandle) -> TesseraResult<&mut SimAlloc> {
        self.allocs
            .get_mut(&handle)
            .ok_or_else(|| TesseraError::device(format!("unknown device handle {handle:?}")))
    }

    fn drain(&mut self) -> TesseraResult<()> {
        while let Some(cmd) = self.queue.pop_front() {
            match cmd {
                Command::Upload {
                    handle,
                    image,
                    width,
                    height,
                    channels,
                } => {
                    let a = self.alloc_mut(handle)?;
                    let pitch = a.row_pitch;
                    let data = a.data.as_mut().ok_or_else(|| {
                        TesseraError::device(format!("upload into mapped {handle:?}"))
                    })?;
                    let row = (width as usize) * (channels as usize);
                    for y in 0..height as usize {
                        data[y * pitch..y * pitch + row]
                            .copy_from_slice(&image[y * row..(y + 1) * row]);
                    }
                }
                Command::Unmap { handle, data } => {
                    let a = self.alloc_mut(handle)?;
                    a.data = Some(data);
                }
                Command::Clear(handle) => {
                    let a = self.alloc_mut(handle)?;
                    let data = a.data.as_mut().ok_or_else(|| {
                        TesseraError::device(format!("clear of mapped {handle:?}"))
                    })?;
                    data.fill(0.0);
                }
                Command::Kernel(launch) => self.run_kernel(launch)?,
            }
        }
        Ok(())
    }

    fn run_kernel(&mut self, launch: KernelLaunch) -> TesseraResult<()> {
        let kernel = self.kernels.get(&launch.name).cloned().ok_or_else(|| {
            TesseraError::device(format!("no kernel registered as '{}'", launch.name))
        })?;
        let out = launch
            .args
            .iter()
            .find_map(|a| match a {
                KernelArg::Output(h) => Some(*h),
                _ => None,
            })
            .ok_or_else(|| TesseraError::device("kernel launch without an output"))?;

        let a = self.alloc_mut(out)?;
        let dims = (a.width, a.height, a.channels, a.row_pitch);
        let mut data = a
            .data
            .take()
            .ok_or_else(|| TesseraError::device(format!("kernel output {out:?} is mapped")))?;

        let result = launch_on(&self.allocs, &kernel, &launch, out, &mut data, dims);

        if let Some(a) = self.allocs.get_mut(&out) {
            a.data = Some(data);
        }
        result
    }
}

fn launch_on(
    allocs: &HashMap<DeviceHandle, SimAlloc>,
    kernel: &SimKernel,
    launch: &KernelLaunch,
    out: DeviceHandle,
    data: &mut [f32],
    (width, height, channels, row_pitch): (u32, u32, u32, usize),
) -> TesseraResult<()> {
    let mut inputs = Vec::new();
    let mut params = Vec::new();
    for arg in &launch.args {
        match arg {
            KernelArg::Output(_) => {}
            KernelArg::Input(h) => {
                if *h == out {
                    return Err(TesseraError::device(format!(
                        "kernel '{}' reads its own output {h:?}",
                        launch.name
                    )));
                }
                let a = allocs
                    .get(h)
                    .ok_or_else(|| TesseraError::device(format!("unknown device handle {h:?}")))?;
                let d = a
                    .data
                    .as_deref()
                    .ok_or_else(|| TesseraError::device(format!("kernel input {h:?} is mapped")))?;
                inputs.push(InputPixels::Host(HostView::new(
                    d,
                    a.width,
                    a.height,
                    a.channels,
                    a.row_pitch,
                )?));
            }
            KernelArg::Elem(v) => inputs.push(InputPixels::SingleElement(v.as_slice())),
            KernelArg::Float(_) | KernelArg::Int(_) => params.push(arg.clone()),
        }
    }
    let output = RowsMut::new(data, width, height, channels, row_pitch)?;
    let mut ctx = SimKernelCtx {
        rect: launch.rect,
        pass: launch.pass,
        output,
        inputs,
        params,
    };
    kernel(&mut ctx)
}

impl Device for SimDevice {
    fn alloc(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
        host_mappable: bool,
    ) -> TesseraResult<DeviceHandle> {
        if width > self.max_size.0 || height > self.max_size.1 {
            return Err(TesseraError::device(format!(
                "{width}x{height} exceeds device image limit {}x{}",
                self.max_size.0, self.max_size.1
            )));
        }
        let row = (width as usize) * (channels as usize);
        let row_pitch = row.div_ceil(SIM_ROW_ALIGN).max(1) * SIM_ROW_ALIGN;
        let handle = DeviceHandle(self.next_handle);
        self.next_handle += 1;
        self.allocs.insert(
            handle,
            SimAlloc {
                width,
                height,
                channels,
                row_pitch,
                host_mappable,
                data: Some(vec![0.0; row_pitch * height as usize]),
            },
        );
        self.stats.allocs += 1;
        Ok(handle)
    }

    fn free(&mut self, handle: DeviceHandle) -> TesseraResult<()> {
        self.drain()?;
        let a = self.alloc_ref(handle)?;
        if a.data.is_none() {
            return Err(TesseraError::device(format!("freeing mapped {handle:?}")));
        }
        self.allocs.remove(&handle);
        self.stats.frees += 1;
        Ok(())
    }

    fn map_to_host(&mut self, handle: DeviceHandle) -> TesseraResult<HostMapping> {
        self.drain()?;
        let a = self.alloc_mut(handle)?;
        if !a.host_mappable {
            return Err(TesseraError::device(format!(
                "{handle:?} was not allocated host-mappable"
            )));
        }
        let row_pitch = a.row_pitch;
        let data = a
            .data
            .take()
            .ok_or_else(|| TesseraError::device(format!("{handle:?} is already mapped")))?;
        self.stats.maps += 1;
        Ok(HostMapping { data, row_pitch })
    }

    fn unmap(&mut self, handle: DeviceHandle, mapping: HostMapping) -> TesseraResult<()> {
        let a = self.alloc_ref(handle)?;
        if a.data.is_some() {
            return Err(TesseraError::device(format!("{handle:?} is not mapped")));
        }
        if mapping.row_pitch != a.row_pitch
            || mapping.data.len() != a.row_pitch * a.height as usize
        {
            return Err(TesseraError::device(format!(
                "mapping returned to {handle:?} does not match its allocation"
            )));
        }
        self.queue.push_back(Command::Unmap {
            handle,
            data: mapping.data,
        });
        self.stats.unmaps += 1;
        Ok(())
    }

    fn read_to_host(&mut self, handle: DeviceHandle, mut dst: RowsMut<'_>) -> TesseraResult<()> {
        self.drain()?;
        let a = self.alloc_ref(handle)?;
        if a.channels != dst.channels() {
            return Err(TesseraError::device(format!(
                "read of {}-channel {handle:?} into {}-channel host memory",
                a.channels,
                dst.channels()
            )));
        }
        let src = a
            .data
            .as_deref()
            .ok_or_else(|| TesseraError::device(format!("read from mapped {handle:?}")))?;
        let n = (dst.width().min(a.width) as usize) * (a.channels as usize);
        let rows = dst.y1().min(a.height);
        for y in dst.y0()..rows {
            let s = (y as usize) * a.row_pitch;
            dst.row_mut(y)[..n].copy_from_slice(&src[s..s + n]);
        }
        self.stats.reads_to_host += 1;
        Ok(())
    }

    fn write_from_host(&mut self, handle: DeviceHandle, src: HostView<'_>) -> TesseraResult<()> {
        let a = self.alloc_ref(handle)?;
        if a.channels != src.channels() || src.width() > a.width || src.height() > a.height {
            return Err(TesseraError::device(format!(
                "{}x{}x{} host image does not fit {handle:?}",
                src.width(),
                src.height(),
                src.channels()
            )));
        }
        let image = src.to_image();
        self.queue.push_back(Command::Upload {
            handle,
            image: image.data,
            width: image.width,
            height: image.height,
            channels: image.channels,
        });
        self.stats.writes_from_host += 1;
        Ok(())
    }

    fn clear(&mut self, handle: DeviceHandle) -> TesseraResult<()> {
        self.alloc_ref(handle)?;
        self.queue.push_back(Command::Clear(handle));
        self.stats.clears += 1;
        Ok(())
    }

    fn enqueue_kernel(&mut self, launch: KernelLaunch) -> TesseraResult<()> {
        if !self.kernels.contains_key(&launch.name) {
            return Err(TesseraError::device(format!(
                "no kernel registered as '{}'",
                launch.name
            )));
        }
        self.queue.push_back(Command::Kernel(launch));
        self.stats.kernels += 1;
        Ok(())
    }

    fn wait_queue_to_finish(&mut self) -> TesseraResult<()> {
        self.drain()?;
        self.stats.drains += 1;
        Ok(())
    }

    fn compute_units(&self) -> u32 {
        self.compute_units
    }

    fn max_image_size(&self) -> (u32, u32) {
        self.max_size
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/sim.rs"]
mod tests;
