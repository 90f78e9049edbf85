use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::{Device, DeviceHandle, KernelArg, KernelLaunch};
use crate::exec::cache::CacheManager;
use crate::exec::recycler::BufferRecycler;
use crate::exec::work::{WorkPackage, WorkScheduler, WriteJob};
use crate::foundation::core::{ImageBuf, PixelRect};
use crate::foundation::error::TesseraResult;
use crate::graph::operation::{HostView, InputSet, KernelSpec, Operation, RowsMut, WriteCtx};

/// Cooperative cancellation signal shared with the caller and with running writes.
#[derive(Clone, Debug, Default)]
pub struct BreakFlag(Arc<AtomicBool>);

impl BreakFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Which of the two passes an execution is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum PassMode {
    /// Resolve reachability, execution sides and read counts. Nothing is written.
    Optimize,
    /// Perform buffer-backed writes.
    Exec,
}

/// How a write ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    /// The break flag was observed before a pass was dispatched.
    Cancelled,
}

/// Counters for one execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecStats {
    pub ops_reached: u64,
    pub writes: u64,
    pub host_writes: u64,
    pub device_writes: u64,
    pub cache_hits: u64,
    pub work_packages: u64,
    pub kernel_launches: u64,
    pub host_to_device_copies: u64,
    pub device_to_host_copies: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub releases: u64,
    pub cache_evictions: u64,
    /// Reused device allocations zeroed before a write cropped by the render border.
    pub device_clears: u64,
}

/// Everything one execution works against. Built per run; its lifetime brackets exactly one
/// execution.
pub struct ExecutionContext<'a> {
    pub id: Arc<str>,
    pub frame: u64,
    pub breaked: BreakFlag,
    pub manager: ExecutionManager,
    pub recycler: &'a mut BufferRecycler,
    pub cache: &'a mut CacheManager,
    pub scheduler: &'a mut WorkScheduler,
    pub device: Option<&'a mut dyn Device>,
    pub stats: ExecStats,
}

/// Drives single writes: crop, slicing, pass ordering, device synchronization.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionManager {
    mode: PassMode,
    render_border: Option<PixelRect>,
    threads: usize,
}

impl ExecutionManager {
    pub fn new(render_border: Option<PixelRect>, threads: usize) -> Self {
        Self {
            mode: PassMode::Optimize,
            render_border,
            threads: threads.max(1),
        }
    }

    pub fn mode(&self) -> PassMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PassMode) {
        tracing::trace!(?mode, "pass mode");
        self.mode = mode;
    }

    pub fn render_border(&self) -> Option<PixelRect> {
        self.render_border
    }

    /// Operation extent, cropped to the render border when one is set.
    pub fn write_rect(&self, op: &dyn Operation) -> PixelRect {
        let extent = op.extent();
        match self.render_border {
            Some(border) => extent.intersect(border),
            None => extent,
        }
    }

    /// Per-worker slices of `rect`.
    pub fn slices(&self, op: &dyn Operation, rect: PixelRect) -> Vec<PixelRect> {
        if op.single_threaded() && !rect.is_empty() {
            vec![rect]
        } else {
            rect.split_rows(self.threads)
        }
    }

    /// Run every pass of a CPU write into `target`.
    ///
    /// Passes are strictly ordered; from the second pass on, writes see a snapshot of the whole
    /// output as the previous pass left it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_on_host(
        &self,
        scheduler: &mut WorkScheduler,
        breaked: &BreakFlag,
        op: &dyn Operation,
        inputs: &InputSet<'_>,
        mut target: Option<RowsMut<'_>>,
        stats: &mut ExecStats,
    ) -> TesseraResult<WriteOutcome> {
        let rect = self.write_rect(op);
        let passes = op.write_passes();
        let mut pkgs: Vec<WorkPackage> = self
            .slices(op, rect)
            .into_iter()
            .map(|r| WorkPackage::new(r, passes))
            .collect();
        if pkgs.is_empty() {
            return Ok(WriteOutcome::Completed);
        }

        for pass in 0..passes {
            if breaked.is_set() {
                tracing::debug!(op = op.kind(), pass, "write cancelled");
                return Ok(WriteOutcome::Cancelled);
            }
            let snapshot: Option<ImageBuf> = match (&target, pass) {
                (Some(t), p) if p > 0 => Some(t.as_view().to_image()),
                _ => None,
            };
            let previous = snapshot.as_ref().map(HostView::of_image).transpose()?;

            for mut p in pkgs.drain(..) {
                p.reset_for_pass(pass)?;
                scheduler.schedule(p);
            }
            stats.work_packages += scheduler.pending() as u64;
            let job = OpWriteJob {
                op,
                inputs,
                previous,
                breaked,
            };
            pkgs = scheduler.finish(&job, target.as_mut().map(|t| t.reborrow()))?;
        }
        Ok(WriteOutcome::Completed)
    }

    /// Enqueue one kernel launch per pass into `output`, then drain the device queue.
    ///
    /// Launch arguments are the output, then `inputs` in socket order, then the kernel's params.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_on_device(
        &self,
        device: &mut dyn Device,
        breaked: &BreakFlag,
        op: &dyn Operation,
        kernel: &KernelSpec,
        output: DeviceHandle,
        inputs: &[KernelArg],
        stats: &mut ExecStats,
    ) -> TesseraResult<WriteOutcome> {
        let rect = self.write_rect(op);
        if rect.is_empty() {
            return Ok(WriteOutcome::Completed);
        }
        for pass in 0..op.write_passes() {
            if breaked.is_set() {
                tracing::debug!(op = op.kind(), pass, "device write cancelled");
                device.wait_queue_to_finish()?;
                return Ok(WriteOutcome::Cancelled);
            }
            let mut args = Vec::with_capacity(1 + inputs.len() + kernel.params.len());
            args.push(KernelArg::Output(output));
            args.extend(inputs.iter().cloned());
            args.extend(kernel.params.iter().cloned());
            device.enqueue_kernel(KernelLaunch {
                name: kernel.name.to_string(),
                rect,
                pass,
                args,
            })?;
            stats.kernel_launches += 1;
        }
        device.wait_queue_to_finish()?;
        Ok(WriteOutcome::Completed)
    }
}

struct OpWriteJob<'a> {
    op: &'a dyn Operation,
    inputs: &'a InputSet<'a>,
    previous: Option<HostView<'a>>,
    breaked: &'a BreakFlag,
}

impl WriteJob for OpWriteJob<'_> {
    fn run(&self, pkg: &WorkPackage, target: Option<RowsMut<'_>>) -> TesseraResult<()> {
        let mut ctx = WriteCtx::new(
            pkg.rect,
            pkg.pass,
            pkg.passes,
            target,
            self.inputs,
            self.previous,
            self.breaked,
        );
        self.op.write(&mut ctx)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/execution.rs"]
mod tests;
