use std::collections::BTreeMap;
use std::sync::Arc;

use crate::device::Device;
use crate::exec::buffer_manager::BufferManager;
use crate::exec::cache::{CACHE_EVICT_STEP_BYTES, CacheManager};
use crate::exec::execution::{
    BreakFlag, ExecStats, ExecutionContext, ExecutionManager, PassMode, WriteOutcome,
};
use crate::exec::recycler::{AuditReport, BufferRecycler, RecyclerOpts};
use crate::exec::work::WorkScheduler;
use crate::foundation::core::{ImageBuf, PixelRect};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::OperationKey;

/// Options controlling a long-lived [`Engine`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineOpts {
    /// Byte ceiling of the operation cache. Must cover at least one eviction step.
    pub max_cache_bytes: usize,
    /// CPU fan-out width. `1` runs every write on the calling thread.
    pub worker_threads: usize,
    /// Pooling policy of the buffer recycler.
    pub recycler: RecyclerOpts,
    /// Run the recycle-conservation audit after every clean execution.
    pub audit: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_cache_bytes: 512 * 1024 * 1024,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            recycler: RecyclerOpts::default(),
            audit: true,
        }
    }
}

impl EngineOpts {
    pub fn validate(&self) -> TesseraResult<()> {
        if self.worker_threads == 0 {
            return Err(TesseraError::validation("worker_threads must be >= 1"));
        }
        if self.max_cache_bytes < CACHE_EVICT_STEP_BYTES {
            return Err(TesseraError::validation(format!(
                "max_cache_bytes must be >= {CACHE_EVICT_STEP_BYTES}"
            )));
        }
        let ratio = self.recycler.max_oversize_ratio;
        if ratio.is_nan() || ratio < 1.0 {
            return Err(TesseraError::validation(
                "recycler.max_oversize_ratio must be >= 1.0",
            ));
        }
        Ok(())
    }
}

/// Inputs of one top-level execution.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Tags every allocation made during the run; named by leak reports.
    pub execution_id: String,
    pub outputs: Vec<OpId>,
    /// Viewer crop applied to every write.
    pub render_border: Option<PixelRect>,
    pub frame: u64,
}

impl ExecutionRequest {
    pub fn new(execution_id: impl Into<String>, outputs: Vec<OpId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            outputs,
            render_border: None,
            frame: 0,
        }
    }

    pub fn with_frame(mut self, frame: u64) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_render_border(mut self, border: PixelRect) -> Self {
        self.render_border = Some(border);
        self
    }
}

/// Result of one execution.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub frame: u64,
    /// The break flag stopped the run. No outputs are reported and the audit is skipped.
    pub cancelled: bool,
    /// Host copies of the requested outputs. Sinks without pixels are absent.
    #[serde(skip)]
    pub outputs: BTreeMap<OpId, ImageBuf>,
    pub stats: ExecStats,
    pub audit: Option<AuditReport>,
    /// Cache entries evicted after the run, oldest first.
    pub evicted: Vec<OperationKey>,
}

impl ExecutionReport {
    pub fn output(&self, id: OpId) -> Option<&ImageBuf> {
        self.outputs.get(&id)
    }
}

/// Long-lived execution engine. Owns the recycler, the cache and the worker pool, which all
/// outlive individual executions.
pub struct Engine {
    opts: EngineOpts,
    recycler: BufferRecycler,
    cache: CacheManager,
    scheduler: WorkScheduler,
    device: Option<Box<dyn Device>>,
    breaked: BreakFlag,
}

impl Engine {
    pub fn new(opts: EngineOpts) -> TesseraResult<Self> {
        opts.validate()?;
        Ok(Self {
            recycler: BufferRecycler::new(opts.recycler),
            cache: CacheManager::new(opts.max_cache_bytes)?,
            scheduler: WorkScheduler::new(opts.worker_threads)?,
            device: None,
            breaked: BreakFlag::new(),
            opts,
        })
    }

    /// Engine with an attached accelerator.
    pub fn with_device(opts: EngineOpts, device: Box<dyn Device>) -> TesseraResult<Self> {
        let mut engine = Self::new(opts)?;
        engine.device = Some(device);
        Ok(engine)
    }

    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    /// Cancellation flag observed by running executions. Reset when an execution returns.
    pub fn break_flag(&self) -> BreakFlag {
        self.breaked.clone()
    }

    pub fn recycler(&self) -> &BufferRecycler {
        &self.recycler
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn device(&self) -> Option<&dyn Device> {
        self.device.as_deref()
    }

    /// Drop every cache entry, persistent ones included.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Run one execution: an optimize pass over everything reachable from the requested
    /// outputs, then an exec pass writing each reached operation at most once.
    #[tracing::instrument(
        skip(self, graph, req),
        fields(execution_id = %req.execution_id, frame = req.frame, outputs = req.outputs.len())
    )]
    pub fn execute(
        &mut self,
        graph: &OperationGraph,
        req: &ExecutionRequest,
    ) -> TesseraResult<ExecutionReport> {
        if req.execution_id.is_empty() {
            return Err(TesseraError::validation("execution_id must not be empty"));
        }
        graph.validate()?;
        graph.validate_outputs(&req.outputs)?;
        let mut outputs: Vec<OpId> = Vec::with_capacity(req.outputs.len());
        for &o in &req.outputs {
            if !outputs.contains(&o) {
                outputs.push(o);
            }
        }

        self.cache.begin_frame(req.frame);
        let threads = self.scheduler.threads();
        let mut ctx = ExecutionContext {
            id: Arc::from(req.execution_id.as_str()),
            frame: req.frame,
            breaked: self.breaked.clone(),
            manager: ExecutionManager::new(req.render_border, threads),
            recycler: &mut self.recycler,
            cache: &mut self.cache,
            scheduler: &mut self.scheduler,
            device: self.device.as_deref_mut().map(|d| d as &mut dyn Device),
            stats: ExecStats::default(),
        };
        let mut bm = BufferManager::new(graph);

        let outcome = run_passes(&mut bm, &mut ctx, graph, &outputs);
        let images = match settle(&mut bm, &mut ctx, outcome) {
            Ok(images) => images,
            Err(err) => {
                self.breaked.clear();
                return Err(err);
            }
        };
        let mut stats = ctx.stats;
        drop(ctx);

        let evicted = self.cache.check_cache();
        stats.cache_evictions = evicted.len() as u64;
        let cancelled = images.is_none();
        let audit = if !cancelled && self.opts.audit {
            Some(self.recycler.audit()?)
        } else {
            None
        };
        self.breaked.clear();

        Ok(ExecutionReport {
            execution_id: req.execution_id.clone(),
            frame: req.frame,
            cancelled,
            outputs: images.unwrap_or_default(),
            stats,
            audit,
            evicted,
        })
    }

    /// Destroy pooled memory and stop the worker pool.
    pub fn shutdown(mut self) -> TesseraResult<()> {
        let device = self.device.as_deref_mut().map(|d| d as &mut dyn Device);
        self.recycler.clear(device)?;
        self.cache.clear();
        self.scheduler.stop();
        Ok(())
    }
}

/// Close out the exec pass. Whatever way it ended, no buffer stays checked out of the recycler.
fn settle(
    bm: &mut BufferManager,
    ctx: &mut ExecutionContext<'_>,
    outcome: TesseraResult<Option<BTreeMap<OpId, ImageBuf>>>,
) -> TesseraResult<Option<BTreeMap<OpId, ImageBuf>>> {
    let err = match outcome {
        Ok(Some(images)) => match bm.check_released() {
            Ok(()) => return Ok(Some(images)),
            Err(err) => err,
        },
        Ok(None) => {
            let returned = bm.abandon(ctx)?;
            tracing::debug!(returned, "execution cancelled");
            return Ok(None);
        }
        Err(err) => err,
    };
    if let Err(abandon_err) = bm.abandon(ctx) {
        tracing::warn!(error = %abandon_err, "failed to return buffers of a failed execution");
    }
    Err(err)
}

fn run_passes(
    bm: &mut BufferManager,
    ctx: &mut ExecutionContext<'_>,
    graph: &OperationGraph,
    outputs: &[OpId],
) -> TesseraResult<Option<BTreeMap<OpId, ImageBuf>>> {
    bm.optimize(ctx, graph, outputs)?;
    ctx.manager.set_mode(PassMode::Exec);
    for &o in outputs {
        if bm.read_or_request_write(ctx, graph, o)? == WriteOutcome::Cancelled {
            return Ok(None);
        }
    }
    let mut images = BTreeMap::new();
    for &o in outputs {
        if let Some(img) = bm.collect_output(ctx, graph, o)? {
            images.insert(o, img);
        }
    }
    Ok(Some(images))
}

#[cfg(test)]
#[path = "../../tests/unit/exec/engine.rs"]
mod tests;
