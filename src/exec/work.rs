use std::sync::atomic::{AtomicU8, Ordering};

use rayon::prelude::*;

use crate::foundation::core::PixelRect;
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::operation::RowsMut;

/// Lifecycle of one [`WorkPackage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkState {
    Pending = 0,
    Running = 1,
    Finished = 2,
}

impl WorkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

/// One scheduled unit of write work over a sub-rectangle.
///
/// The state is set by the worker and observed by the dispatching thread.
#[derive(Debug)]
pub struct WorkPackage {
    pub rect: PixelRect,
    pub pass: u32,
    pub passes: u32,
    state: AtomicU8,
}

impl WorkPackage {
    pub fn new(rect: PixelRect, passes: u32) -> Self {
        Self {
            rect,
            pass: 0,
            passes,
            state: AtomicU8::new(WorkState::Pending as u8),
        }
    }

    pub fn state(&self) -> WorkState {
        WorkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == WorkState::Finished
    }

    fn transition(&self, from: WorkState, to: WorkState) -> TesseraResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|cur| {
                TesseraError::invariant(format!(
                    "work package {:?} pass {} moved {from:?} -> {to:?} from {:?}",
                    self.rect,
                    self.pass,
                    WorkState::from_u8(cur)
                ))
            })
    }

    pub(crate) fn start(&self) -> TesseraResult<()> {
        self.transition(WorkState::Pending, WorkState::Running)
    }

    pub(crate) fn complete(&self) -> TesseraResult<()> {
        self.transition(WorkState::Running, WorkState::Finished)
    }

    /// Prepare for `pass`. The first pass needs a fresh package, later passes a finished one.
    pub fn reset_for_pass(&mut self, pass: u32) -> TesseraResult<()> {
        if pass >= self.passes {
            return Err(TesseraError::invariant(format!(
                "pass {pass} of a {}-pass write",
                self.passes
            )));
        }
        let expected = if pass == 0 {
            WorkState::Pending
        } else {
            if pass != self.pass + 1 {
                return Err(TesseraError::invariant(format!(
                    "pass {pass} scheduled after pass {}",
                    self.pass
                )));
            }
            WorkState::Finished
        };
        let state = self.state();
        if state != expected {
            return Err(TesseraError::invariant(format!(
                "pass {pass} reset from {state:?}, expected {expected:?}"
            )));
        }
        self.pass = pass;
        *self.state.get_mut() = WorkState::Pending as u8;
        Ok(())
    }
}

/// Write work dispatched by the scheduler, one call per package.
///
/// Jobs are shared by reference across workers; anything they capture must be `Sync`.
pub trait WriteJob: Sync {
    fn run(&self, pkg: &WorkPackage, target: Option<RowsMut<'_>>) -> TesseraResult<()>;
}

fn run_one(job: &dyn WriteJob, pkg: &WorkPackage, band: Option<RowsMut<'_>>) -> TesseraResult<()> {
    pkg.start()?;
    let res = job.run(pkg, band);
    pkg.complete()?;
    res
}

/// Fixed worker pool fanning packages of one pass out over disjoint row bands.
///
/// With one thread no pool is built and packages run on the caller, in order.
pub struct WorkScheduler {
    pool: Option<rayon::ThreadPool>,
    threads: usize,
    queue: Vec<WorkPackage>,
}

impl WorkScheduler {
    pub fn new(threads: usize) -> TesseraResult<Self> {
        if threads == 0 {
            return Err(TesseraError::validation("worker_threads must be >= 1"));
        }
        let pool = if threads == 1 {
            None
        } else {
            Some(build_thread_pool(threads)?)
        };
        Ok(Self {
            pool,
            threads,
            queue: Vec::new(),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn schedule(&mut self, pkg: WorkPackage) {
        self.queue.push(pkg);
    }

    /// Run every queued package and block until all have finished.
    ///
    /// `target` is split into one row band per package, so queued rectangles must be ordered top
    /// to bottom without row overlap. Packages are handed back for later passes.
    pub fn finish(
        &mut self,
        job: &dyn WriteJob,
        target: Option<RowsMut<'_>>,
    ) -> TesseraResult<Vec<WorkPackage>> {
        let pkgs = std::mem::take(&mut self.queue);
        if pkgs.is_empty() {
            return Ok(pkgs);
        }
        let bands: Vec<Option<RowsMut<'_>>> = match target {
            Some(t) => {
                let rects: Vec<PixelRect> = pkgs.iter().map(|p| p.rect).collect();
                t.split_bands(&rects)?.into_iter().map(Some).collect()
            }
            None => pkgs.iter().map(|_| None).collect(),
        };

        let results: Vec<TesseraResult<()>> = match &self.pool {
            Some(pool) if pkgs.len() > 1 => pool.install(|| {
                pkgs.par_iter()
                    .zip(bands.into_par_iter())
                    .map(|(pkg, band)| run_one(job, pkg, band))
                    .collect()
            }),
            _ => pkgs
                .iter()
                .zip(bands)
                .map(|(pkg, band)| run_one(job, pkg, band))
                .collect(),
        };

        for r in results {
            r?;
        }
        if let Some(p) = pkgs.iter().find(|p| !p.is_finished()) {
            return Err(TesseraError::invariant(format!(
                "work package {:?} not finished after drain",
                p.rect
            )));
        }
        Ok(pkgs)
    }

    /// Tear the pool down. Queued packages are dropped.
    pub fn stop(self) {
        drop(self.queue);
        drop(self.pool);
    }
}

fn build_thread_pool(threads: usize) -> TesseraResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("tessera-worker-{i}"))
        .build()
        .map_err(|e| TesseraError::validation(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/exec/work.rs"]
mod tests;
