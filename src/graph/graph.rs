use smallvec::SmallVec;

use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::operation::{BufferType, Operation};
use crate::graph::scheduler::DagScheduler;

/// Index of an operation inside an [`OperationGraph`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct OpId(pub u32);

impl OpId {
    pub(crate) fn idx(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Arena of operations for one execution.
///
/// Inputs must already be in the graph when an operation is added, so the graph is acyclic by
/// construction.
#[derive(Default)]
pub struct OperationGraph {
    ops: Vec<Box<dyn Operation>>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: impl Operation + 'static) -> TesseraResult<OpId> {
        self.add_boxed(Box::new(op))
    }

    pub fn add_boxed(&mut self, op: Box<dyn Operation>) -> TesseraResult<OpId> {
        let id = OpId(self.ops.len() as u32);
        for &input in op.inputs() {
            if input.idx() >= self.ops.len() {
                return Err(TesseraError::validation(format!(
                    "{} ({}) reads {input}, which is not in the graph yet",
                    id,
                    op.kind()
                )));
            }
        }
        if op.width() == 0 || op.height() == 0 {
            return Err(TesseraError::validation(format!(
                "{} ({}) has an empty {}x{} extent",
                id,
                op.kind(),
                op.width(),
                op.height()
            )));
        }
        if op.write_passes() == 0 {
            return Err(TesseraError::validation(format!(
                "{} ({}) declares zero write passes",
                id,
                op.kind()
            )));
        }
        self.ops.push(op);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op(&self, id: OpId) -> TesseraResult<&dyn Operation> {
        self.ops
            .get(id.idx())
            .map(|b| b.as_ref())
            .ok_or_else(|| TesseraError::validation(format!("{id} is not in the graph")))
    }

    pub fn ids(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.ops.len() as u32).map(OpId)
    }

    /// Mark every operation reachable from `outputs`, following the edges `deps` returns for
    /// each reached operation. Callers pass input edges, cut or redirected as they need.
    pub fn reachable(
        &self,
        outputs: &[OpId],
        deps: impl Fn(OpId) -> TesseraResult<SmallVec<[OpId; 4]>>,
    ) -> TesseraResult<Vec<bool>> {
        let mut seen = vec![false; self.ops.len()];
        let mut stack: Vec<OpId> = Vec::with_capacity(outputs.len());
        for &o in outputs {
            self.op(o)?;
            if !std::mem::replace(&mut seen[o.idx()], true) {
                stack.push(o);
            }
        }
        while let Some(id) = stack.pop() {
            for dep in deps(id)? {
                self.op(dep)?;
                if !std::mem::replace(&mut seen[dep.idx()], true) {
                    stack.push(dep);
                }
            }
        }
        Ok(seen)
    }

    /// Deterministic producer-first order of the operations flagged in `included`.
    pub fn topological_order(&self, included: &[bool]) -> TesseraResult<Vec<OpId>> {
        let mut sched = DagScheduler::new(self, included);
        let mut order = Vec::with_capacity(sched.remaining());
        while let Some(next) = sched.pop_ready() {
            order.push(next);
            sched.mark_done(next);
        }
        if sched.remaining() != 0 {
            return Err(TesseraError::invariant(format!(
                "operation graph has a cycle through {} operations",
                sched.remaining()
            )));
        }
        Ok(order)
    }

    /// Check per-operation declarations that the engine relies on.
    pub fn validate(&self) -> TesseraResult<()> {
        for id in self.ids() {
            let op = self.op(id)?;
            match op.buffer_type() {
                BufferType::Cached if !op.is_cache_point() => {
                    return Err(TesseraError::validation(format!(
                        "{id} ({}) uses a cached buffer but is not a cache point",
                        op.kind()
                    )));
                }
                BufferType::Custom if op.custom_buffer().is_none() => {
                    return Err(TesseraError::validation(format!(
                        "{id} ({}) declares a custom buffer but supplies none",
                        op.kind()
                    )));
                }
                _ => {}
            }
            if !op.is_single_element() {
                continue;
            }
            let Some(v) = op.single_element_value() else {
                return Err(TesseraError::validation(format!(
                    "{id} ({}) is single-element but has no value",
                    op.kind()
                )));
            };
            if v.len() != op.channel_count() as usize {
                return Err(TesseraError::validation(format!(
                    "{id} ({}) has a {}-channel constant for a {}-channel output",
                    op.kind(),
                    v.len(),
                    op.channel_count()
                )));
            }
        }
        self.topological_order(&vec![true; self.len()])?;
        Ok(())
    }

    /// Check that every requested output exists.
    pub fn validate_outputs(&self, outputs: &[OpId]) -> TesseraResult<()> {
        if outputs.is_empty() {
            return Err(TesseraError::validation("execution requests no outputs"));
        }
        for &o in outputs {
            self.op(o)?;
        }
        Ok(())
    }
}
