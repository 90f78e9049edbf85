use crate::graph::graph::{OpId, OperationGraph};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Deterministic dependency-count scheduler over a subset of an [`OperationGraph`].
///
/// Determinism rule: when multiple operations are ready, the smallest `OpId` is returned first.
pub(crate) struct DagScheduler {
    indeg: Vec<u32>,
    dependents: Vec<Vec<OpId>>,
    ready: BinaryHeap<Reverse<u32>>,
    remaining: usize,
}

impl DagScheduler {
    /// Only operations with `included[id] == true` take part; edges to excluded producers are
    /// ignored.
    pub(crate) fn new(graph: &OperationGraph, included: &[bool]) -> Self {
        let n = graph.len();
        let mut indeg = vec![0u32; n];
        let mut dependents = vec![Vec::<OpId>::new(); n];
        let mut remaining = 0usize;

        for id in graph.ids() {
            let oi = id.idx();
            if !included.get(oi).copied().unwrap_or(false) {
                continue;
            }
            remaining += 1;
            let Ok(op) = graph.op(id) else { continue };
            let mut count = 0u32;
            for d in op.inputs() {
                let di = d.idx();
                if !included.get(di).copied().unwrap_or(false) {
                    continue;
                }
                dependents[di].push(id);
                count = count.saturating_add(1);
            }
            indeg[oi] = count;
        }

        let mut ready = BinaryHeap::<Reverse<u32>>::new();
        for (i, &deg) in indeg.iter().enumerate() {
            if deg == 0 && included.get(i).copied().unwrap_or(false) {
                ready.push(Reverse(i as u32));
            }
        }

        Self {
            indeg,
            dependents,
            ready,
            remaining,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn pop_ready(&mut self) -> Option<OpId> {
        let Reverse(id) = self.ready.pop()?;
        Some(OpId(id))
    }

    pub(crate) fn mark_done(&mut self, done: OpId) {
        let di = done.idx();
        self.remaining = self.remaining.saturating_sub(1);

        for &dep in &self.dependents[di] {
            let i = dep.idx();
            let d = &mut self.indeg[i];
            *d = d.saturating_sub(1);
            if *d == 0 {
                self.ready.push(Reverse(dep.0));
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/scheduler.rs"]
mod tests;
