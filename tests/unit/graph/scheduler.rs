use super::*;
use smallvec::{SmallVec, smallvec};

use crate::test_support::TestOp;
use crate::foundation::core::ElemType;
use crate::foundation::error::TesseraResult;
use crate::graph::key::OperationKey;
use crate::graph::operation::{BufferType, Operation, WriteCtx};

/// Claims to be a single element but never says which.
struct Valueless;

impl Operation for Valueless {
    fn kind(&self) -> &'static str {
        "valueless"
    }

    fn key(&self) -> OperationKey {
        OperationKey { hi: 1, lo: 2 }
    }

    fn width(&self) -> u32 {
        4
    }

    fn height(&self) -> u32 {
        4
    }

    fn elem_type(&self) -> ElemType {
        ElemType::Color
    }

    fn inputs(&self) -> &[OpId] {
        &[]
    }

    fn buffer_type(&self) -> BufferType {
        BufferType::NoBufferNoWrite
    }

    fn is_single_element(&self) -> bool {
        true
    }

    fn write(&self, _ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        Ok(())
    }
}

fn diamond() -> (OperationGraph, [OpId; 4]) {
    // 0 -> 1, 0 -> 2, {1, 2} -> 3
    let mut g = OperationGraph::new();
    let a = g.add(TestOp::new(&g, 0.0, &[])).unwrap();
    let b = g.add(TestOp::new(&g, 1.0, &[a])).unwrap();
    let c = g.add(TestOp::new(&g, 2.0, &[a])).unwrap();
    let d = g.add(TestOp::new(&g, 3.0, &[b, c])).unwrap();
    (g, [a, b, c, d])
}

#[test]
fn scheduler_is_topological_and_deterministic() {
    let (g, ids) = diamond();
    let all = vec![true; g.len()];
    let mut sched = DagScheduler::new(&g, &all);
    let mut out = Vec::new();
    while let Some(next) = sched.pop_ready() {
        out.push(next);
        sched.mark_done(next);
    }
    assert_eq!(out, ids.to_vec());
    assert_eq!(sched.remaining(), 0);
}

#[test]
fn excluded_producers_do_not_block_readers() {
    let (g, [a, b, _c, d]) = diamond();
    let mut included = vec![true; g.len()];
    included[a.idx()] = false;
    let order = g.topological_order(&included).unwrap();
    assert!(!order.contains(&a));
    assert_eq!(order.first(), Some(&b));
    assert_eq!(order.last(), Some(&d));
}

#[test]
fn duplicate_edges_release_reader_once() {
    let mut g = OperationGraph::new();
    let a = g.add(TestOp::new(&g, 0.0, &[])).unwrap();
    let b = g.add(TestOp::new(&g, 1.0, &[a, a])).unwrap();
    let order = g.topological_order(&[true, true]).unwrap();
    assert_eq!(order, vec![a, b]);
}

#[test]
fn reachable_follows_only_the_edges_it_is_given() {
    let (g, [a, b, c, d]) = diamond();
    let inputs_except_b = |id: OpId| -> TesseraResult<SmallVec<[OpId; 4]>> {
        if id == b {
            return Ok(SmallVec::new());
        }
        Ok(SmallVec::from_slice(g.op(id)?.inputs()))
    };
    let seen = g.reachable(&[d], inputs_except_b).unwrap();
    assert!(seen[d.idx()] && seen[b.idx()] && seen[c.idx()]);
    // `a` is still reached through `c`.
    assert!(seen[a.idx()]);
    let seen = g.reachable(&[b], inputs_except_b).unwrap();
    assert!(!seen[a.idx()]);

    // Redirected edges need not be input edges.
    let seen = g
        .reachable(&[b], |id| {
            Ok(if id == b { smallvec![c] } else { SmallVec::new() })
        })
        .unwrap();
    assert_eq!(seen, vec![false, true, true, false]);
    assert!(g.reachable(&[OpId(9)], |_| Ok(SmallVec::new())).is_err());
}

#[test]
fn graph_rejects_forward_references_and_empty_extents() {
    let mut g = OperationGraph::new();
    assert!(g.add(TestOp::new(&g, 0.0, &[OpId(3)])).is_err());
    assert!(g.add(TestOp::new(&g, 0.0, &[]).size(0, 4)).is_err());
    assert!(g.validate_outputs(&[]).is_err());
}

#[test]
fn validate_checks_buffer_declarations() {
    let mut g = OperationGraph::new();
    g.add(TestOp::new(&g, 0.0, &[]).constant(&[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    g.validate().unwrap();

    let mut bad_cache = OperationGraph::new();
    bad_cache
        .add(TestOp::new(&bad_cache, 0.0, &[]).buffer_type(BufferType::Cached))
        .unwrap();
    assert!(bad_cache.validate().is_err());

    let mut bad_const = OperationGraph::new();
    let mut op = TestOp::new(&bad_const, 0.0, &[]).constant(&[1.0]);
    op.elem = ElemType::Color;
    bad_const.add(op).unwrap();
    assert!(bad_const.validate().is_err());

    let mut bad_custom = OperationGraph::new();
    bad_custom
        .add(TestOp::new(&bad_custom, 0.0, &[]).buffer_type(BufferType::Custom))
        .unwrap();
    assert!(bad_custom.validate().is_err());

    let mut valueless = OperationGraph::new();
    valueless.add(Valueless).unwrap();
    assert!(valueless.validate().is_err());
}
