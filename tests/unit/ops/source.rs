use super::*;
use crate::device::sim::SimDevice;
use crate::exec::engine::{Engine, EngineOpts, ExecutionRequest};
use crate::graph::graph::OperationGraph;
use crate::ops::register_sim_kernels;

const A: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const B: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

fn engine(device: bool) -> Engine {
    let opts = EngineOpts {
        worker_threads: 3,
        max_cache_bytes: 8 << 20,
        ..EngineOpts::default()
    };
    if device {
        let mut dev = SimDevice::new();
        register_sim_kernels(&mut dev);
        Engine::with_device(opts, Box::new(dev)).unwrap()
    } else {
        Engine::new(opts).unwrap()
    }
}

#[test]
fn constant_element_type_follows_value_length() {
    assert!(Constant::new(4, 4, &[1.0, 2.0]).is_err());
    let c = Constant::new(4, 4, &[0.5]).unwrap();
    assert_eq!(c.elem_type(), ElemType::Value);
    assert!(c.is_single_element());
    assert_eq!(c.single_element_value(), Some(&[0.5][..]));
    assert_ne!(
        Constant::new(4, 4, &[0.5]).unwrap().key(),
        Constant::new(4, 4, &[0.25]).unwrap().key()
    );
}

#[test]
fn checker_alternates_cells_on_the_host() {
    let mut g = OperationGraph::new();
    let c = g.add(Checker::new(8, 8, 2, A, B).unwrap()).unwrap();
    let report = engine(false)
        .execute(&g, &ExecutionRequest::new("checker", vec![c]))
        .unwrap();
    let img = report.output(c).unwrap();
    assert_eq!(img.pixel(0, 0), &A);
    assert_eq!(img.pixel(1, 1), &A);
    assert_eq!(img.pixel(2, 0), &B);
    assert_eq!(img.pixel(2, 2), &A);
    assert_eq!(report.stats.host_writes, 1);
}

#[test]
fn checker_kernel_matches_the_cpu_write() {
    let mut g = OperationGraph::new();
    let c = g.add(Checker::new(13, 9, 3, A, B).unwrap()).unwrap();
    let req = ExecutionRequest::new("parity", vec![c]);
    let host = engine(false).execute(&g, &req).unwrap();
    let dev = engine(true).execute(&g, &req).unwrap();
    assert_eq!(dev.stats.device_writes, 1);
    assert_eq!(dev.output(c), host.output(c));
}

#[test]
fn checker_rejects_empty_cells() {
    assert!(Checker::new(8, 8, 0, A, B).is_err());
}

#[test]
fn image_input_is_keyed_by_content_and_never_written() {
    let img = ImageBuf::from_fn(4, 2, 1, |x, y, px| px[0] = (x + y) as f32);
    let a = ImageInput::new(img.clone()).unwrap();
    let mut other = img.clone();
    other.data[0] = 9.0;
    assert_ne!(a.key(), ImageInput::new(other).unwrap().key());
    assert_eq!(a.key(), ImageInput::new(img.clone()).unwrap().key());

    let mut bad = img.clone();
    bad.data.pop();
    assert!(ImageInput::new(bad).is_err());

    let mut g = OperationGraph::new();
    let id = g.add(a).unwrap();
    let report = engine(false)
        .execute(&g, &ExecutionRequest::new("input", vec![id]))
        .unwrap();
    assert_eq!(report.output(id), Some(&img));
    assert_eq!(report.stats.writes, 0);
}
