use super::*;
use crate::device::sim::SimDevice;
use crate::exec::engine::{Engine, EngineOpts, ExecutionRequest};
use crate::foundation::core::ImageBuf;
use crate::ops::{Checker, Constant, ImageInput, register_sim_kernels};

fn engine(threads: usize, device: bool) -> Engine {
    let opts = EngineOpts {
        worker_threads: threads,
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

fn ramp(w: u32, h: u32) -> ImageBuf {
    ImageBuf::from_fn(w, h, 4, |x, y, px| {
        px.copy_from_slice(&[x as f32 / w as f32, y as f32 / h as f32, 0.5, 1.0]);
    })
}

#[test]
fn mix_validates_factor_and_channels() {
    let mut g = OperationGraph::new();
    let color = g.add(ImageInput::new(ramp(4, 4)).unwrap()).unwrap();
    let value = g.add(Constant::new(4, 4, &[0.5]).unwrap()).unwrap();
    let vector = g.add(Constant::new(4, 4, &[0.5, 0.5, 0.5]).unwrap()).unwrap();
    assert!(Mix::new(&g, color, value, 1.5).is_err());
    assert!(Mix::new(&g, color, value, f32::NAN).is_err());
    assert!(Mix::new(&g, color, vector, 0.5).is_err());
    assert!(Mix::new(&g, color, value, 0.5).is_ok());
}

#[test]
fn mix_blends_on_host_and_device_alike() {
    let mut g = OperationGraph::new();
    let a = g.add(ImageInput::new(ramp(16, 8)).unwrap()).unwrap();
    let b = g
        .add(Checker::new(16, 8, 4, [0.0; 4], [1.0; 4]).unwrap())
        .unwrap();
    let m = g.add(Mix::new(&g, a, b, 0.25).unwrap()).unwrap();
    let req = ExecutionRequest::new("mix", vec![m]);

    let host = engine(2, false).execute(&g, &req).unwrap();
    let px = host.output(m).unwrap().pixel(4, 0);
    assert_eq!(px, &[0.4375, 0.25, 0.625, 1.0]);

    let dev = engine(2, true).execute(&g, &req).unwrap();
    assert_eq!(dev.stats.device_writes, 2);
    // The custom input feeds the device write through one upload.
    assert_eq!(dev.stats.host_to_device_copies, 1);
    assert_eq!(dev.output(m), host.output(m));
}

#[test]
fn invert_keeps_alpha_of_colors() {
    let mut g = OperationGraph::new();
    let c = g.add(Constant::new(2, 2, &[0.25, 0.5, 1.0, 0.5]).unwrap()).unwrap();
    let v = g.add(Constant::new(2, 2, &[0.25]).unwrap()).unwrap();
    let ic = g.add(Invert::new(&g, c).unwrap()).unwrap();
    let iv = g.add(Invert::new(&g, v).unwrap()).unwrap();
    let report = engine(1, false)
        .execute(&g, &ExecutionRequest::new("invert", vec![ic, iv]))
        .unwrap();
    assert_eq!(report.output(ic).unwrap().pixel(1, 1), &[0.75, 0.5, 0.0, 0.5]);
    assert_eq!(report.output(iv).unwrap().pixel(0, 0), &[0.75]);
}

#[test]
fn prefix_sum_spans_worker_bands() {
    let mut g = OperationGraph::new();
    let ones = g
        .add(ImageInput::new(ImageBuf::from_fn(3, 10, 1, |_, _, px| px[0] = 1.0)).unwrap())
        .unwrap();
    let sum = g.add(PrefixSumRows::new(&g, ones).unwrap()).unwrap();
    let report = engine(4, false)
        .execute(&g, &ExecutionRequest::new("prefix", vec![sum]))
        .unwrap();
    let img = report.output(sum).unwrap();
    for y in 0..10 {
        assert_eq!(img.pixel(2, y), &[(y + 1) as f32]);
    }
    assert_eq!(report.stats.work_packages, 8);
}

#[test]
fn cache_point_skips_its_subgraph_on_the_next_run() {
    let mut g = OperationGraph::new();
    let src = g.add(Checker::new(8, 8, 1, [0.0; 4], [1.0; 4]).unwrap()).unwrap();
    let inv = g.add(Invert::new(&g, src).unwrap()).unwrap();
    let cp = g.add(CachePoint::new(&g, inv, false).unwrap()).unwrap();
    let out = g.add(Invert::new(&g, cp).unwrap()).unwrap();
    let mut engine = engine(2, false);

    let first = engine
        .execute(&g, &ExecutionRequest::new("c0", vec![out]))
        .unwrap();
    assert_eq!(first.stats.writes, 4);
    let second = engine
        .execute(&g, &ExecutionRequest::new("c1", vec![out]))
        .unwrap();
    assert_eq!(second.stats.writes, 1);
    assert_eq!(second.stats.cache_hits, 1);
    assert_eq!(second.output(out), first.output(out));
    assert_eq!(first.output(out).unwrap().pixel(1, 0), &[1.0, 1.0, 1.0, 1.0]);
}
