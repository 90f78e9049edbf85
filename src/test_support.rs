//! Configurable operation used by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::smallvec;

use crate::device::KernelArg;
use crate::device::sim::{SimDevice, SimKernelCtx};
use crate::foundation::core::{ElemType, ImageBuf};
use crate::foundation::error::TesseraResult;
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::{KeyBuilder, OperationKey};
use crate::graph::operation::{BufferType, InputPixels, KernelSpec, Operation, WriteCtx};

pub(crate) const SUM_KERNEL: &str = "test_sum";

/// Writes `base + sum(inputs)` per channel. Counts every `write` call.
pub(crate) struct TestOp {
    pub(crate) key: OperationKey,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) elem: ElemType,
    pub(crate) buffer_type: BufferType,
    pub(crate) inputs: Vec<OpId>,
    pub(crate) base: f32,
    pub(crate) accel: bool,
    pub(crate) passes: u32,
    pub(crate) single_threaded: bool,
    pub(crate) cache_point: bool,
    pub(crate) persistent: bool,
    pub(crate) value: Option<Vec<f32>>,
    pub(crate) custom: Option<Arc<ImageBuf>>,
    pub(crate) calls: Arc<AtomicUsize>,
}

impl TestOp {
    pub(crate) fn new(graph: &OperationGraph, base: f32, inputs: &[OpId]) -> Self {
        let mut kb = KeyBuilder::new("test", 64, 64, ElemType::Color).param_f32(base);
        for &i in inputs {
            if let Ok(op) = graph.op(i) {
                kb = kb.input(op.key());
            }
        }
        Self {
            key: kb.finish(),
            width: 64,
            height: 64,
            elem: ElemType::Color,
            buffer_type: BufferType::Temporal,
            inputs: inputs.to_vec(),
            base,
            accel: false,
            passes: 1,
            single_threaded: false,
            cache_point: false,
            persistent: false,
            value: None,
            custom: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn size(mut self, w: u32, h: u32) -> Self {
        self.width = w;
        self.height = h;
        self.key = KeyBuilder::new("test", w, h, self.elem)
            .param_f32(self.base)
            .input(self.key)
            .finish();
        self
    }

    pub(crate) fn accel(mut self) -> Self {
        self.accel = true;
        self
    }

    pub(crate) fn buffer_type(mut self, t: BufferType) -> Self {
        self.buffer_type = t;
        self
    }

    pub(crate) fn cache_point(mut self, persistent: bool) -> Self {
        self.buffer_type = BufferType::Cached;
        self.cache_point = true;
        self.persistent = persistent;
        self
    }

    pub(crate) fn constant(mut self, value: &[f32]) -> Self {
        self.buffer_type = BufferType::NoBufferNoWrite;
        self.elem = match value.len() {
            1 => ElemType::Value,
            3 => ElemType::Vector,
            _ => ElemType::Color,
        };
        self.value = Some(value.to_vec());
        self
    }

    pub(crate) fn custom(mut self, img: ImageBuf) -> Self {
        self.buffer_type = BufferType::Custom;
        self.custom = Some(Arc::new(img));
        self
    }

    pub(crate) fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

fn sum_px(base: f32, inputs: &[InputPixels<'_>], x: u32, y: u32, out: &mut [f32]) {
    for (c, o) in out.iter_mut().enumerate() {
        let mut v = base;
        for input in inputs {
            let px = input.sample(i64::from(x), i64::from(y));
            v += px[c.min(px.len() - 1)];
        }
        *o = v;
    }
}

impl Operation for TestOp {
    fn kind(&self) -> &'static str {
        "test"
    }

    fn key(&self) -> OperationKey {
        self.key
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn elem_type(&self) -> ElemType {
        self.elem
    }

    fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    fn inputs(&self) -> &[OpId] {
        &self.inputs
    }

    fn prefers_accelerator(&self) -> bool {
        self.accel
    }

    fn kernel(&self) -> Option<KernelSpec> {
        Some(KernelSpec {
            name: SUM_KERNEL,
            params: smallvec![KernelArg::Float(self.base)],
        })
    }

    fn is_single_element(&self) -> bool {
        self.value.is_some()
    }

    fn single_element_value(&self) -> Option<&[f32]> {
        self.value.as_deref()
    }

    fn custom_buffer(&self) -> Option<Arc<ImageBuf>> {
        self.custom.clone()
    }

    fn write_passes(&self) -> u32 {
        self.passes
    }

    fn single_threaded(&self) -> bool {
        self.single_threaded
    }

    fn is_cache_point(&self) -> bool {
        self.cache_point
    }

    fn cache_persistent(&self) -> bool {
        self.persistent
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inputs: Vec<InputPixels<'_>> = (0..self.inputs.len())
            .map(|i| ctx.input(i).copied())
            .collect::<TesseraResult<_>>()?;
        let rect = ctx.rect;
        let Ok(out) = ctx.output() else {
            return Ok(());
        };
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                sum_px(self.base, &inputs, x, y, out.pixel_mut(x, y));
            }
        }
        Ok(())
    }
}

pub(crate) fn sim_device() -> SimDevice {
    let mut dev = SimDevice::new();
    dev.register_kernel(SUM_KERNEL, |k: &mut SimKernelCtx<'_>| {
        let base = k.float_param(0)?;
        let rect = k.rect;
        let inputs = k.inputs.clone();
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                sum_px(base, &inputs, x, y, k.output.pixel_mut(x, y));
            }
        }
        Ok(())
    });
    dev
}
