use smallvec::smallvec;

use crate::device::KernelArg;
use crate::foundation::core::{ElemType, PixelRect};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::{KeyBuilder, OperationKey};
use crate::graph::operation::{BufferType, InputPixels, KernelSpec, Operation, RowsMut, WriteCtx};
use crate::ops::{InputInfo, MIX_KERNEL, input_info};

/// Copy `input` into `rect`, repeating its last channel when it has fewer than the output.
fn copy_rect(rect: PixelRect, input: &InputPixels<'_>, out: &mut RowsMut<'_>) {
    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let src = input.sample(i64::from(x), i64::from(y));
            for (c, o) in out.pixel_mut(x, y).iter_mut().enumerate() {
                *o = src[c.min(src.len() - 1)];
            }
        }
    }
}

/// Linear blend of two inputs. Output takes the size and element type of the first one.
pub struct Mix {
    key: OperationKey,
    inputs: [OpId; 2],
    width: u32,
    height: u32,
    elem: ElemType,
    factor: f32,
}

impl Mix {
    pub fn new(graph: &OperationGraph, a: OpId, b: OpId, factor: f32) -> TesseraResult<Self> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(TesseraError::validation(format!(
                "mix factor {factor} is outside [0, 1]"
            )));
        }
        let ia = input_info(graph, a)?;
        let ib = input_info(graph, b)?;
        if ib.channels != ia.channels && ib.channels != 1 {
            return Err(TesseraError::validation(format!(
                "cannot mix {}-channel {} into {}-channel {}",
                ib.channels, ib.id, ia.channels, ia.id
            )));
        }
        let key = KeyBuilder::new("mix", ia.width, ia.height, ia.elem)
            .param_f32(factor)
            .input(ia.key)
            .input(ib.key)
            .finish();
        Ok(Self {
            key,
            inputs: [a, b],
            width: ia.width,
            height: ia.height,
            elem: ia.elem,
            factor,
        })
    }
}

pub(crate) fn mix_rect(
    rect: PixelRect,
    a: &InputPixels<'_>,
    b: &InputPixels<'_>,
    factor: f32,
    out: &mut RowsMut<'_>,
) {
    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let pa = a.sample(i64::from(x), i64::from(y));
            let pb = b.sample(i64::from(x), i64::from(y));
            for (c, o) in out.pixel_mut(x, y).iter_mut().enumerate() {
                let va = pa[c.min(pa.len() - 1)];
                let vb = pb[c.min(pb.len() - 1)];
                *o = va + (vb - va) * factor;
            }
        }
    }
}

impl Operation for Mix {
    fn kind(&self) -> &'static str {
        "mix"
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

    fn inputs(&self) -> &[OpId] {
        &self.inputs
    }

    fn prefers_accelerator(&self) -> bool {
        true
    }

    fn kernel(&self) -> Option<KernelSpec> {
        Some(KernelSpec {
            name: MIX_KERNEL,
            params: smallvec![KernelArg::Float(self.factor)],
        })
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let a = *ctx.input(0)?;
        let b = *ctx.input(1)?;
        let rect = ctx.rect;
        mix_rect(rect, &a, &b, self.factor, ctx.output()?);
        Ok(())
    }
}

/// `1 - v` per channel. Alpha of color inputs passes through.
pub struct Invert {
    key: OperationKey,
    input: [OpId; 1],
    width: u32,
    height: u32,
    elem: ElemType,
}

impl Invert {
    pub fn new(graph: &OperationGraph, input: OpId) -> TesseraResult<Self> {
        let InputInfo {
            key,
            width,
            height,
            elem,
            ..
        } = input_info(graph, input)?;
        Ok(Self {
            key: KeyBuilder::new("invert", width, height, elem)
                .input(key)
                .finish(),
            input: [input],
            width,
            height,
            elem,
        })
    }
}

impl Operation for Invert {
    fn kind(&self) -> &'static str {
        "invert"
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

    fn inputs(&self) -> &[OpId] {
        &self.input
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let src = *ctx.input(0)?;
        let rect = ctx.rect;
        let keep_alpha = self.elem == ElemType::Color;
        let out = ctx.output()?;
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                let px = src.sample(i64::from(x), i64::from(y));
                for (c, o) in out.pixel_mut(x, y).iter_mut().enumerate() {
                    let v = px[c.min(px.len() - 1)];
                    *o = if keep_alpha && c == 3 { v } else { 1.0 - v };
                }
            }
        }
        Ok(())
    }
}

/// Running sum down each column, computed in two passes.
///
/// Pass 0 copies the input; pass 1 accumulates over the copy left by pass 0, which lets every
/// worker band start from the rows above it.
pub struct PrefixSumRows {
    key: OperationKey,
    input: [OpId; 1],
    width: u32,
    height: u32,
    elem: ElemType,
}

impl PrefixSumRows {
    pub fn new(graph: &OperationGraph, input: OpId) -> TesseraResult<Self> {
        let info = input_info(graph, input)?;
        Ok(Self {
            key: KeyBuilder::new("prefix_sum_rows", info.width, info.height, info.elem)
                .input(info.key)
                .finish(),
            input: [input],
            width: info.width,
            height: info.height,
            elem: info.elem,
        })
    }
}

impl Operation for PrefixSumRows {
    fn kind(&self) -> &'static str {
        "prefix_sum_rows"
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

    fn inputs(&self) -> &[OpId] {
        &self.input
    }

    fn write_passes(&self) -> u32 {
        2
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let rect = ctx.rect;
        if ctx.pass == 0 {
            let src = *ctx.input(0)?;
            copy_rect(rect, &src, ctx.output()?);
            return Ok(());
        }
        let prev = ctx
            .previous_pass()
            .copied()
            .ok_or_else(|| TesseraError::invariant("prefix sum pass 1 without pass 0"))?;
        let ch = self.elem.channels() as usize;
        let mut acc = vec![0.0f32; rect.width() as usize * ch];
        for y in 0..rect.y1 {
            for x in rect.x0..rect.x1 {
                let i = (x - rect.x0) as usize * ch;
                let src = prev.pixel(x, y);
                for (a, v) in acc[i..i + ch].iter_mut().zip(src) {
                    *a += *v;
                }
                if y >= rect.y0 {
                    ctx.output()?
                        .pixel_mut(x, y)
                        .copy_from_slice(&acc[i..i + ch]);
                }
            }
        }
        Ok(())
    }
}

/// Cache point: stores its input in the operation cache so later executions skip the subgraph.
pub struct CachePoint {
    key: OperationKey,
    input: [OpId; 1],
    width: u32,
    height: u32,
    elem: ElemType,
    persistent: bool,
}

impl CachePoint {
    pub fn new(graph: &OperationGraph, input: OpId, persistent: bool) -> TesseraResult<Self> {
        let info = input_info(graph, input)?;
        Ok(Self {
            key: KeyBuilder::new("cache_point", info.width, info.height, info.elem)
                .input(info.key)
                .finish(),
            input: [input],
            width: info.width,
            height: info.height,
            elem: info.elem,
            persistent,
        })
    }
}

impl Operation for CachePoint {
    fn kind(&self) -> &'static str {
        "cache_point"
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
        BufferType::Cached
    }

    fn inputs(&self) -> &[OpId] {
        &self.input
    }

    fn is_cache_point(&self) -> bool {
        true
    }

    fn cache_persistent(&self) -> bool {
        self.persistent
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let src = *ctx.input(0)?;
        let rect = ctx.rect;
        copy_rect(rect, &src, ctx.output()?);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ops/filter.rs"]
mod tests;
