use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::device::KernelArg;
use crate::foundation::core::{ElemType, ImageBuf, PixelRect};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::OpId;
use crate::graph::key::{KeyBuilder, OperationKey};
use crate::graph::operation::{BufferType, KernelSpec, Operation, RowsMut, WriteCtx};
use crate::ops::CHECKER_KERNEL;

fn elem_for_channels(n: usize) -> TesseraResult<ElemType> {
    match n {
        1 => Ok(ElemType::Value),
        3 => Ok(ElemType::Vector),
        4 => Ok(ElemType::Color),
        _ => Err(TesseraError::validation(format!(
            "no element type has {n} channels"
        ))),
    }
}

/// Single-element constant. Never written; readers sample the value directly.
pub struct Constant {
    key: OperationKey,
    width: u32,
    height: u32,
    elem: ElemType,
    value: SmallVec<[f32; 4]>,
}

impl Constant {
    pub fn new(width: u32, height: u32, value: &[f32]) -> TesseraResult<Self> {
        let elem = elem_for_channels(value.len())?;
        let mut kb = KeyBuilder::new("constant", width, height, elem);
        for &v in value {
            kb = kb.param_f32(v);
        }
        Ok(Self {
            key: kb.finish(),
            width,
            height,
            elem,
            value: SmallVec::from_slice(value),
        })
    }
}

impl Operation for Constant {
    fn kind(&self) -> &'static str {
        "constant"
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
        BufferType::NoBufferNoWrite
    }

    fn inputs(&self) -> &[OpId] {
        &[]
    }

    fn is_single_element(&self) -> bool {
        true
    }

    fn single_element_value(&self) -> Option<&[f32]> {
        Some(&self.value)
    }

    fn write(&self, _ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        Ok(())
    }
}

/// Procedural two-color checkerboard. Runs on the accelerator when one is attached.
pub struct Checker {
    key: OperationKey,
    width: u32,
    height: u32,
    cell: u32,
    a: [f32; 4],
    b: [f32; 4],
}

impl Checker {
    pub fn new(width: u32, height: u32, cell: u32, a: [f32; 4], b: [f32; 4]) -> TesseraResult<Self> {
        if cell == 0 || i32::try_from(cell).is_err() {
            return Err(TesseraError::validation(format!(
                "checker cell size {cell} is out of range"
            )));
        }
        let mut kb = KeyBuilder::new("checker", width, height, ElemType::Color).param_u32(cell);
        for v in a.iter().chain(b.iter()) {
            kb = kb.param_f32(*v);
        }
        Ok(Self {
            key: kb.finish(),
            width,
            height,
            cell,
            a,
            b,
        })
    }
}

pub(crate) fn checker_rect(rect: PixelRect, cell: u32, a: &[f32; 4], b: &[f32; 4], out: &mut RowsMut<'_>) {
    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let px = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
            out.pixel_mut(x, y).copy_from_slice(px);
        }
    }
}

impl Operation for Checker {
    fn kind(&self) -> &'static str {
        "checker"
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
        ElemType::Color
    }

    fn inputs(&self) -> &[OpId] {
        &[]
    }

    fn prefers_accelerator(&self) -> bool {
        true
    }

    fn kernel(&self) -> Option<KernelSpec> {
        let mut params: SmallVec<[KernelArg; 4]> = smallvec![KernelArg::Int(self.cell as i32)];
        params.extend(self.a.iter().chain(self.b.iter()).map(|v| KernelArg::Float(*v)));
        Some(KernelSpec {
            name: CHECKER_KERNEL,
            params,
        })
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let rect = ctx.rect;
        checker_rect(rect, self.cell, &self.a, &self.b, ctx.output()?);
        Ok(())
    }
}

/// Externally supplied pixels, handed to readers without a copy.
pub struct ImageInput {
    key: OperationKey,
    elem: ElemType,
    image: Arc<ImageBuf>,
}

impl ImageInput {
    pub fn new(image: ImageBuf) -> TesseraResult<Self> {
        let elem = elem_for_channels(image.channels as usize)?;
        if image.width == 0 || image.height == 0 {
            return Err(TesseraError::validation("image input is empty"));
        }
        let expected = (image.width as usize) * (image.height as usize) * (image.channels as usize);
        if image.data.len() != expected {
            return Err(TesseraError::validation(format!(
                "image input holds {} elements, expected {expected}",
                image.data.len()
            )));
        }
        let bytes: Vec<u8> = image.data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let key = KeyBuilder::new("image_input", image.width, image.height, elem)
            .param_u64(xxhash_rust::xxh3::xxh3_64(&bytes))
            .finish();
        Ok(Self {
            key,
            elem,
            image: Arc::new(image),
        })
    }
}

impl Operation for ImageInput {
    fn kind(&self) -> &'static str {
        "image_input"
    }

    fn key(&self) -> OperationKey {
        self.key
    }

    fn width(&self) -> u32 {
        self.image.width
    }

    fn height(&self) -> u32 {
        self.image.height
    }

    fn elem_type(&self) -> ElemType {
        self.elem
    }

    fn buffer_type(&self) -> BufferType {
        BufferType::Custom
    }

    fn inputs(&self) -> &[OpId] {
        &[]
    }

    fn custom_buffer(&self) -> Option<Arc<ImageBuf>> {
        Some(Arc::clone(&self.image))
    }

    fn write(&self, _ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        Err(TesseraError::invariant("image input is never written"))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ops/source.rs"]
mod tests;
