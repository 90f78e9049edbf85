use std::sync::{Arc, Mutex, PoisonError};

use crate::foundation::core::{ElemType, ImageBuf};
use crate::foundation::error::TesseraResult;
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::{KeyBuilder, OperationKey};
use crate::graph::operation::{BufferType, Operation, WriteCtx};
use crate::ops::input_info;

/// Shared display surface a [`Viewer`] draws into.
#[derive(Clone, Debug)]
pub struct ViewerHandle(Arc<Mutex<ImageBuf>>);

impl ViewerHandle {
    /// Copy of what the viewer has drawn so far.
    pub fn snapshot(&self) -> ImageBuf {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Output sink: writes its input into a surface it owns, producing no engine buffer.
pub struct Viewer {
    key: OperationKey,
    input: [OpId; 1],
    width: u32,
    height: u32,
    elem: ElemType,
    surface: ViewerHandle,
}

impl Viewer {
    pub fn new(graph: &OperationGraph, input: OpId) -> TesseraResult<(Self, ViewerHandle)> {
        let info = input_info(graph, input)?;
        let surface = ViewerHandle(Arc::new(Mutex::new(ImageBuf::new(
            info.width,
            info.height,
            info.channels,
        ))));
        let viewer = Self {
            key: KeyBuilder::new("viewer", info.width, info.height, info.elem)
                .input(info.key)
                .finish(),
            input: [input],
            width: info.width,
            height: info.height,
            elem: info.elem,
            surface: surface.clone(),
        };
        Ok((viewer, surface))
    }
}

impl Operation for Viewer {
    fn kind(&self) -> &'static str {
        "viewer"
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
        BufferType::NoBufferWithWrite
    }

    fn inputs(&self) -> &[OpId] {
        &self.input
    }

    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()> {
        let src = *ctx.input(0)?;
        let rect = ctx.rect;
        let mut surface = self.surface.0.lock().unwrap_or_else(PoisonError::into_inner);
        let ch = surface.channels as usize;
        let width = surface.width as usize;
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                let px = src.sample(i64::from(x), i64::from(y));
                let i = ((y as usize) * width + x as usize) * ch;
                for (c, o) in surface.data[i..i + ch].iter_mut().enumerate() {
                    *o = px[c.min(px.len() - 1)];
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ops/sink.rs"]
mod tests;
