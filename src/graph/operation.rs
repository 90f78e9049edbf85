use std::sync::Arc;

use smallvec::SmallVec;

use crate::device::KernelArg;
use crate::exec::execution::BreakFlag;
use crate::foundation::core::{ElemType, ImageBuf, PixelRect};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::OpId;
use crate::graph::key::OperationKey;

/// Buffering policy of an operation's output.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum BufferType {
    /// Scratch buffer, recycled after the last read.
    Temporal,
    /// Kept in the size-bounded cache keyed by [`OperationKey`].
    Cached,
    /// The operation supplies its own already-filled buffer.
    Custom,
    /// A write happens but produces no addressable buffer (output sinks).
    NoBufferWithWrite,
    /// Pure constant, nothing to compute.
    NoBufferNoWrite,
}

impl BufferType {
    /// Whether the engine ever invokes [`Operation::write`] for this policy.
    pub fn writes(self) -> bool {
        matches!(self, Self::Temporal | Self::Cached | Self::NoBufferWithWrite)
    }
}

/// Accelerator job an operation can run instead of its CPU write.
///
/// The engine launches it with arguments in a fixed order: the output buffer, then one entry
/// per input (buffer or constant element), then `params`.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelSpec {
    pub name: &'static str,
    pub params: SmallVec<[KernelArg; 4]>,
}

/// One node of the image graph.
///
/// Operations are shared between worker threads during a write, so `write` takes `&self` and is
/// called concurrently for disjoint rectangles of the same pass.
pub trait Operation: Send + Sync {
    /// Short kind name, used in logs and keys.
    fn kind(&self) -> &'static str;

    fn key(&self) -> OperationKey;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn elem_type(&self) -> ElemType;

    fn channel_count(&self) -> u32 {
        self.elem_type().channels()
    }

    fn buffer_type(&self) -> BufferType {
        BufferType::Temporal
    }

    /// Input edges, in socket order. The same producer may appear more than once.
    fn inputs(&self) -> &[OpId];

    fn prefers_accelerator(&self) -> bool {
        false
    }

    /// Accelerator job for this operation, if it has one.
    fn kernel(&self) -> Option<KernelSpec> {
        None
    }

    fn is_single_element(&self) -> bool {
        false
    }

    /// Constant value of a single-element operation, `channel_count()` floats long.
    fn single_element_value(&self) -> Option<&[f32]> {
        None
    }

    /// Already-filled output of a [`BufferType::Custom`] operation.
    fn custom_buffer(&self) -> Option<Arc<ImageBuf>> {
        None
    }

    /// Number of full write passes over the output rectangle.
    fn write_passes(&self) -> u32 {
        1
    }

    /// Request a single work package instead of per-worker slices.
    fn single_threaded(&self) -> bool {
        false
    }

    /// Only cache points may use [`BufferType::Cached`].
    fn is_cache_point(&self) -> bool {
        false
    }

    /// Keep the cached result across frames.
    fn cache_persistent(&self) -> bool {
        false
    }

    fn extent(&self) -> PixelRect {
        PixelRect::from_size(self.width(), self.height())
    }

    /// Write `ctx.rect` for pass `ctx.pass`.
    fn write(&self, ctx: &mut WriteCtx<'_>) -> TesseraResult<()>;
}

/// Read-only view of host pixels.
#[derive(Clone, Copy, Debug)]
pub struct HostView<'a> {
    data: &'a [f32],
    width: u32,
    height: u32,
    channels: u32,
    row_pitch: usize,
}

impl<'a> HostView<'a> {
    pub fn new(
        data: &'a [f32],
        width: u32,
        height: u32,
        channels: u32,
        row_pitch: usize,
    ) -> TesseraResult<Self> {
        check_extent(data.len(), width, height, channels, row_pitch)?;
        Ok(Self {
            data,
            width,
            height,
            channels,
            row_pitch,
        })
    }

    pub fn of_image(img: &'a ImageBuf) -> TesseraResult<Self> {
        Self::new(
            &img.data,
            img.width,
            img.height,
            img.channels,
            img.row_pitch(),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    pub fn pixel(&self, x: u32, y: u32) -> &'a [f32] {
        let ch = self.channels as usize;
        let i = (y as usize) * self.row_pitch + (x as usize) * ch;
        &self.data[i..i + ch]
    }

    /// Pixel at `(x, y)` with coordinates clamped to the image (edge extension).
    pub fn sample_clamped(&self, x: i64, y: i64) -> &'a [f32] {
        let cx = x.clamp(0, i64::from(self.width.saturating_sub(1))) as u32;
        let cy = y.clamp(0, i64::from(self.height.saturating_sub(1))) as u32;
        self.pixel(cx, cy)
    }

    /// The `width * channels` visible elements of row `y`.
    pub fn row(&self, y: u32) -> &'a [f32] {
        let start = (y as usize) * self.row_pitch;
        &self.data[start..start + (self.width as usize) * (self.channels as usize)]
    }

    /// Copy into a tightly packed image.
    pub fn to_image(&self) -> ImageBuf {
        let mut out = ImageBuf::new(self.width, self.height, self.channels);
        let pitch = out.row_pitch();
        for y in 0..self.height {
            let dst = (y as usize) * pitch;
            out.data[dst..dst + pitch].copy_from_slice(self.row(y));
        }
        out
    }
}

/// Mutable view of a band of rows of a host buffer.
///
/// Row coordinates are absolute: a band covering rows `8..16` is addressed with `y` in `8..16`.
#[derive(Debug)]
pub struct RowsMut<'a> {
    data: &'a mut [f32],
    y0: u32,
    rows: u32,
    width: u32,
    channels: u32,
    row_pitch: usize,
}

impl<'a> RowsMut<'a> {
    /// View covering rows `0..height` of a buffer.
    pub fn new(
        data: &'a mut [f32],
        width: u32,
        height: u32,
        channels: u32,
        row_pitch: usize,
    ) -> TesseraResult<Self> {
        check_extent(data.len(), width, height, channels, row_pitch)?;
        Ok(Self {
            data,
            y0: 0,
            rows: height,
            width,
            channels,
            row_pitch,
        })
    }

    pub fn of_image(img: &'a mut ImageBuf) -> TesseraResult<Self> {
        let (w, h, ch, pitch) = (img.width, img.height, img.channels, img.row_pitch());
        Self::new(&mut img.data, w, h, ch, pitch)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// First row covered by this band.
    pub fn y0(&self) -> u32 {
        self.y0
    }

    /// One past the last row covered by this band.
    pub fn y1(&self) -> u32 {
        self.y0 + self.rows
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [f32] {
        debug_assert!(y >= self.y0 && y < self.y1(), "row {y} outside band");
        debug_assert!(x < self.width, "column {x} outside band");
        let ch = self.channels as usize;
        let i = ((y - self.y0) as usize) * self.row_pitch + (x as usize) * ch;
        &mut self.data[i..i + ch]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [f32] {
        debug_assert!(y >= self.y0 && y < self.y1(), "row {y} outside band");
        let start = ((y - self.y0) as usize) * self.row_pitch;
        let len = (self.width as usize) * (self.channels as usize);
        &mut self.data[start..start + len]
    }

    /// Band-relative read view: row 0 of the view is row `y0` of the buffer.
    pub fn as_view(&self) -> HostView<'_> {
        HostView {
            data: &*self.data,
            width: self.width,
            height: self.rows,
            channels: self.channels,
            row_pitch: self.row_pitch,
        }
    }

    pub fn reborrow(&mut self) -> RowsMut<'_> {
        RowsMut {
            data: &mut *self.data,
            y0: self.y0,
            rows: self.rows,
            width: self.width,
            channels: self.channels,
            row_pitch: self.row_pitch,
        }
    }

    /// Split into disjoint bands, one per rectangle.
    ///
    /// `rects` must be sorted top to bottom, non-overlapping in y, and inside this band.
    pub fn split_bands(self, rects: &[PixelRect]) -> TesseraResult<Vec<RowsMut<'a>>> {
        let mut out = Vec::with_capacity(rects.len());
        let mut rest: &'a mut [f32] = self.data;
        let mut cur = self.y0;
        for r in rects {
            if r.y0 < cur || r.y1 > self.y0 + self.rows {
                return Err(TesseraError::invariant(format!(
                    "work rects overlap or leave the band: rows {}..{} after row {cur}",
                    r.y0, r.y1
                )));
            }
            let skip = ((r.y0 - cur) as usize) * self.row_pitch;
            let tail = std::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut(skip.min(tail.len()));
            let take = ((r.height() as usize) * self.row_pitch).min(tail.len());
            let (band, tail) = tail.split_at_mut(take);
            out.push(RowsMut {
                data: band,
                y0: r.y0,
                rows: r.height(),
                width: self.width,
                channels: self.channels,
                row_pitch: self.row_pitch,
            });
            rest = tail;
            cur = r.y1;
        }
        Ok(out)
    }
}

fn check_extent(
    len: usize,
    width: u32,
    height: u32,
    channels: u32,
    row_pitch: usize,
) -> TesseraResult<()> {
    let row = (width as usize) * (channels as usize);
    if row > row_pitch {
        return Err(TesseraError::invariant(format!(
            "row pitch {row_pitch} smaller than row of {row} elements"
        )));
    }
    let need = if height == 0 {
        0
    } else {
        (height as usize - 1) * row_pitch + row
    };
    if len < need {
        return Err(TesseraError::invariant(format!(
            "pixel storage of {len} elements cannot hold {width}x{height}x{channels}"
        )));
    }
    Ok(())
}

/// Pixels of one operation input as seen by a reader.
#[derive(Clone, Copy, Debug)]
pub enum InputPixels<'a> {
    Host(HostView<'a>),
    /// Constant value, identical at every coordinate.
    SingleElement(&'a [f32]),
}

impl<'a> InputPixels<'a> {
    pub fn sample(&self, x: i64, y: i64) -> &'a [f32] {
        match self {
            Self::Host(v) => v.sample_clamped(x, y),
            Self::SingleElement(v) => v,
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            Self::Host(v) => v.channels(),
            Self::SingleElement(v) => v.len() as u32,
        }
    }
}

/// Inputs of an operation, in socket order.
#[derive(Clone, Debug, Default)]
pub struct InputSet<'a> {
    inputs: Vec<InputPixels<'a>>,
}

impl<'a> InputSet<'a> {
    pub fn new(inputs: Vec<InputPixels<'a>>) -> Self {
        Self { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn get(&self, socket: usize) -> TesseraResult<&InputPixels<'a>> {
        self.inputs.get(socket).ok_or_else(|| {
            TesseraError::invariant(format!(
                "input socket {socket} missing ({} connected)",
                self.inputs.len()
            ))
        })
    }
}

/// Everything one `(pass, rectangle)` write sees.
pub struct WriteCtx<'a> {
    /// Rectangle to write, in operation space.
    pub rect: PixelRect,
    /// 0-based pass index.
    pub pass: u32,
    /// Total passes declared by the operation.
    pub passes: u32,
    pub(crate) output: Option<RowsMut<'a>>,
    pub(crate) inputs: &'a InputSet<'a>,
    pub(crate) previous: Option<HostView<'a>>,
    pub(crate) breaked: &'a BreakFlag,
}

impl<'a> WriteCtx<'a> {
    pub fn new(
        rect: PixelRect,
        pass: u32,
        passes: u32,
        output: Option<RowsMut<'a>>,
        inputs: &'a InputSet<'a>,
        previous: Option<HostView<'a>>,
        breaked: &'a BreakFlag,
    ) -> Self {
        Self {
            rect,
            pass,
            passes,
            output,
            inputs,
            previous,
            breaked,
        }
    }

    /// Output rows for this rectangle. Absent for [`BufferType::NoBufferWithWrite`].
    pub fn output(&mut self) -> TesseraResult<&mut RowsMut<'a>> {
        self.output
            .as_mut()
            .ok_or_else(|| TesseraError::invariant("write has no output buffer"))
    }

    pub fn input(&self, socket: usize) -> TesseraResult<&InputPixels<'a>> {
        self.inputs.get(socket)
    }

    /// The whole output as it stood after the previous pass. `None` on pass 0.
    pub fn previous_pass(&self) -> Option<&HostView<'a>> {
        self.previous.as_ref()
    }

    /// Polled at safe points by long-running writes.
    pub fn is_cancelled(&self) -> bool {
        self.breaked.is_set()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/operation.rs"]
mod tests;
