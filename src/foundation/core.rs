use crate::foundation::error::{TesseraError, TesseraResult};

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)` in operation space.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PixelRect {
    /// Inclusive left edge.
    pub x0: u32,
    /// Inclusive top edge.
    pub y0: u32,
    /// Exclusive right edge.
    pub x1: u32,
    /// Exclusive bottom edge.
    pub y1: u32,
}

impl PixelRect {
    /// Create a validated rectangle with `x0 <= x1` and `y0 <= y1`.
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> TesseraResult<Self> {
        if x0 > x1 || y0 > y1 {
            return Err(TesseraError::validation(format!(
                "PixelRect bounds are inverted: ({x0},{y0})..({x1},{y1})"
            )));
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    /// Full extent of a `width x height` image anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    pub fn width(self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Pixel count.
    pub fn area(self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(self, x: u32, y: u32) -> bool {
        self.x0 <= x && x < self.x1 && self.y0 <= y && y < self.y1
    }

    /// Intersection of two rectangles. Disjoint inputs yield an empty rectangle.
    pub fn intersect(self, other: Self) -> Self {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1).max(x0);
        let y1 = self.y1.min(other.y1).max(y0);
        Self { x0, y0, x1, y1 }
    }

    /// Split into at most `n` horizontal bands of near-equal height, top to bottom.
    ///
    /// Bands are disjoint, cover the rectangle exactly, and are never empty.
    pub fn split_rows(self, n: usize) -> Vec<Self> {
        if self.is_empty() {
            return Vec::new();
        }
        let rows = self.height() as usize;
        let n = n.clamp(1, rows);
        let base = rows / n;
        let extra = rows % n;

        let mut out = Vec::with_capacity(n);
        let mut y = self.y0;
        for i in 0..n {
            let h = (base + usize::from(i < extra)) as u32;
            out.push(Self {
                x0: self.x0,
                y0: y,
                x1: self.x1,
                y1: y + h,
            });
            y += h;
        }
        out
    }
}

/// Output element type of an operation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ElemType {
    /// Single scalar channel.
    Value,
    /// Three-channel vector.
    Vector,
    /// Four-channel RGBA color.
    Color,
}

impl ElemType {
    pub fn channels(self) -> u32 {
        match self {
            Self::Value => 1,
            Self::Vector => 3,
            Self::Color => 4,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Value => 0,
            Self::Vector => 1,
            Self::Color => 2,
        }
    }
}

/// Where an operation's write executes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ExecSide {
    /// CPU worker threads writing host memory.
    Host,
    /// Accelerator command queue writing device memory.
    Device,
}

/// Tightly packed `f32` image, row-major, `channels` floats per pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuf {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

impl ImageBuf {
    /// Zero-filled image.
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        let len = (width as usize) * (height as usize) * (channels as usize);
        Self {
            width,
            height,
            channels,
            data: vec![0.0; len],
        }
    }

    /// Build an image from a per-pixel closure writing `channels` floats.
    pub fn from_fn(
        width: u32,
        height: u32,
        channels: u32,
        mut f: impl FnMut(u32, u32, &mut [f32]),
    ) -> Self {
        let mut img = Self::new(width, height, channels);
        let ch = channels as usize;
        for y in 0..height {
            for x in 0..width {
                let i = ((y as usize) * (width as usize) + x as usize) * ch;
                f(x, y, &mut img.data[i..i + ch]);
            }
        }
        img
    }

    /// Pixel at `(x, y)`. Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let ch = self.channels as usize;
        let i = ((y as usize) * (self.width as usize) + x as usize) * ch;
        &self.data[i..i + ch]
    }

    /// Elements per row.
    pub fn row_pitch(&self) -> usize {
        (self.width as usize) * (self.channels as usize)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
