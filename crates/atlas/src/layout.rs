use serde::{Deserialize, Serialize};

use crate::{AllocError, AtlasConfig, InvalidRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellPoint {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

/// Rectangle in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    pub const fn new(origin: CellPoint, size: CellSize) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }

    pub const fn origin(self) -> CellPoint {
        CellPoint {
            x: self.x,
            y: self.y,
        }
    }

    pub const fn size(self) -> CellSize {
        CellSize {
            width: self.width,
            height: self.height,
        }
    }

    pub const fn right(self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(self) -> u32 {
        self.y + self.height
    }

    pub const fn intersects(self, other: CellRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Rectangle in page pixels. Signed so that bleed rects may be expressed before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn expand(self, amount: u32) -> Self {
        Self {
            x: self.x - amount as i32,
            y: self.y - amount as i32,
            width: self.width + amount * 2,
            height: self.height + amount * 2,
        }
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Normalized page-space rectangle: origin plus extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub du: f32,
    pub dv: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba([0, 0, 0, 0]);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba([r, g, b, a])
    }
}

/// Cell footprint of a tile together with its scaled pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub cells: CellSize,
}

/// Page geometry shared by every page of one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub width: u32,
    pub height: u32,
    pub cell_size: u32,
    pub margin: u32,
}

impl PageLayout {
    pub fn from_config(config: &AtlasConfig) -> Self {
        Self {
            width: config.page_width,
            height: config.page_height,
            cell_size: config.cell_size,
            margin: config.margin,
        }
    }

    pub const fn columns(self) -> u32 {
        self.width / self.cell_size
    }

    pub const fn rows(self) -> u32 {
        self.height / self.cell_size
    }

    pub const fn usable_width(self) -> u32 {
        self.width.saturating_sub(self.margin * 2)
    }

    pub const fn usable_height(self) -> u32 {
        self.height.saturating_sub(self.margin * 2)
    }

    /// Computes the cell footprint of a `width x height` image inserted at `scale`.
    ///
    /// Rejects sizes that cannot fit on an empty page or exceed `max_tile_pixels`.
    pub fn footprint(
        self,
        width: u32,
        height: u32,
        scale: f32,
        max_tile_pixels: u32,
    ) -> Result<Footprint, AllocError> {
        if width == 0 || height == 0 {
            return Err(AllocError::InvalidRequest(InvalidRequest::ZeroSize));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(AllocError::InvalidRequest(InvalidRequest::InvalidScale));
        }
        let scaled_width = scaled_extent(width, scale);
        let scaled_height = scaled_extent(height, scale);
        if scaled_width > max_tile_pixels || scaled_height > max_tile_pixels {
            return Err(AllocError::TooLarge);
        }
        if scaled_width > self.usable_width() || scaled_height > self.usable_height() {
            return Err(AllocError::TooLarge);
        }
        let cells = CellSize {
            width: (scaled_width + self.margin * 2).div_ceil(self.cell_size),
            height: (scaled_height + self.margin * 2).div_ceil(self.cell_size),
        };
        if cells.width > self.columns() || cells.height > self.rows() {
            return Err(AllocError::TooLarge);
        }
        Ok(Footprint {
            scaled_width,
            scaled_height,
            cells,
        })
    }

    pub const fn cell_pixels(self, rect: CellRect) -> PixelRect {
        PixelRect {
            x: (rect.x * self.cell_size) as i32,
            y: (rect.y * self.cell_size) as i32,
            width: rect.width * self.cell_size,
            height: rect.height * self.cell_size,
        }
    }

    /// Pixel rect a tile's content is written into: its cells inset by the margin.
    pub const fn interior(self, rect: CellRect) -> PixelRect {
        let cells = self.cell_pixels(rect);
        PixelRect {
            x: cells.x + self.margin as i32,
            y: cells.y + self.margin as i32,
            width: cells.width - self.margin * 2,
            height: cells.height - self.margin * 2,
        }
    }

    pub fn uv(self, rect: CellRect) -> UvRect {
        self.uv_of_pixels(self.interior(rect))
    }

    pub fn uv_of_pixels(self, rect: PixelRect) -> UvRect {
        let width = self.width as f32;
        let height = self.height as f32;
        UvRect {
            u0: rect.x as f32 / width,
            v0: rect.y as f32 / height,
            du: rect.width as f32 / width,
            dv: rect.height as f32 / height,
        }
    }

    pub const fn page_pixels(self) -> PixelRect {
        PixelRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

fn scaled_extent(extent: u32, scale: f32) -> u32 {
    let scaled = (extent as f64 * scale as f64).ceil();
    if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        (scaled as u32).max(1)
    }
}
