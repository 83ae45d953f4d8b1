use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::grid::{CellTag, QuadrantReservedGrid};
use crate::{
    AllocError, AtlasAllocator, AtlasConfig, CellPoint, CellRect, CellSize, PageId, PageLayout,
    PixelRect, Rgba, TileId, UvRect,
};

/// Packs uniform-colour blocks into single grid cells.
#[derive(Debug)]
pub(crate) struct SwatchAtlas {
    block_size: u32,
    blocks_per_row: u32,
    reserve_quadrant: bool,
    active_page: Option<PageId>,
    current_cell: Option<CellPoint>,
    next_block: u32,
    colors: HashMap<(PageId, Rgba), PixelRect>,
}

impl SwatchAtlas {
    pub(crate) fn new(config: &AtlasConfig) -> Self {
        Self {
            block_size: config.swatch_size,
            blocks_per_row: config.cell_size / config.swatch_size,
            reserve_quadrant: config.reserve_swatch_quadrant,
            active_page: None,
            current_cell: None,
            next_block: 0,
            colors: HashMap::new(),
        }
    }

    fn blocks_per_cell(&self) -> u32 {
        self.blocks_per_row * self.blocks_per_row
    }

    fn lookup(&self, color: Rgba) -> Option<(PageId, PixelRect)> {
        let page = self.active_page?;
        self.colors.get(&(page, color)).map(|rect| (page, *rect))
    }

    /// Next free block in the current cell, if the cell is not exhausted.
    fn next_block_rect(&self, layout: PageLayout) -> Option<(PageId, PixelRect)> {
        let page = self.active_page?;
        let cell = self.current_cell?;
        if self.next_block >= self.blocks_per_cell() {
            return None;
        }
        let origin = layout.cell_pixels(CellRect::new(cell, CellSize {
            width: 1,
            height: 1,
        }));
        let column = self.next_block % self.blocks_per_row;
        let row = self.next_block / self.blocks_per_row;
        let rect = PixelRect::new(
            origin.x + (column * self.block_size) as i32,
            origin.y + (row * self.block_size) as i32,
            self.block_size,
            self.block_size,
        );
        Some((page, rect))
    }

    fn start_cell(&mut self, page: PageId, cell: CellPoint) {
        self.active_page = Some(page);
        self.current_cell = Some(cell);
        self.next_block = 0;
    }

    fn uv(&self, layout: PageLayout, rect: PixelRect) -> UvRect {
        let sampled = if self.block_size > 2 {
            PixelRect::new(rect.x + 1, rect.y + 1, rect.width - 2, rect.height - 2)
        } else {
            rect
        };
        layout.uv_of_pixels(sampled)
    }

    pub(crate) fn clear(&mut self) {
        self.active_page = None;
        self.current_cell = None;
        self.next_block = 0;
        self.colors.clear();
    }
}

impl<H: Clone + fmt::Debug, S> AtlasAllocator<H, S> {
    /// Returns the UV of a block filled with `color`, writing a new block when needed.
    pub fn add_color(&mut self, color: Rgba) -> Result<(PageId, UvRect), AllocError> {
        if let Some(found) = self.get_color(color) {
            return Ok(found);
        }
        let (page, rect) = match self.swatches.next_block_rect(self.layout) {
            Some(block) => block,
            None => {
                self.claim_swatch_cell()?;
                self.swatches
                    .next_block_rect(self.layout)
                    .expect("freshly claimed swatch cell has room")
            }
        };
        self.pages[page.index()].fill_color(TileId::SWATCH, rect, color);
        self.swatches.next_block += 1;
        self.swatches.colors.insert((page, color), rect);
        Ok((page, self.swatches.uv(self.layout, rect)))
    }

    /// Looks up `color` on the active swatch page only.
    pub fn get_color(&self, color: Rgba) -> Option<(PageId, UvRect)> {
        self.swatches
            .lookup(color)
            .map(|(page, rect)| (page, self.swatches.uv(self.layout, rect)))
    }

    /// Toggles the lower-right quadrant holdback used by swatch cell searches.
    pub fn set_swatch_quadrant_reserved(&mut self, reserved: bool) {
        self.swatches.reserve_quadrant = reserved;
    }

    fn claim_swatch_cell(&mut self) -> Result<(), AllocError> {
        let first = self.swatches.active_page.map_or(0, PageId::index);
        let reserve_quadrant = self.swatches.reserve_quadrant;
        let found = self.pages.iter().skip(first).find_map(|page| {
            QuadrantReservedGrid::new(page.occupancy(), reserve_quadrant)
                .find_room(1, 1)
                .map(|cell| (page.id(), cell))
        });
        let (page, cell) = match found {
            Some(found) => found,
            None => {
                let page = self.grow(1).ok_or(AllocError::NoRoom)?;
                let cell = QuadrantReservedGrid::new(
                    self.pages[page.index()].occupancy(),
                    reserve_quadrant,
                )
                .find_room(1, 1)
                .ok_or(AllocError::NoRoom)?;
                (page, cell)
            }
        };
        let rect = CellRect::new(cell, CellSize {
            width: 1,
            height: 1,
        });
        assert!(
            self.pages[page.index()]
                .occupancy_mut()
                .reserve(rect, CellTag::Owned(TileId::SWATCH)),
            "swatch cell search returned an occupied cell"
        );
        debug!("swatch cell claimed page={page:?} cell=({}, {})", cell.x, cell.y);
        self.swatches.start_cell(page, cell);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{FakeImages, RecordingExecutor, ScriptedClock};
    use crate::{AtlasAllocator, AtlasConfig, CellPoint, CellTag, PageId, Rgba, SurfaceDescriptor};

    type Allocator = AtlasAllocator<u64, SurfaceDescriptor>;

    fn small_config() -> AtlasConfig {
        AtlasConfig {
            page_width: 64,
            page_height: 64,
            cell_size: 16,
            margin: 0,
            swatch_size: 4,
            max_pages: 4,
            ..AtlasConfig::default()
        }
    }

    #[test]
    fn same_color_reuses_block() {
        let mut allocator = Allocator::new(small_config()).unwrap();
        let red = Rgba::new(255, 0, 0, 255);
        let first = allocator.add_color(red).unwrap();
        let second = allocator.add_color(red).unwrap();
        assert_eq!(first, second);
        assert_eq!(allocator.get_color(red), Some(first));
        assert_eq!(allocator.page(PageId::new(0)).unwrap().pending_blits(), 1);
    }

    #[test]
    fn blocks_fill_one_cell_row_major_before_claiming_another() {
        let mut allocator = Allocator::new(small_config()).unwrap();
        for value in 0..16u8 {
            allocator.add_color(Rgba::new(value, 0, 0, 255)).unwrap();
        }
        let grid = allocator.page(PageId::new(0)).unwrap().occupancy();
        assert_eq!(grid.used_count(), 1);

        allocator.add_color(Rgba::new(200, 0, 0, 255)).unwrap();
        let grid = allocator.page(PageId::new(0)).unwrap().occupancy();
        assert_eq!(grid.used_count(), 2);
        assert_eq!(
            grid.tag(CellPoint { x: 1, y: 0 }),
            Some(CellTag::Owned(crate::TileId::SWATCH))
        );
    }

    #[test]
    fn uv_is_inset_by_one_pixel() {
        let mut allocator = Allocator::new(small_config()).unwrap();
        allocator.add_color(Rgba::new(1, 2, 3, 255)).unwrap();
        let (_, uv) = allocator.add_color(Rgba::new(4, 5, 6, 255)).unwrap();
        assert_eq!(uv.u0, 5.0 / 64.0);
        assert_eq!(uv.v0, 1.0 / 64.0);
        assert_eq!(uv.du, 2.0 / 64.0);
    }

    #[test]
    fn quadrant_holdback_only_affects_swatches() {
        let mut config = small_config();
        config.reserve_swatch_quadrant = true;
        config.auto_grow = false;
        let mut allocator = Allocator::new(config).unwrap();
        // Tiles ignore the holdback, so the first 14 cells include two in the quadrant.
        for source in 2..16 {
            let tile = crate::TileSource::ready(crate::SourceId::new(source), 10, 16, 16);
            allocator.allocate(&[tile], 1.0, None).unwrap();
        }
        let grid = allocator.page(PageId::new(0)).unwrap().occupancy();
        assert!(!grid.is_free(crate::CellRect::new(
            CellPoint { x: 2, y: 2 },
            crate::CellSize {
                width: 2,
                height: 1
            }
        )));
        assert_eq!(
            allocator.add_color(Rgba::new(9, 9, 9, 255)),
            Err(crate::AllocError::NoRoom)
        );

        allocator.set_swatch_quadrant_reserved(false);
        assert!(allocator.add_color(Rgba::new(9, 9, 9, 255)).is_ok());
    }

    #[test]
    fn empty_forgets_swatches() {
        let mut allocator = Allocator::new(small_config()).unwrap();
        let mut images = FakeImages::default();
        let mut executor = RecordingExecutor::default();
        let blue = Rgba::new(0, 0, 255, 255);
        allocator.add_color(blue).unwrap();
        allocator.advance(&mut images, &mut executor, &ScriptedClock::new([0.0]), 0.0, true);

        allocator.empty();

        assert_eq!(allocator.get_color(blue), None);
        assert_eq!(allocator.page(PageId::new(0)).unwrap().occupancy().used_count(), 0);
    }
}
