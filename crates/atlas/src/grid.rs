use bitvec::prelude::{BitVec, Lsb0};

use crate::{CellPoint, CellRect, CellSize, TileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellTag {
    #[default]
    Free,
    /// Claimed by a placeholder token whose pixels are not known yet.
    Reserved(TileId),
    Owned(TileId),
}

impl CellTag {
    pub const fn owner(self) -> Option<TileId> {
        match self {
            CellTag::Free => None,
            CellTag::Reserved(id) | CellTag::Owned(id) => Some(id),
        }
    }
}

static_assertions::const_assert!(std::mem::size_of::<CellTag>() <= 16);

/// Quantized occupancy bitmap of one page.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    // tags.len() == used.len() == columns * rows
    columns: u32,
    rows: u32,
    tags: Box<[CellTag]>,
    used: BitVec<usize, Lsb0>,
    used_count: usize,
}

impl OccupancyGrid {
    pub fn new(columns: u32, rows: u32) -> Self {
        let cells = columns as usize * rows as usize;
        Self {
            columns,
            rows,
            tags: vec![CellTag::Free; cells].into_boxed_slice(),
            used: BitVec::repeat(false, cells),
            used_count: 0,
        }
    }

    pub const fn columns(&self) -> u32 {
        self.columns
    }

    pub const fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cell_count(&self) -> usize {
        self.tags.len()
    }

    pub fn used_count(&self) -> usize {
        self.used_count
    }

    pub fn tag(&self, point: CellPoint) -> Option<CellTag> {
        self.index(point).map(|index| self.tags[index])
    }

    pub fn contains(&self, rect: CellRect) -> bool {
        rect.width > 0
            && rect.height > 0
            && rect.right() <= self.columns
            && rect.bottom() <= self.rows
    }

    pub fn is_free(&self, rect: CellRect) -> bool {
        self.contains(rect) && self.rightmost_used_in(rect).is_none()
    }

    /// First-fit search, rows top to bottom then columns left to right.
    pub fn find_room(&self, width: u32, height: u32) -> Option<CellPoint> {
        find_room(&[self], width, height)
    }

    /// Marks every cell of `rect` with `tag`. Returns false, touching nothing, if any
    /// cell is out of bounds or already claimed.
    pub fn reserve(&mut self, rect: CellRect, tag: CellTag) -> bool {
        if tag == CellTag::Free || !self.is_free(rect) {
            return false;
        }
        self.for_each_index(rect, |tags, used, index| {
            tags[index] = tag;
            used.set(index, true);
        });
        self.used_count += rect.width as usize * rect.height as usize;
        true
    }

    /// Frees the cells of `rect` owned by `owner`. Cells claimed by anyone else are left
    /// untouched. Returns the number of cells released.
    pub fn release(&mut self, rect: CellRect, owner: TileId) -> usize {
        if !self.contains(rect) {
            return 0;
        }
        let mut released = 0usize;
        self.for_each_index(rect, |tags, used, index| {
            if tags[index].owner() == Some(owner) {
                tags[index] = CellTag::Free;
                used.set(index, false);
                released += 1;
            }
        });
        self.used_count -= released;
        released
    }

    /// Rewrites cells of `rect` tagged `from` to `to`. Returns false, touching nothing,
    /// unless every cell currently carries `from`.
    pub fn retag(&mut self, rect: CellRect, from: CellTag, to: CellTag) -> bool {
        if from == CellTag::Free || to == CellTag::Free || !self.contains(rect) {
            return false;
        }
        let all_match = self.rect_indices(rect).all(|index| self.tags[index] == from);
        if !all_match {
            return false;
        }
        self.for_each_index(rect, |tags, _, index| tags[index] = to);
        true
    }

    pub fn count_owned_by(&self, owner: TileId) -> usize {
        self.tags
            .iter()
            .filter(|tag| tag.owner() == Some(owner))
            .count()
    }

    pub fn clear(&mut self) {
        self.tags.fill(CellTag::Free);
        self.used.fill(false);
        self.used_count = 0;
    }

    fn index(&self, point: CellPoint) -> Option<usize> {
        if point.x >= self.columns || point.y >= self.rows {
            return None;
        }
        Some(point.y as usize * self.columns as usize + point.x as usize)
    }

    fn rect_indices(&self, rect: CellRect) -> impl Iterator<Item = usize> + '_ {
        let columns = self.columns as usize;
        (rect.y..rect.bottom()).flat_map(move |y| {
            let row = y as usize * columns;
            (rect.x as usize..rect.right() as usize).map(move |x| row + x)
        })
    }

    fn for_each_index(
        &mut self,
        rect: CellRect,
        mut visit: impl FnMut(&mut [CellTag], &mut BitVec<usize, Lsb0>, usize),
    ) {
        let columns = self.columns as usize;
        for y in rect.y..rect.bottom() {
            let row = y as usize * columns;
            for x in rect.x as usize..rect.right() as usize {
                visit(&mut self.tags[..], &mut self.used, row + x);
            }
        }
    }

    /// Column of the right-most used cell in `rect`, scanning every row.
    fn rightmost_used_in(&self, rect: CellRect) -> Option<u32> {
        let columns = self.columns as usize;
        let mut rightmost = None;
        for y in rect.y..rect.bottom() {
            let row = y as usize * columns;
            let span = &self.used[row + rect.x as usize..row + rect.right() as usize];
            if let Some(offset) = span.last_one() {
                let column = rect.x + offset as u32;
                rightmost = Some(rightmost.map_or(column, |current: u32| current.max(column)));
            }
        }
        rightmost
    }
}

/// First origin at which a `width x height` rect is free in every grid simultaneously.
///
/// All grids must share dimensions; grouped tiles use one grid per consecutive page.
pub fn find_room(grids: &[&OccupancyGrid], width: u32, height: u32) -> Option<CellPoint> {
    scan_for_room(grids, CellSize { width, height }, |_| true)
}

pub(crate) fn scan_for_room(
    grids: &[&OccupancyGrid],
    size: CellSize,
    admit: impl Fn(CellRect) -> bool,
) -> Option<CellPoint> {
    let first = grids.first()?;
    if size.width == 0 || size.height == 0 {
        return None;
    }
    assert!(
        grids
            .iter()
            .all(|grid| grid.columns == first.columns && grid.rows == first.rows),
        "parallel occupancy grids must share dimensions"
    );
    if size.width > first.columns || size.height > first.rows {
        return None;
    }
    for y in 0..=first.rows - size.height {
        let mut x = 0;
        while x + size.width <= first.columns {
            let rect = CellRect::new(CellPoint { x, y }, size);
            let blocker = grids
                .iter()
                .filter_map(|grid| grid.rightmost_used_in(rect))
                .max();
            match blocker {
                Some(column) => x = column + 1,
                None if admit(rect) => return Some(rect.origin()),
                None => x += 1,
            }
        }
    }
    None
}

/// Occupancy view that refuses the lower-right quadrant while the holdback flag is set.
#[derive(Debug, Clone, Copy)]
pub struct QuadrantReservedGrid<'a> {
    grid: &'a OccupancyGrid,
    reserve_quadrant: bool,
}

impl<'a> QuadrantReservedGrid<'a> {
    pub const fn new(grid: &'a OccupancyGrid, reserve_quadrant: bool) -> Self {
        Self {
            grid,
            reserve_quadrant,
        }
    }

    pub const fn reserved_quadrant(&self) -> CellRect {
        let x = self.grid.columns / 2;
        let y = self.grid.rows / 2;
        CellRect {
            x,
            y,
            width: self.grid.columns - x,
            height: self.grid.rows - y,
        }
    }

    pub fn find_room(&self, width: u32, height: u32) -> Option<CellPoint> {
        if !self.reserve_quadrant {
            return self.grid.find_room(width, height);
        }
        let quadrant = self.reserved_quadrant();
        scan_for_room(&[self.grid], CellSize { width, height }, |rect| {
            !rect.intersects(quadrant)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> CellRect {
        CellRect {
            x,
            y,
            width,
            height,
        }
    }

    fn owner(raw: u64) -> TileId {
        TileId::new(raw)
    }

    #[test]
    fn find_room_is_first_fit_row_major() {
        let mut grid = OccupancyGrid::new(128, 128);
        assert_eq!(grid.find_room(19, 19), Some(CellPoint { x: 0, y: 0 }));
        assert!(grid.reserve(rect(0, 0, 19, 19), CellTag::Owned(owner(2))));
        assert_eq!(grid.find_room(5, 5), Some(CellPoint { x: 19, y: 0 }));
    }

    #[test]
    fn find_room_skips_to_next_row_when_row_is_full() {
        let mut grid = OccupancyGrid::new(8, 8);
        assert!(grid.reserve(rect(0, 0, 6, 2), CellTag::Owned(owner(2))));
        assert_eq!(grid.find_room(3, 1), Some(CellPoint { x: 0, y: 2 }));
        assert_eq!(grid.find_room(2, 2), Some(CellPoint { x: 6, y: 0 }));
    }

    #[test]
    fn find_room_requires_all_parallel_grids_free() {
        let mut first = OccupancyGrid::new(8, 8);
        let mut second = OccupancyGrid::new(8, 8);
        assert!(first.reserve(rect(0, 0, 2, 2), CellTag::Owned(owner(2))));
        assert!(second.reserve(rect(2, 0, 2, 2), CellTag::Owned(owner(3))));

        assert_eq!(find_room(&[&first], 2, 2), Some(CellPoint { x: 2, y: 0 }));
        assert_eq!(
            find_room(&[&first, &second], 2, 2),
            Some(CellPoint { x: 4, y: 0 })
        );
    }

    #[test]
    fn find_room_fails_on_full_or_oversized_request() {
        let mut grid = OccupancyGrid::new(4, 4);
        assert_eq!(grid.find_room(5, 1), None);
        assert!(grid.reserve(rect(0, 0, 4, 4), CellTag::Owned(owner(2))));
        assert_eq!(grid.find_room(1, 1), None);
    }

    #[test]
    fn reserve_refuses_overlap_without_side_effects() {
        let mut grid = OccupancyGrid::new(8, 8);
        assert!(grid.reserve(rect(2, 2, 2, 2), CellTag::Owned(owner(2))));
        assert!(!grid.reserve(rect(3, 3, 3, 3), CellTag::Reserved(owner(3))));
        assert_eq!(grid.count_owned_by(owner(3)), 0);
        assert_eq!(grid.used_count(), 4);
        assert!(!grid.reserve(rect(7, 7, 2, 1), CellTag::Owned(owner(4))));
    }

    #[test]
    fn release_is_exact_to_owner() {
        let mut grid = OccupancyGrid::new(8, 8);
        assert!(grid.reserve(rect(0, 0, 2, 2), CellTag::Owned(owner(2))));
        assert!(grid.reserve(rect(2, 0, 2, 2), CellTag::Owned(owner(3))));

        let released = grid.release(rect(0, 0, 4, 2), owner(2));
        assert_eq!(released, 4);
        assert_eq!(grid.count_owned_by(owner(3)), 4);
        assert_eq!(grid.used_count(), 4);
        assert_eq!(grid.tag(CellPoint { x: 0, y: 0 }), Some(CellTag::Free));
    }

    #[test]
    fn retag_turns_reservation_into_ownership() {
        let mut grid = OccupancyGrid::new(8, 8);
        let token = rect(1, 1, 3, 2);
        assert!(grid.reserve(token, CellTag::Reserved(owner(5))));
        assert!(!grid.retag(token, CellTag::Reserved(owner(6)), CellTag::Owned(owner(6))));
        assert!(grid.retag(token, CellTag::Reserved(owner(5)), CellTag::Owned(owner(5))));
        assert_eq!(
            grid.tag(CellPoint { x: 3, y: 2 }),
            Some(CellTag::Owned(owner(5)))
        );
    }

    #[test]
    fn quadrant_holdback_only_applies_when_enabled() {
        let mut grid = OccupancyGrid::new(4, 4);
        assert!(grid.reserve(rect(0, 0, 4, 2), CellTag::Owned(owner(2))));
        assert!(grid.reserve(rect(0, 2, 2, 2), CellTag::Owned(owner(3))));

        let open = QuadrantReservedGrid::new(&grid, false);
        assert_eq!(open.find_room(1, 1), Some(CellPoint { x: 2, y: 2 }));

        let held = QuadrantReservedGrid::new(&grid, true);
        assert_eq!(held.reserved_quadrant(), rect(2, 2, 2, 2));
        assert_eq!(held.find_room(1, 1), None);
    }

    #[test]
    fn clear_frees_everything() {
        let mut grid = OccupancyGrid::new(4, 4);
        assert!(grid.reserve(rect(0, 0, 4, 4), CellTag::Owned(owner(2))));
        grid.clear();
        assert_eq!(grid.used_count(), 0);
        assert_eq!(grid.find_room(4, 4), Some(CellPoint { x: 0, y: 0 }));
    }
}
