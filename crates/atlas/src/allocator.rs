use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::backend::{BlitExecutor, BlitMode, BlitSource, ImageProvider, SourceState};
use crate::clock::{Budget, FrameClock};
use crate::grid::{CellTag, OccupancyGrid, find_room};
use crate::page::{AdvanceStats, AtlasPage};
use crate::swatch::SwatchAtlas;
use crate::{
    AllocError, AtlasConfig, AtlasCreateError, CellPoint, CellRect, CellSize, Footprint,
    InvalidRequest, MAX_GROUP_SLOTS, PageId, PageLayout, SourceId, TileId, TileIdentity, TileRef,
    UvRect,
};

/// One slot of a tile request: a source image and how to copy it.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSource<H> {
    pub id: SourceId,
    pub url: Option<SmolStr>,
    pub width: u32,
    pub height: u32,
    /// Whether the source pixels are gamma encoded.
    pub gamma: bool,
    pub state: SourceState<H>,
    pub release_after_blit: bool,
}

impl<H> TileSource<H> {
    pub fn new(id: SourceId, state: SourceState<H>, width: u32, height: u32) -> Self {
        Self {
            id,
            url: None,
            width,
            height,
            gamma: false,
            state,
            release_after_blit: false,
        }
    }

    pub fn ready(id: SourceId, handle: H, width: u32, height: u32) -> Self {
        Self::new(id, SourceState::Ready(handle), width, height)
    }

    pub fn pending(id: SourceId, handle: H, width: u32, height: u32) -> Self {
        Self::new(id, SourceState::Pending(handle), width, height)
    }

    pub fn with_url(mut self, url: impl Into<SmolStr>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_gamma(mut self, gamma: bool) -> Self {
        self.gamma = gamma;
        self
    }

    /// Hands the handle back to the provider after its blit.
    pub fn released_after_blit(mut self) -> Self {
        self.release_after_blit = true;
        self
    }
}

/// Allocation record for one placed tile or token.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntry {
    pub id: TileId,
    /// Primary source followed by companions; empty while the entry is a token.
    pub identity: TileIdentity,
    pub url: Option<SmolStr>,
    /// Page of the first slot. Further slots occupy the following pages.
    pub page: PageId,
    pub cells: CellRect,
    pub uv: UvRect,
    pub scale: f32,
    pub footprint: Footprint,
    pub slot_count: u32,
    pub is_token: bool,
}

impl TileEntry {
    pub fn primary(&self) -> Option<SourceId> {
        self.identity.first().copied()
    }

    pub fn slot_pages(&self) -> impl Iterator<Item = PageId> {
        let first = self.page.raw();
        (first..first + self.slot_count).map(PageId::new)
    }
}

pub struct AtlasAllocator<H, S> {
    pub(crate) config: AtlasConfig,
    pub(crate) layout: PageLayout,
    pub(crate) pages: Vec<AtlasPage<H, S>>,
    pub(crate) swatches: SwatchAtlas,
    entries: BTreeMap<TileId, TileEntry>,
    by_identity: HashMap<TileIdentity, Vec<TileId>>,
    by_primary: HashMap<SourceId, Vec<TileId>>,
    by_url: HashMap<SmolStr, TileId>,
    next_tile: u64,
    destroyed: bool,
}

impl<H: fmt::Debug, S: fmt::Debug> fmt::Debug for AtlasAllocator<H, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AtlasAllocator")
            .field("layout", &self.layout)
            .field("pages", &self.pages.len())
            .field("entries", &self.entries.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl<H: Clone + fmt::Debug, S> AtlasAllocator<H, S> {
    pub fn new(config: AtlasConfig) -> Result<Self, AtlasCreateError> {
        config.validate()?;
        let layout = PageLayout::from_config(&config);
        let mut allocator = Self {
            swatches: SwatchAtlas::new(&config),
            layout,
            pages: Vec::with_capacity(config.initial_pages as usize),
            entries: BTreeMap::new(),
            by_identity: HashMap::new(),
            by_primary: HashMap::new(),
            by_url: HashMap::new(),
            next_tile: TileId::FIRST,
            destroyed: false,
            config,
        };
        for _ in 0..allocator.config.initial_pages {
            allocator.push_page();
        }
        debug!(
            "atlas allocator created pages={} page_size={}x{} cell_size={}",
            allocator.pages.len(),
            layout.width,
            layout.height,
            layout.cell_size
        );
        Ok(allocator)
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub const fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn page(&self, page: PageId) -> Option<&AtlasPage<H, S>> {
        self.pages.get(page.index())
    }

    pub fn pages(&self) -> &[AtlasPage<H, S>] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn entry(&self, id: TileId) -> Option<&TileEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TileEntry> + '_ {
        self.entries.values()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Places `tiles` (one slot per source) and queues their blits.
    ///
    /// Either every slot is reserved and queued or the allocator is left unchanged.
    pub fn allocate(
        &mut self,
        tiles: &[TileSource<H>],
        scale: f32,
        page_hint: Option<PageId>,
    ) -> Result<TileId, AllocError> {
        let identity = validate_identity(tiles)?;
        let footprint = self.footprint_of(&tiles[0], scale)?;
        self.check_hint(page_hint)?;

        if self.config.dedup {
            if let Some(existing) = self.find_by_identity(&identity) {
                return Ok(existing);
            }
        }
        if let Some(url) = &tiles[0].url {
            if let Some(&existing) = self.by_url.get(url) {
                // A token keeps its url until `resolve_token` fills it.
                let is_token = self.entries.get(&existing).is_some_and(|entry| entry.is_token);
                if self.config.dedup && !is_token {
                    return Ok(existing);
                }
                return Err(InvalidRequest::DuplicateUrl.into());
            }
        }

        let slot_count = tiles.len() as u32;
        let (page, origin) = self.place(footprint.cells, tiles.len(), page_hint)?;
        let id = self.issue_id();
        let cells = CellRect::new(origin, footprint.cells);
        self.reserve_cells(page, cells, slot_count, CellTag::Owned(id));
        self.enqueue_tile_blits(id, page, cells, tiles);
        self.insert_entry(TileEntry {
            id,
            identity,
            url: tiles[0].url.clone(),
            page,
            cells,
            uv: self.layout.uv(cells),
            scale,
            footprint,
            slot_count,
            is_token: false,
        });
        Ok(id)
    }

    /// Claims space for a tile whose pixels are not known yet.
    pub fn reserve_token(
        &mut self,
        url: &str,
        width: u32,
        height: u32,
        slot_count: u32,
        scale: f32,
        page_hint: Option<PageId>,
    ) -> Result<TileId, AllocError> {
        if url.is_empty() {
            return Err(InvalidRequest::MissingUrl.into());
        }
        if slot_count == 0 {
            return Err(InvalidRequest::EmptyTiles.into());
        }
        if slot_count as usize > MAX_GROUP_SLOTS {
            return Err(InvalidRequest::TooManySlots.into());
        }
        let footprint =
            self.layout
                .footprint(width, height, scale, self.config.max_tile_pixels)?;
        self.check_hint(page_hint)?;

        if let Some(&existing) = self.by_url.get(url) {
            if self.config.dedup {
                return Ok(existing);
            }
            return Err(InvalidRequest::DuplicateUrl.into());
        }

        let (page, origin) = self.place(footprint.cells, slot_count as usize, page_hint)?;
        let id = self.issue_id();
        let cells = CellRect::new(origin, footprint.cells);
        self.reserve_cells(page, cells, slot_count, CellTag::Reserved(id));
        self.insert_entry(TileEntry {
            id,
            identity: TileIdentity::new(),
            url: Some(SmolStr::new(url)),
            page,
            cells,
            uv: self.layout.uv(cells),
            scale,
            footprint,
            slot_count,
            is_token: true,
        });
        debug!("token reserved url={url} tile={id:?} page={page:?}");
        Ok(id)
    }

    /// Turns the token named by `tiles[0].url` into a real tile in place.
    ///
    /// On `ShapeMismatch` the token keeps its reservation untouched.
    pub fn resolve_token(
        &mut self,
        tiles: &[TileSource<H>],
        scale: f32,
    ) -> Result<TileId, AllocError> {
        let identity = validate_identity(tiles)?;
        let url = tiles[0]
            .url
            .as_ref()
            .ok_or(InvalidRequest::MissingUrl)?;
        let id = *self.by_url.get(url).ok_or(AllocError::NotFound)?;
        let entry = self.entries.get(&id).ok_or(AllocError::NotFound)?;
        if !entry.is_token {
            return if entry.identity == identity {
                Ok(id)
            } else {
                Err(AllocError::NotFound)
            };
        }
        let footprint = self.footprint_of(&tiles[0], scale)?;
        if tiles.len() as u32 != entry.slot_count || footprint.cells != entry.footprint.cells {
            return Err(AllocError::ShapeMismatch);
        }

        let (page, cells, slot_count) = (entry.page, entry.cells, entry.slot_count);
        for page in slot_range(page, slot_count) {
            let retagged = self.pages[page].occupancy_mut().retag(
                cells,
                CellTag::Reserved(id),
                CellTag::Owned(id),
            );
            assert!(retagged, "token cells lost their reservation");
        }
        self.enqueue_tile_blits(id, page, cells, tiles);

        let entry = self
            .entries
            .get_mut(&id)
            .expect("token entry disappeared during resolution");
        entry.identity = identity.clone();
        entry.scale = scale;
        entry.footprint = footprint;
        entry.is_token = false;
        self.index_identity(id, &identity);
        debug!("token resolved url={url} tile={id:?}");
        Ok(id)
    }

    /// Re-blits new content of identical shape into an existing tile.
    pub fn update(&mut self, tiles: &[TileSource<H>], scale: f32) -> Result<TileId, AllocError> {
        let identity = validate_identity(tiles)?;
        let id = self
            .by_identity
            .get(&identity)
            .and_then(|ids| ids.last())
            .copied()
            .ok_or(AllocError::NotFound)?;
        let entry = self.entries.get(&id).ok_or(AllocError::NotFound)?;
        let footprint = self.footprint_of(&tiles[0], scale)?;
        if entry.scale.to_bits() != scale.to_bits()
            || footprint.cells != entry.footprint.cells
            || tiles.len() as u32 != entry.slot_count
        {
            return Err(AllocError::ShapeMismatch);
        }
        let (page, cells, slot_count) = (entry.page, entry.cells, entry.slot_count);
        for page in slot_range(page, slot_count) {
            self.pages[page].cancel_ops(id);
        }
        self.enqueue_tile_blits(id, page, cells, tiles);
        Ok(id)
    }

    /// Releases a tile's cells on every slot page and paints them with the background.
    ///
    /// `page` restricts the lookup to tiles whose first slot lives there.
    pub fn free<'a>(
        &mut self,
        tile: impl Into<TileRef<'a>>,
        page: Option<PageId>,
    ) -> Result<(), AllocError> {
        let id = self
            .resolve_ref(tile.into(), page)
            .ok_or(AllocError::NotFound)?;
        let entry = self.remove_entry(id).ok_or(AllocError::NotFound)?;
        let fill = self.layout.cell_pixels(entry.cells);
        let background = self.config.background;
        for index in slot_range(entry.page, entry.slot_count) {
            let page = &mut self.pages[index];
            page.cancel_ops(id);
            let released = page.occupancy_mut().release(entry.cells, id);
            debug_assert_eq!(
                released,
                (entry.cells.width * entry.cells.height) as usize,
                "freed tile did not own its whole rect"
            );
            page.fill_color(id, fill, background);
        }
        debug!("tile freed tile={id:?} page={:?}", entry.page);
        Ok(())
    }

    pub fn get<'a>(
        &self,
        tile: impl Into<TileRef<'a>>,
        page: Option<PageId>,
    ) -> Option<(PageId, UvRect)> {
        let id = self.resolve_ref(tile.into(), page)?;
        self.entries.get(&id).map(|entry| (entry.page, entry.uv))
    }

    /// Dry run: whether `tiles` would fit starting at `page` without growing.
    pub fn is_space_enough(&self, tiles: &[TileSource<H>], scale: f32, page: PageId) -> bool {
        if validate_identity(tiles).is_err() || page.index() >= self.pages.len() {
            return false;
        }
        self.footprint_of(&tiles[0], scale)
            .ok()
            .and_then(|footprint| self.search(footprint.cells, tiles.len(), Some(page)))
            .is_some()
    }

    /// Dry run: first page where `tiles` would be placed without growing.
    pub fn find_page_with_room(&self, tiles: &[TileSource<H>], scale: f32) -> Option<PageId> {
        validate_identity(tiles).ok()?;
        let footprint = self.footprint_of(&tiles[0], scale).ok()?;
        self.search(footprint.cells, tiles.len(), None)
            .map(|(page, _)| page)
    }

    /// Advances every page in order under one shared budget.
    pub fn advance<P, X>(
        &mut self,
        provider: &mut P,
        executor: &mut X,
        clock: &dyn FrameClock,
        budget_ms: f64,
        force: bool,
    ) -> AdvanceStats
    where
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        let budget = if force {
            Budget::unbounded()
        } else {
            Budget::start(clock, budget_ms)
        };
        self.advance_within(provider, executor, &budget)
    }

    pub fn advance_within<P, X>(
        &mut self,
        provider: &mut P,
        executor: &mut X,
        budget: &Budget<'_>,
    ) -> AdvanceStats
    where
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        let mut stats = AdvanceStats::default();
        let mut visited = false;
        for page in &mut self.pages {
            if page.is_idle() {
                continue;
            }
            if visited && budget.exhausted() {
                stats.budget_exhausted = true;
                break;
            }
            visited = true;
            let page_stats = page.advance_within(provider, executor, budget);
            stats.accumulate(page_stats);
            if page_stats.budget_exhausted {
                break;
            }
        }
        stats
    }

    /// Forgets every tile, token and swatch and paints created surfaces with the background.
    pub fn empty(&mut self) {
        let background = self.config.background;
        for page in &mut self.pages {
            page.clear_queues();
            page.occupancy_mut().clear();
            if page.surface().is_some() {
                let rect = page.layout().page_pixels();
                page.fill_color(TileId::BACKGROUND, rect, background);
            }
        }
        self.entries.clear();
        self.by_identity.clear();
        self.by_primary.clear();
        self.by_url.clear();
        self.swatches.clear();
        debug!("atlas emptied pages={}", self.pages.len());
    }

    /// Releases every page. Safe to call repeatedly; the allocator never grows afterwards.
    pub fn destroy<P, X>(&mut self, provider: &mut P, executor: &mut X)
    where
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        for page in &mut self.pages {
            page.destroy(provider, executor);
        }
        if !self.destroyed {
            debug!("atlas destroyed pages={}", self.pages.len());
        }
        self.pages.clear();
        self.entries.clear();
        self.by_identity.clear();
        self.by_primary.clear();
        self.by_url.clear();
        self.swatches.clear();
        self.destroyed = true;
    }

    /// Fraction of cells in use across all pages.
    pub fn load_rate(&self) -> f64 {
        let (used, total) = self.pages.iter().fold((0usize, 0usize), |(used, total), page| {
            let grid = page.occupancy();
            (used + grid.used_count(), total + grid.cell_count())
        });
        if total == 0 {
            return 0.0;
        }
        used as f64 / total as f64
    }

    /// Bytes held by page surfaces that have been created.
    pub fn gpu_memory(&self) -> u64 {
        self.pages.iter().map(AtlasPage::surface_bytes).sum()
    }

    pub fn pending_ops(&self) -> usize {
        self.pages
            .iter()
            .map(|page| page.pending_blits() + page.pending_unready())
            .sum()
    }

    pub(crate) fn grow(&mut self, count: u32) -> Option<PageId> {
        if self.destroyed || !self.config.auto_grow {
            return None;
        }
        let current = self.pages.len() as u32;
        if current + count > self.config.max_pages {
            debug!(
                "atlas growth refused pages={current} requested={count} max={}",
                self.config.max_pages
            );
            return None;
        }
        let first = PageId::new(current);
        for _ in 0..count {
            self.push_page();
        }
        debug!("atlas grew by {count} pages to {}", self.pages.len());
        Some(first)
    }

    fn push_page(&mut self) -> PageId {
        let index = u32::try_from(self.pages.len()).expect("page count overflow");
        let id = PageId::new(index);
        self.pages
            .push(AtlasPage::new(id, self.layout, self.config.gamma_space));
        id
    }

    fn issue_id(&mut self) -> TileId {
        let id = TileId::new(self.next_tile);
        self.next_tile = self.next_tile.checked_add(1).expect("tile id overflow");
        id
    }

    fn footprint_of(&self, tile: &TileSource<H>, scale: f32) -> Result<Footprint, AllocError> {
        self.layout
            .footprint(tile.width, tile.height, scale, self.config.max_tile_pixels)
    }

    fn check_hint(&self, page_hint: Option<PageId>) -> Result<(), AllocError> {
        match page_hint {
            Some(page) if page.index() >= self.pages.len() => {
                Err(InvalidRequest::PageOutOfRange.into())
            }
            _ => Ok(()),
        }
    }

    fn find_by_identity(&self, identity: &[SourceId]) -> Option<TileId> {
        self.by_identity
            .get(identity)?
            .iter()
            .copied()
            .find(|id| self.entries.get(id).is_some_and(|entry| !entry.is_token))
    }

    /// First-fit search over candidate start pages; `slot_count` consecutive grids must agree.
    fn search(
        &self,
        cells: CellSize,
        slot_count: usize,
        page_hint: Option<PageId>,
    ) -> Option<(PageId, CellPoint)> {
        let starts = match page_hint {
            Some(page) => page.index()..page.index() + 1,
            None => 0..self.pages.len(),
        };
        for start in starts {
            let end = start + slot_count;
            if end > self.pages.len() {
                break;
            }
            let grids: SmallVec<[&OccupancyGrid; MAX_GROUP_SLOTS]> = self.pages[start..end]
                .iter()
                .map(AtlasPage::occupancy)
                .collect();
            if let Some(origin) = find_room(&grids, cells.width, cells.height) {
                return Some((self.pages[start].id(), origin));
            }
        }
        None
    }

    /// Searches, then grows by `slot_count` pages and retries once.
    fn place(
        &mut self,
        cells: CellSize,
        slot_count: usize,
        page_hint: Option<PageId>,
    ) -> Result<(PageId, CellPoint), AllocError> {
        if let Some(found) = self.search(cells, slot_count, page_hint) {
            return Ok(found);
        }
        if page_hint.is_some() {
            return Err(AllocError::NoRoom);
        }
        self.grow(slot_count as u32).ok_or(AllocError::NoRoom)?;
        self.search(cells, slot_count, None)
            .ok_or(AllocError::NoRoom)
    }

    fn reserve_cells(&mut self, page: PageId, cells: CellRect, slot_count: u32, tag: CellTag) {
        for index in slot_range(page, slot_count) {
            let reserved = self.pages[index].occupancy_mut().reserve(cells, tag);
            assert!(reserved, "occupancy search returned cells that are not free");
        }
    }

    fn enqueue_tile_blits(
        &mut self,
        id: TileId,
        page: PageId,
        cells: CellRect,
        tiles: &[TileSource<H>],
    ) {
        let dst = self.layout.interior(cells);
        let margin = self.layout.margin;
        let preconverted = self.config.preconverted_sources();
        for (slot, tile) in tiles.iter().enumerate() {
            let page = &mut self.pages[page.index() + slot];
            let mode = BlitMode::select(page.gamma_space(), tile.gamma, preconverted);
            let source = BlitSource::Image {
                state: tile.state.clone(),
                release_after_blit: tile.release_after_blit,
            };
            page.enqueue_blit(id, dst, source, margin, mode);
        }
    }

    fn insert_entry(&mut self, entry: TileEntry) {
        let id = entry.id;
        if !entry.identity.is_empty() {
            let identity = entry.identity.clone();
            self.index_identity(id, &identity);
        }
        if let Some(url) = &entry.url {
            self.by_url.insert(url.clone(), id);
        }
        self.entries.insert(id, entry);
    }

    fn index_identity(&mut self, id: TileId, identity: &TileIdentity) {
        self.by_identity.entry(identity.clone()).or_default().push(id);
        if let Some(&primary) = identity.first() {
            self.by_primary.entry(primary).or_default().push(id);
        }
    }

    fn remove_entry(&mut self, id: TileId) -> Option<TileEntry> {
        let entry = self.entries.remove(&id)?;
        if !entry.identity.is_empty() {
            remove_index(&mut self.by_identity, &entry.identity, id);
        }
        if let Some(primary) = entry.primary() {
            remove_index(&mut self.by_primary, &primary, id);
        }
        if let Some(url) = &entry.url {
            if self.by_url.get(url) == Some(&id) {
                self.by_url.remove(url);
            }
        }
        Some(entry)
    }

    fn resolve_ref(&self, tile: TileRef<'_>, page: Option<PageId>) -> Option<TileId> {
        let on_page = |id: &TileId| {
            self.entries
                .get(id)
                .is_some_and(|entry| page.is_none_or(|page| entry.page == page))
        };
        match tile {
            TileRef::Id(id) => Some(id).filter(on_page),
            TileRef::Source(source) => self.by_primary.get(&source)?.iter().copied().find(on_page),
            TileRef::Group(sources) => self.by_identity.get(sources)?.iter().copied().find(on_page),
            TileRef::Url(url) => self.by_url.get(url).copied().filter(on_page),
        }
    }
}

fn validate_identity<H>(tiles: &[TileSource<H>]) -> Result<TileIdentity, AllocError> {
    if tiles.is_empty() {
        return Err(InvalidRequest::EmptyTiles.into());
    }
    if tiles.len() > MAX_GROUP_SLOTS {
        return Err(InvalidRequest::TooManySlots.into());
    }
    if tiles.iter().any(|tile| !tile.id.is_assignable()) {
        return Err(InvalidRequest::ReservedSourceId.into());
    }
    Ok(tiles.iter().map(|tile| tile.id).collect())
}

fn slot_range(page: PageId, slot_count: u32) -> std::ops::Range<usize> {
    page.index()..page.index() + slot_count as usize
}

fn remove_index<K, Q>(index: &mut HashMap<K, Vec<TileId>>, key: &Q, id: TileId)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
