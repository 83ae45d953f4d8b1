use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::backend::{
    BlitExecutor, BlitMode, BlitSource, ImageProvider, SourceState, SurfaceDescriptor,
};
use crate::clock::{Budget, FrameClock};
use crate::grid::OccupancyGrid;
use crate::layout::{PageLayout, PixelRect};
use crate::{PageId, Rgba, TileId};

/// One pending copy into a page surface.
#[derive(Debug, Clone, PartialEq)]
pub struct BlitOp<H> {
    pub owner: TileId,
    pub dst: PixelRect,
    pub source: BlitSource<H>,
    pub margin: u32,
    pub mode: BlitMode,
}

impl<H> BlitOp<H> {
    fn is_ready(&self) -> bool {
        match &self.source {
            BlitSource::Image { state, .. } => state.is_ready(),
            BlitSource::Solid(_) => true,
        }
    }

    /// Handle the page must give back if this op never runs.
    fn into_owned_handle(self) -> Option<H> {
        match self.source {
            BlitSource::Image {
                state,
                release_after_blit: true,
            } => Some(state.into_handle()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceStats {
    pub blits_applied: u32,
    pub ops_dropped: u32,
    pub budget_exhausted: bool,
}

impl AdvanceStats {
    pub fn accumulate(&mut self, other: AdvanceStats) {
        self.blits_applied += other.blits_applied;
        self.ops_dropped += other.ops_dropped;
        self.budget_exhausted |= other.budget_exhausted;
    }
}

/// A GPU surface plus the deferred work that writes into it.
#[derive(Debug)]
pub struct AtlasPage<H, S> {
    id: PageId,
    layout: PageLayout,
    gamma_space: bool,
    surface: Option<S>,
    occupancy: OccupancyGrid,
    pending_blits: VecDeque<BlitOp<H>>,
    pending_unready: VecDeque<BlitOp<H>>,
    to_destroy: Vec<H>,
}

impl<H: Clone + std::fmt::Debug, S> AtlasPage<H, S> {
    pub fn new(id: PageId, layout: PageLayout, gamma_space: bool) -> Self {
        Self {
            id,
            layout,
            gamma_space,
            surface: None,
            occupancy: OccupancyGrid::new(layout.columns(), layout.rows()),
            pending_blits: VecDeque::new(),
            pending_unready: VecDeque::new(),
            to_destroy: Vec::new(),
        }
    }

    pub const fn id(&self) -> PageId {
        self.id
    }

    pub const fn layout(&self) -> PageLayout {
        self.layout
    }

    pub const fn width(&self) -> u32 {
        self.layout.width
    }

    pub const fn height(&self) -> u32 {
        self.layout.height
    }

    pub const fn gamma_space(&self) -> bool {
        self.gamma_space
    }

    /// `None` until the first blit has been applied.
    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn occupancy(&self) -> &OccupancyGrid {
        &self.occupancy
    }

    pub(crate) fn occupancy_mut(&mut self) -> &mut OccupancyGrid {
        &mut self.occupancy
    }

    pub fn pending_blits(&self) -> usize {
        self.pending_blits.len()
    }

    pub fn pending_unready(&self) -> usize {
        self.pending_unready.len()
    }

    /// No queued blits and no handles waiting to be released.
    pub fn is_idle(&self) -> bool {
        self.pending_blits.is_empty() && self.pending_unready.is_empty() && self.to_destroy.is_empty()
    }

    pub fn surface_bytes(&self) -> u64 {
        if self.surface.is_some() {
            self.descriptor().byte_size()
        } else {
            0
        }
    }

    pub fn descriptor(&self) -> SurfaceDescriptor {
        SurfaceDescriptor {
            page: self.id,
            width: self.layout.width,
            height: self.layout.height,
            gamma_space: self.gamma_space,
        }
    }

    /// Queues a copy; sources that are not loaded yet wait in the unready queue.
    pub fn enqueue_blit(
        &mut self,
        owner: TileId,
        dst: PixelRect,
        source: BlitSource<H>,
        margin: u32,
        mode: BlitMode,
    ) {
        let op = BlitOp {
            owner,
            dst,
            source,
            margin,
            mode,
        };
        if op.is_ready() {
            self.pending_blits.push_back(op);
        } else {
            self.pending_unready.push_back(op);
        }
    }

    pub fn fill_color(&mut self, owner: TileId, rect: PixelRect, color: Rgba) {
        self.enqueue_blit(owner, rect, BlitSource::Solid(color), 0, BlitMode::Identity);
    }

    /// Drops every queued op written on behalf of `owner`.
    pub(crate) fn cancel_ops(&mut self, owner: TileId) -> usize {
        let mut cancelled = 0usize;
        for queue in [&mut self.pending_blits, &mut self.pending_unready] {
            let mut kept = VecDeque::with_capacity(queue.len());
            for op in queue.drain(..) {
                if op.owner == owner {
                    cancelled += 1;
                    if let Some(handle) = op.into_owned_handle() {
                        self.to_destroy.push(handle);
                    }
                } else {
                    kept.push_back(op);
                }
            }
            *queue = kept;
        }
        cancelled
    }

    /// Drops every queued op without applying it.
    pub(crate) fn clear_queues(&mut self) {
        let pending = self.pending_blits.drain(..);
        let unready = self.pending_unready.drain(..);
        for op in pending.chain(unready) {
            if let Some(handle) = op.into_owned_handle() {
                self.to_destroy.push(handle);
            }
        }
    }

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

    /// Promotes loaded sources, then applies queued blits until `budget` runs out.
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

        // Scanned in place so entries that stay unready keep their queue order.
        let mut index = 0;
        while index < self.pending_unready.len() {
            let op = &mut self.pending_unready[index];
            if let BlitSource::Image { state, .. } = &mut op.source {
                if provider.is_ready(state.handle()) {
                    *state = SourceState::Ready(state.handle().clone());
                }
            }
            if op.is_ready() {
                if let Some(op) = self.pending_unready.remove(index) {
                    self.pending_blits.push_back(op);
                }
            } else {
                index += 1;
            }
            if budget.exhausted() {
                stats.budget_exhausted = true;
                break;
            }
        }

        if !stats.budget_exhausted {
            while let Some(op) = self.pending_blits.pop_front() {
                if self.apply(op, provider, executor) {
                    stats.blits_applied += 1;
                } else {
                    stats.ops_dropped += 1;
                }
                if !self.pending_blits.is_empty() && budget.exhausted() {
                    stats.budget_exhausted = true;
                    break;
                }
            }
        }

        for handle in self.to_destroy.drain(..) {
            provider.release(handle);
        }
        stats
    }

    fn apply<P, X>(&mut self, op: BlitOp<H>, provider: &mut P, executor: &mut X) -> bool
    where
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        let descriptor = self.descriptor();
        let surface = self.surface.get_or_insert_with(|| {
            debug!(
                "creating atlas page surface page={:?} size={}x{}",
                descriptor.page, descriptor.width, descriptor.height
            );
            executor.create_surface(&descriptor)
        });

        let (handle, release) = match op.source {
            BlitSource::Image {
                state,
                release_after_blit,
            } => (state.into_handle(), release_after_blit),
            BlitSource::Solid(color) => (provider.solid_color(color), true),
        };

        let applied = match provider.bind_for_blit(&handle) {
            None => {
                warn!(
                    "dropping blit on page {:?}: source {:?} cannot be bound",
                    self.id, handle
                );
                false
            }
            Some(source) => {
                trace!(
                    "blit page={:?} dst={:?} margin={} mode={:?}",
                    self.id, op.dst, op.margin, op.mode
                );
                let bleed = if op.margin > 0 {
                    executor.blit(surface, op.dst.expand(op.margin), &source, op.mode)
                } else {
                    Ok(())
                };
                match bleed.and_then(|()| executor.blit(surface, op.dst, &source, op.mode)) {
                    Ok(()) => true,
                    Err(error) => {
                        warn!("dropping blit on page {:?}: {error}", self.id);
                        false
                    }
                }
            }
        };

        if release {
            self.to_destroy.push(handle);
        }
        applied
    }

    /// Drops queued work and releases the surface. Safe to call repeatedly.
    pub fn destroy<P, X>(&mut self, provider: &mut P, executor: &mut X)
    where
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        self.clear_queues();
        for handle in self.to_destroy.drain(..) {
            provider.release(handle);
        }
        if let Some(surface) = self.surface.take() {
            debug!("destroying atlas page surface page={:?}", self.id);
            executor.destroy_surface(surface);
        }
        self.occupancy.clear();
    }
}
