//! Deterministic collaborators for tests. Enabled with the `test-helpers` feature.

use std::cell::Cell;
use std::collections::HashMap;

use crate::{
    BlitError, BlitExecutor, BlitMode, FrameClock, ImageProvider, PageId, PixelRect, Rgba,
    SurfaceDescriptor,
};

/// Clock that returns a fixed sequence of readings, then repeats the last one.
#[derive(Debug, Default)]
pub struct ScriptedClock {
    readings: Vec<f64>,
    cursor: Cell<usize>,
}

impl ScriptedClock {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            cursor: Cell::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.cursor.get()
    }
}

impl FrameClock for ScriptedClock {
    fn elapsed_ms(&self) -> f64 {
        let cursor = self.cursor.get();
        self.cursor.set(cursor + 1);
        let index = cursor.min(self.readings.len().saturating_sub(1));
        self.readings.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeImage {
    width: u32,
    height: u32,
    ready: bool,
}

const SOLID_HANDLE_BASE: u64 = 1 << 32;

/// Image provider keyed by plain `u64` handles whose readiness tests flip by hand.
#[derive(Debug, Default)]
pub struct FakeImages {
    images: HashMap<u64, FakeImage>,
    pub solid_colors: Vec<Rgba>,
    pub released: Vec<u64>,
}

impl FakeImages {
    pub fn insert_ready(&mut self, handle: u64, width: u32, height: u32) {
        self.images.insert(
            handle,
            FakeImage {
                width,
                height,
                ready: true,
            },
        );
    }

    pub fn insert_pending(&mut self, handle: u64, width: u32, height: u32) {
        self.images.insert(
            handle,
            FakeImage {
                width,
                height,
                ready: false,
            },
        );
    }

    pub fn mark_ready(&mut self, handle: u64) {
        if let Some(image) = self.images.get_mut(&handle) {
            image.ready = true;
        }
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }
}

impl ImageProvider for FakeImages {
    type Handle = u64;
    type GpuSource = u64;

    fn is_ready(&self, handle: &u64) -> bool {
        self.images.get(handle).is_some_and(|image| image.ready)
    }

    fn pixel_size(&self, handle: &u64) -> (u32, u32) {
        self.images
            .get(handle)
            .map_or((0, 0), |image| (image.width, image.height))
    }

    fn bind_for_blit(&self, handle: &u64) -> Option<u64> {
        self.images
            .get(handle)
            .filter(|image| image.ready)
            .map(|_| *handle)
    }

    fn solid_color(&mut self, color: Rgba) -> u64 {
        let handle = SOLID_HANDLE_BASE + self.solid_colors.len() as u64;
        self.solid_colors.push(color);
        self.insert_ready(handle, 1, 1);
        handle
    }

    fn release(&mut self, handle: u64) {
        self.images.remove(&handle);
        self.released.push(handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBlit {
    pub page: PageId,
    pub dst: PixelRect,
    pub source: u64,
    pub mode: BlitMode,
}

/// Executor that records every blit instead of drawing.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    pub blits: Vec<RecordedBlit>,
    pub surfaces_created: usize,
    pub surfaces_destroyed: usize,
    /// Makes every blit fail with [`BlitError::SurfaceLost`].
    pub fail_blits: bool,
}

impl RecordingExecutor {
    pub fn blits_on(&self, page: PageId) -> impl Iterator<Item = &RecordedBlit> + '_ {
        self.blits.iter().filter(move |blit| blit.page == page)
    }
}

impl BlitExecutor<u64> for RecordingExecutor {
    type Surface = SurfaceDescriptor;

    fn create_surface(&mut self, descriptor: &SurfaceDescriptor) -> SurfaceDescriptor {
        self.surfaces_created += 1;
        *descriptor
    }

    fn blit(
        &mut self,
        surface: &SurfaceDescriptor,
        dst: PixelRect,
        source: &u64,
        mode: BlitMode,
    ) -> Result<(), BlitError> {
        if self.fail_blits {
            return Err(BlitError::SurfaceLost);
        }
        let inside = dst.x >= 0
            && dst.y >= 0
            && dst.x as u64 + dst.width as u64 <= surface.width as u64
            && dst.y as u64 + dst.height as u64 <= surface.height as u64;
        if !inside {
            return Err(BlitError::RectOutOfBounds);
        }
        self.blits.push(RecordedBlit {
            page: surface.page,
            dst,
            source: *source,
            mode,
        });
        Ok(())
    }

    fn destroy_surface(&mut self, _surface: SurfaceDescriptor) {
        self.surfaces_destroyed += 1;
    }
}
