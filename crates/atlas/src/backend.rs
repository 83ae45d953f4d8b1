//! Narrow interfaces to the collaborators that own real images and GPU work.
//!
//! The engine never touches pixels itself: it records intent in page queues and,
//! inside `advance`, hands ready sources to a [`BlitExecutor`].

use std::fmt;

use crate::{PageId, PixelRect, Rgba};

/// Loads and owns source images.
pub trait ImageProvider {
    type Handle: Clone + fmt::Debug;
    type GpuSource;

    fn is_ready(&self, handle: &Self::Handle) -> bool;

    fn pixel_size(&self, handle: &Self::Handle) -> (u32, u32);

    /// `None` when the handle cannot be bound; the blit is then dropped.
    fn bind_for_blit(&self, handle: &Self::Handle) -> Option<Self::GpuSource>;

    /// Creates a uniform-colour source used for fills and swatches.
    fn solid_color(&mut self, color: Rgba) -> Self::Handle;

    /// Called from inside `advance`, right after the blits that read `handle` were handed
    /// to the [`BlitExecutor`] and before the host submits them. An implementation that
    /// records GPU work must keep the underlying image alive until that work has executed.
    fn release(&mut self, handle: Self::Handle);
}

/// Records copy-with-transform commands into page surfaces.
pub trait BlitExecutor<Source> {
    type Surface: fmt::Debug;

    fn create_surface(&mut self, descriptor: &SurfaceDescriptor) -> Self::Surface;

    fn blit(
        &mut self,
        surface: &Self::Surface,
        dst: PixelRect,
        source: &Source,
        mode: BlitMode,
    ) -> Result<(), BlitError>;

    fn destroy_surface(&mut self, surface: Self::Surface);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub page: PageId,
    pub width: u32,
    pub height: u32,
    pub gamma_space: bool,
}

impl SurfaceDescriptor {
    pub const fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitMode {
    Identity,
    GammaToLinear,
    LinearToGamma,
}

impl BlitMode {
    /// Picks the conversion from a source's colour space into the page's.
    pub const fn select(page_gamma: bool, source_gamma: bool, preconverted: bool) -> Self {
        if preconverted {
            return BlitMode::Identity;
        }
        match (page_gamma, source_gamma) {
            (false, true) => BlitMode::GammaToLinear,
            (true, false) => BlitMode::LinearToGamma,
            _ => BlitMode::Identity,
        }
    }
}

/// Whether a source's pixels can be copied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState<H> {
    Pending(H),
    Ready(H),
}

impl<H> SourceState<H> {
    pub const fn handle(&self) -> &H {
        match self {
            SourceState::Pending(handle) | SourceState::Ready(handle) => handle,
        }
    }

    pub fn into_handle(self) -> H {
        match self {
            SourceState::Pending(handle) | SourceState::Ready(handle) => handle,
        }
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self, SourceState::Ready(_))
    }
}

/// What a queued blit copies from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlitSource<H> {
    Image {
        state: SourceState<H>,
        /// Hand the handle back to the provider once the blit has been applied or dropped.
        release_after_blit: bool,
    },
    Solid(Rgba),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitError {
    SurfaceLost,
    RectOutOfBounds,
}

impl fmt::Display for BlitError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlitError::SurfaceLost => write!(formatter, "page surface is no longer valid"),
            BlitError::RectOutOfBounds => {
                write!(formatter, "blit destination lies outside the page surface")
            }
        }
    }
}

impl std::error::Error for BlitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_mode_converts_between_spaces() {
        assert_eq!(BlitMode::select(false, true, false), BlitMode::GammaToLinear);
        assert_eq!(BlitMode::select(true, false, false), BlitMode::LinearToGamma);
        assert_eq!(BlitMode::select(true, true, false), BlitMode::Identity);
        assert_eq!(BlitMode::select(false, false, false), BlitMode::Identity);
    }

    #[test]
    fn preconverted_sources_skip_comparison() {
        assert_eq!(BlitMode::select(false, true, true), BlitMode::Identity);
        assert_eq!(BlitMode::select(true, false, true), BlitMode::Identity);
    }

    #[test]
    fn blit_errors_describe_executor_failures() {
        assert_eq!(BlitError::SurfaceLost.to_string(), "page surface is no longer valid");
        assert_eq!(
            BlitError::RectOutOfBounds.to_string(),
            "blit destination lies outside the page surface"
        );
    }

    #[test]
    fn source_state_exposes_handle() {
        let pending = SourceState::Pending(7u32);
        assert!(!pending.is_ready());
        assert_eq!(*pending.handle(), 7);
        assert_eq!(SourceState::Ready(9u32).into_handle(), 9);
    }
}
