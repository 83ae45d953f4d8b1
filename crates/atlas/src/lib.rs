//! Packs many small images into a few large GPU atlas pages.
//!
//! Allocation is synchronous and cheap; the pixel copies it implies are queued on
//! each [`AtlasPage`] and applied later by [`AtlasAllocator::advance`] under a time budget.

use std::fmt;

mod allocator;
mod backend;
mod clock;
mod config;
mod grid;
mod key;
mod layout;
mod page;
mod swatch;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use allocator::{AtlasAllocator, TileEntry, TileSource};
pub use backend::{
    BlitError, BlitExecutor, BlitMode, BlitSource, ImageProvider, SourceState, SurfaceDescriptor,
};
pub use clock::{Budget, FrameClock, InstantClock};
pub use config::{AtlasConfig, AtlasConfigPatch, MAX_GROUP_SLOTS, PRECONVERTED_FORMAT_VERSION};
pub use grid::{CellTag, OccupancyGrid, QuadrantReservedGrid, find_room};
pub use key::{Id, PageId, SourceId, TileId, TileIdentity, TileRef};
pub use layout::{
    CellPoint, CellRect, CellSize, Footprint, PageLayout, PixelRect, Rgba, UvRect,
};
pub use page::{AdvanceStats, AtlasPage, BlitOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    TooLarge,
    NoRoom,
    ShapeMismatch,
    NotFound,
    InvalidRequest(InvalidRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRequest {
    EmptyTiles,
    TooManySlots,
    ReservedSourceId,
    ZeroSize,
    InvalidScale,
    MissingUrl,
    DuplicateUrl,
    PageOutOfRange,
}

impl fmt::Display for AllocError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::TooLarge => write!(formatter, "tile exceeds the usable page area"),
            AllocError::NoRoom => write!(formatter, "no page has room for the tile"),
            AllocError::ShapeMismatch => {
                write!(formatter, "tile footprint or slot count differs from its reservation")
            }
            AllocError::NotFound => write!(formatter, "tile not found"),
            AllocError::InvalidRequest(reason) => write!(formatter, "invalid request: {reason}"),
        }
    }
}

impl std::error::Error for AllocError {}

impl fmt::Display for InvalidRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRequest::EmptyTiles => write!(formatter, "tile list is empty"),
            InvalidRequest::TooManySlots => {
                write!(formatter, "group exceeds {MAX_GROUP_SLOTS} slots")
            }
            InvalidRequest::ReservedSourceId => write!(formatter, "source id 0 and 1 are reserved"),
            InvalidRequest::ZeroSize => write!(formatter, "tile has zero pixel size"),
            InvalidRequest::InvalidScale => write!(formatter, "scale must be finite and positive"),
            InvalidRequest::MissingUrl => write!(formatter, "token operation requires a url"),
            InvalidRequest::DuplicateUrl => write!(formatter, "url already has a reservation"),
            InvalidRequest::PageOutOfRange => write!(formatter, "page hint does not exist"),
        }
    }
}

impl From<InvalidRequest> for AllocError {
    fn from(value: InvalidRequest) -> Self {
        AllocError::InvalidRequest(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasCreateError {
    PageSizeZero,
    CellSizeZero,
    PageNotCellAligned,
    MarginTooLarge,
    InitialPagesZero,
    InitialPagesExceedMax,
    SwatchSizeInvalid,
}

impl fmt::Display for AtlasCreateError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasCreateError::PageSizeZero => write!(formatter, "page size must be non-zero"),
            AtlasCreateError::CellSizeZero => write!(formatter, "cell size must be non-zero"),
            AtlasCreateError::PageNotCellAligned => {
                write!(formatter, "page size must be a multiple of cell size")
            }
            AtlasCreateError::MarginTooLarge => write!(formatter, "margin leaves no usable area"),
            AtlasCreateError::InitialPagesZero => {
                write!(formatter, "at least one initial page is required")
            }
            AtlasCreateError::InitialPagesExceedMax => {
                write!(formatter, "initial page count exceeds max pages")
            }
            AtlasCreateError::SwatchSizeInvalid => {
                write!(formatter, "swatch size must be non-zero and divide cell size")
            }
        }
    }
}

impl std::error::Error for AtlasCreateError {}

#[cfg(test)]
mod tests;
