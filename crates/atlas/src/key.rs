use std::fmt;
use std::marker::PhantomData;

#[derive(PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Id<Tag, Repr> {
    raw: Repr,
    _marker: PhantomData<Tag>,
}

impl<Tag, Repr: Copy> Copy for Id<Tag, Repr> {}

impl<Tag, Repr: Copy> Clone for Id<Tag, Repr> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag, Repr: fmt::Debug> fmt::Debug for Id<Tag, Repr> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(formatter)
    }
}

impl<Tag, Repr> Id<Tag, Repr> {
    pub const fn new(raw: Repr) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn raw(self) -> Repr
    where
        Repr: Copy,
    {
        self.raw
    }
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageTag {}
pub type PageId = Id<PageTag, u32>;

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileTag {}
/// Allocation record id issued by an allocator. Never reused within one allocator.
pub type TileId = Id<TileTag, u64>;

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTag {}
/// Identity of a source image, chosen by the caller.
pub type SourceId = Id<SourceTag, u64>;

impl TileId {
    /// Owner tag of cells claimed by the colour swatch sub-allocator.
    pub const SWATCH: TileId = TileId::new(1);
    /// Owner of whole-page background fills.
    pub(crate) const BACKGROUND: TileId = TileId::new(0);
    pub(crate) const FIRST: u64 = 2;
}

impl SourceId {
    pub const INVALID: SourceId = SourceId::new(0);
    pub const RESERVED: SourceId = SourceId::new(1);

    pub const fn is_assignable(self) -> bool {
        self.raw > 1
    }
}

impl PageId {
    pub(crate) const fn index(self) -> usize {
        self.raw as usize
    }
}

/// Source ids of one logical tile: the primary image followed by up to three companions.
pub type TileIdentity = smallvec::SmallVec<[SourceId; 4]>;

/// Ways of naming a tile in lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileRef<'a> {
    Id(TileId),
    /// Any tile whose primary source is this id.
    Source(SourceId),
    /// A tile whose full source set matches exactly.
    Group(&'a [SourceId]),
    Url(&'a str),
}

impl From<TileId> for TileRef<'_> {
    fn from(value: TileId) -> Self {
        TileRef::Id(value)
    }
}

impl From<SourceId> for TileRef<'_> {
    fn from(value: SourceId) -> Self {
        TileRef::Source(value)
    }
}

impl<'a> From<&'a [SourceId]> for TileRef<'a> {
    fn from(value: &'a [SourceId]) -> Self {
        TileRef::Group(value)
    }
}

impl<'a> From<&'a str> for TileRef<'a> {
    fn from(value: &'a str) -> Self {
        TileRef::Url(value)
    }
}
