//! Road stops (`ROAD`) and docks (`DOCK`). Each station chains its stops
//! of one kind through their `next` links.

use std::sync::LazyLock;

use railsave_core::chunk::{fixup_pool, load_pool, save_pool};
use railsave_core::conv::FileType;
use railsave_core::descriptor::{padding, reference_field, scalar_field};
use railsave_core::pool::Handle;
use railsave_core::{
    Availability, ChunkReader, ChunkTag, ChunkWriter, FixupContext, Link, Pool, Pooled, RefKind, Result, Schema,
    field,
};

use crate::ids::{INVALID_TILE, TileIndex};
use crate::world::World;

pub const ROAD: ChunkTag = ChunkTag::new(b"ROAD");
pub const DOCK: ChunkTag = ChunkTag::new(b"DOCK");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadStop {
    pub xy: TileIndex,
    pub status: u8,
    pub next: Link<RoadStop>,
}

impl Default for RoadStop {
    fn default() -> Self {
        Self::new(INVALID_TILE)
    }
}

impl RoadStop {
    pub fn new(xy: TileIndex) -> Self {
        Self {
            xy,
            status: 3,
            next: Link::Null,
        }
    }
}

impl Pooled for RoadStop {
    const KIND: RefKind = RefKind::RoadStop;
}

static ROAD_STOP_DESC: LazyLock<Schema<RoadStop>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U32, field!(RoadStop, xy)),
        padding(1).available(Availability::legacy_only(0, 44)),
        scalar_field(FileType::U8, field!(RoadStop, status)),
        padding(4).available(Availability::legacy_only(0, 8)),
        padding(2).available(Availability::legacy_only(0, 44)),
        padding(1).available(Availability::legacy_only(0, 25)),
        reference_field(field!(RoadStop, next)),
        padding(2).available(Availability::legacy_only(0, 44)),
        padding(4).available(Availability::legacy_only(0, 24)),
        padding(1).available(Availability::legacy_only(25, 25)),
    ])
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dock {
    pub xy: TileIndex,
    pub next: Link<Dock>,
}

impl Default for Dock {
    fn default() -> Self {
        Self::new(INVALID_TILE)
    }
}

impl Dock {
    pub fn new(xy: TileIndex) -> Self {
        Self { xy, next: Link::Null }
    }
}

impl Pooled for Dock {
    const KIND: RefKind = RefKind::Dock;
}

static DOCK_DESC: LazyLock<Schema<Dock>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U32, field!(Dock, xy)),
        reference_field(field!(Dock, next)),
    ])
});

/// Objects that chain to another of their kind.
pub trait Chained: Sized + 'static {
    fn next(&self) -> Link<Self>;
    fn xy(&self) -> TileIndex;
}

impl Chained for RoadStop {
    fn next(&self) -> Link<Self> {
        self.next
    }

    fn xy(&self) -> TileIndex {
        self.xy
    }
}

impl Chained for Dock {
    fn next(&self) -> Link<Self> {
        self.next
    }

    fn xy(&self) -> TileIndex {
        self.xy
    }
}

/// Tiles of the chain starting at `first`, at most one visit per object.
pub fn chain_tiles<T: Chained>(pool: &Pool<T>, first: Link<T>) -> Vec<TileIndex> {
    let mut tiles = Vec::new();
    let mut next: Option<Handle<T>> = first.handle();
    while let Some(handle) = next {
        if tiles.len() >= pool.len() {
            break;
        }
        let Some(obj) = pool.get(handle) else { break };
        tiles.push(obj.xy());
        next = obj.next().handle();
    }
    tiles
}

pub(crate) fn save_road(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.road_stops, &ROAD_STOP_DESC, &());
}

pub(crate) fn load_road(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.road_stops, &ROAD_STOP_DESC, &mut ())
}

pub(crate) fn fixup_road(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    fixup_pool(ROAD, &mut world.road_stops, &ROAD_STOP_DESC, &mut (), ctx)
}

pub(crate) fn save_dock(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.docks, &DOCK_DESC, &());
}

pub(crate) fn load_dock(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.docks, &DOCK_DESC, &mut ())
}

pub(crate) fn fixup_dock(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    fixup_pool(DOCK, &mut world.docks, &DOCK_DESC, &mut (), ctx)
}
