//! Persistent storage arrays of airports and industries (`PSAC`).

use std::sync::LazyLock;

use railsave_core::chunk::{load_pool, save_pool};
use railsave_core::conv::FileType;
use railsave_core::descriptor::{array_field, scalar_field};
use railsave_core::{Availability, ChunkReader, ChunkTag, ChunkWriter, Pooled, RefKind, Result, Schema, field};

use crate::ids::{INVALID_TILE, TileIndex};
use crate::world::World;

pub const PSAC: ChunkTag = ChunkTag::new(b"PSAC");

/// Registers per storage array.
pub const STORAGE_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentStorage {
    pub grfid: u32,
    pub feature: u8,
    pub tile: TileIndex,
    pub storage: [u32; STORAGE_LEN],
}

impl Default for PersistentStorage {
    fn default() -> Self {
        Self {
            grfid: 0,
            feature: 0,
            tile: INVALID_TILE,
            storage: [0; STORAGE_LEN],
        }
    }
}

impl PersistentStorage {
    pub fn with_registers(storage: [u32; STORAGE_LEN]) -> Self {
        Self {
            storage,
            ..Default::default()
        }
    }
}

impl Pooled for PersistentStorage {
    const KIND: RefKind = RefKind::Storage;
}

static STORAGE_DESC: LazyLock<Schema<PersistentStorage>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U32, field!(PersistentStorage, grfid)),
        scalar_field(FileType::U8, field!(PersistentStorage, feature)).available(Availability::since(10)),
        scalar_field(FileType::U32, field!(PersistentStorage, tile)).available(Availability::since(10)),
        array_field(FileType::U32, field!(PersistentStorage, storage)),
    ])
});

pub(crate) fn save_psac(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.storages, &STORAGE_DESC, &());
}

pub(crate) fn load_psac(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.storages, &STORAGE_DESC, &mut ())
}
