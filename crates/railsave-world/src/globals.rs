//! Game-wide date and random state, persisted in the `DATE` record.

use std::sync::LazyLock;

use railsave_core::conv::FileType;
use railsave_core::descriptor::{FieldFlags, array_field, padding, scalar_field};
use railsave_core::{Availability, ChunkReader, ChunkTag, ChunkWriter, Result, Schema, global};

use crate::ids::{Date, TileIndex};
use crate::world::World;

pub const DATE: ChunkTag = ChunkTag::new(b"DATE");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameGlobals {
    pub date: Date,
    pub date_fract: u16,
    pub tick_counter: u16,
    pub cur_tileloop_tile: TileIndex,
    pub random_seed: [u32; 2],
    pub disaster_delay: u8,
}

/// Every field is a global; the record has no per-instance object.
static DATE_DESC: LazyLock<Schema<(), GameGlobals>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, global!(GameGlobals, date)).available(Availability::legacy_only(0, 30)),
        scalar_field(FileType::I32, global!(GameGlobals, date)).available(Availability::always().legacy(31, 0)),
        scalar_field(FileType::U16, global!(GameGlobals, date_fract)),
        scalar_field(FileType::U16, global!(GameGlobals, tick_counter)).with_flags(FieldFlags::NO_NETWORK_SYNC),
        padding(2).available(Availability::legacy_only(0, 156)),
        scalar_field(FileType::U16, global!(GameGlobals, cur_tileloop_tile))
            .available(Availability::legacy_only(0, 5)),
        scalar_field(FileType::U32, global!(GameGlobals, cur_tileloop_tile))
            .available(Availability::always().legacy(6, 0)),
        array_field(FileType::U32, global!(GameGlobals, random_seed)),
        scalar_field(FileType::U8, global!(GameGlobals, disaster_delay)),
    ])
});

/// Fields a network client receives on join.
pub fn sync_fields() -> Vec<&'static str> {
    DATE_DESC.sync_fields()
}

pub(crate) fn save_date(world: &World, w: &mut ChunkWriter<'_>) {
    let fv = w.version();
    let len = DATE_DESC.length(&(), &world.globals, &fv);
    DATE_DESC.write(&(), &world.globals, w.record(len));
}

pub(crate) fn load_date(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    let globals = &mut world.globals;
    r.read_record(|body| DATE_DESC.read(&mut (), globals, body))
}
