//! Towns, persisted in the `CITY` chunk.

use std::sync::LazyLock;

use railsave_core::chunk::{load_pool, save_pool};
use railsave_core::conv::{FileType, LegacyNameId};
use railsave_core::descriptor::{StringPolicy, padding, scalar_field, string_field};
use railsave_core::{Availability, ChunkReader, ChunkTag, ChunkWriter, Pooled, RefKind, Result, Schema, field};

use crate::ids::TileIndex;
use crate::world::World;

pub const CITY: ChunkTag = ChunkTag::new(b"CITY");

/// Longest town name kept on load, in bytes.
pub const MAX_TOWN_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Town {
    pub xy: TileIndex,
    /// Name-table entry of files that predate custom names.
    pub old_name: LegacyNameId,
    pub townnametype: u16,
    pub townnameparts: u32,
    pub name: String,
    pub population: u32,
    pub flags: u8,
}

impl Pooled for Town {
    const KIND: RefKind = RefKind::Town;
}

static TOWN_DESC: LazyLock<Schema<Town>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, field!(Town, xy)).available(Availability::legacy_only(0, 5)),
        scalar_field(FileType::U32, field!(Town, xy)).available(Availability::always().legacy(6, 0)),
        padding(2).available(Availability::legacy_only(0, 2)),
        scalar_field(FileType::StringId, field!(Town, old_name)).available(Availability::legacy_only(0, 83)),
        scalar_field(FileType::U16, field!(Town, townnametype)).available(Availability::always().legacy(66, 0)),
        scalar_field(FileType::U32, field!(Town, townnameparts)),
        string_field(StringPolicy::PLAIN, Some(MAX_TOWN_NAME_LEN), field!(Town, name))
            .available(Availability::always().legacy(84, 0)),
        scalar_field(FileType::U16, field!(Town, population)).available(Availability::legacy_only(0, 8)),
        scalar_field(FileType::U32, field!(Town, population)).available(Availability::always().legacy(9, 0)),
        scalar_field(FileType::U8, field!(Town, flags)),
    ])
});

pub(crate) fn save_city(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.towns, &TOWN_DESC, &());
}

pub(crate) fn load_city(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.towns, &TOWN_DESC, &mut ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use railsave_core::FormatVersion;
    use railsave_core::buffer::LoadBuffer;

    #[test]
    fn ancient_town_uses_name_table() {
        let fv = FormatVersion::Legacy { major: 5, minor: 0 };
        let mut data = Vec::new();
        data.extend_from_slice(&0x0102u16.to_be_bytes()); // xy
        data.extend_from_slice(&0x2040u16.to_be_bytes()); // old name
        data.extend_from_slice(&77u32.to_be_bytes()); // name parts
        data.extend_from_slice(&1500u16.to_be_bytes()); // population
        data.push(1);

        let mut town = Town::default();
        let mut input = LoadBuffer::new(&data, fv);
        TOWN_DESC.read(&mut town, &mut (), &mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(town.xy, 0x0102);
        assert_eq!(town.old_name, LegacyNameId(0x2040));
        assert_eq!(town.townnameparts, 77);
        assert_eq!(town.population, 1500);
        assert!(town.name.is_empty());
    }

    #[test]
    fn long_names_are_truncated() {
        let town = Town {
            name: "x".repeat(MAX_TOWN_NAME_LEN + 10),
            ..Default::default()
        };
        let fv = FormatVersion::CURRENT;
        let len = TOWN_DESC.length(&town, &(), &fv);
        assert_eq!(len, 4 + 2 + 4 + 2 + MAX_TOWN_NAME_LEN + 4 + 1);
    }
}
