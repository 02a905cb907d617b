//! Cargo packets and per-station cargo lists.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use railsave_core::chunk::{load_pool, save_pool};
use railsave_core::conv::FileType;
use railsave_core::descriptor::{reference_list_field, scalar_field};
use railsave_core::{ChunkReader, ChunkTag, ChunkWriter, FixupContext, Link, Pooled, RefKind, Result, Schema, field};

use crate::ids::{INVALID_STATION, StationId, TileIndex};
use crate::world::World;

pub const CAPA: ChunkTag = ChunkTag::new(b"CAPA");

/// A batch of cargo travelling together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoPacket {
    pub source: StationId,
    pub source_xy: TileIndex,
    pub loaded_at_xy: TileIndex,
    pub count: u16,
    pub days_in_transit: u8,
    pub feeder_share: i64,
}

impl Default for CargoPacket {
    fn default() -> Self {
        Self {
            source: INVALID_STATION,
            source_xy: 0,
            loaded_at_xy: 0,
            count: 0,
            days_in_transit: 0,
            feeder_share: 0,
        }
    }
}

impl Pooled for CargoPacket {
    const KIND: RefKind = RefKind::CargoPacket;
}

static CARGO_PACKET_DESC: LazyLock<Schema<CargoPacket>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, field!(CargoPacket, source)),
        scalar_field(FileType::U32, field!(CargoPacket, source_xy)),
        scalar_field(FileType::U32, field!(CargoPacket, loaded_at_xy)),
        scalar_field(FileType::U16, field!(CargoPacket, count)),
        scalar_field(FileType::U8, field!(CargoPacket, days_in_transit)),
        scalar_field(FileType::I64, field!(CargoPacket, feeder_share)),
    ])
});

pub(crate) fn save_capa(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.cargo_packets, &CARGO_PACKET_DESC, &());
}

pub(crate) fn load_capa(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.cargo_packets, &CARGO_PACKET_DESC, &mut ())
}

// ---------------------------------------------------------------------------
// Station cargo lists
// ---------------------------------------------------------------------------

/// Cargo waiting at a station, grouped by next destination.
/// [`INVALID_STATION`] holds packets with no particular destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationCargoList {
    pub reserved_count: u32,
    pub packets: BTreeMap<StationId, Vec<Link<CargoPacket>>>,
}

impl StationCargoList {
    pub fn append(&mut self, packet: Link<CargoPacket>, next: StationId) {
        self.packets.entry(next).or_default().push(packet);
    }

    /// Exchange `staged` with the packets without a destination.
    pub fn swap_undirected(&mut self, staged: &mut Vec<Link<CargoPacket>>) {
        if staged.is_empty() {
            if let Some(list) = self.packets.remove(&INVALID_STATION) {
                *staged = list;
            }
        } else {
            let list = self.packets.entry(INVALID_STATION).or_default();
            std::mem::swap(list, staged);
        }
    }

    pub fn packet_count(&self) -> usize {
        self.packets.values().map(Vec::len).sum()
    }

    pub fn fixup(&mut self, ctx: &FixupContext<'_>) -> Result<()> {
        for list in self.packets.values_mut() {
            for link in list.iter_mut() {
                link.resolve(RefKind::CargoPacket, ctx.refs)?;
            }
        }
        Ok(())
    }
}

/// One destination's packets as persisted.
#[derive(Debug, Default)]
pub struct CargoListEntry {
    pub next: StationId,
    pub packets: Vec<Link<CargoPacket>>,
}

pub static CARGO_LIST_DESC: LazyLock<Schema<CargoListEntry>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, field!(CargoListEntry, next)),
        reference_list_field(field!(CargoListEntry, packets)),
    ])
});
