//! Vehicles, persisted in the `VEHS` chunk.

use std::sync::LazyLock;

use railsave_core::chunk::{fixup_pool, load_pool, save_pool};
use railsave_core::conv::FileType;
use railsave_core::descriptor::{
    include, padding, reference_field, reference_list_field, reference_of_kind, scalar_field,
};
use railsave_core::{
    Availability, ChunkReader, ChunkTag, ChunkWriter, FixupContext, Link, Pooled, RefKind, Result, Schema, accessor,
    field,
};

use crate::cargo::CargoPacket;
use crate::ids::{INVALID_STATION, StationId, TileIndex, VehicleType};
use crate::order::{ORDER_BODY_DESC, OrderBody, OrderList};
use crate::world::World;

pub const VEHS: ChunkTag = ChunkTag::new(b"VEHS");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vehicle {
    pub kind: u8,
    pub tile: TileIndex,
    pub owner: u8,
    pub last_station_visited: StationId,
    pub current_order: OrderBody,
    pub orders: Link<OrderList>,
    /// Next vehicle of an articulated or multi-part consist.
    pub next: Link<Vehicle>,
    pub cargo_cap: u16,
    pub cargo: Vec<Link<CargoPacket>>,
}

impl Default for Vehicle {
    fn default() -> Self {
        Self {
            kind: VehicleType::Train as u8,
            tile: 0,
            owner: 0,
            last_station_visited: INVALID_STATION,
            current_order: OrderBody::default(),
            orders: Link::Null,
            next: Link::Null,
            cargo_cap: 0,
            cargo: Vec::new(),
        }
    }
}

impl Vehicle {
    pub fn new(kind: VehicleType, tile: TileIndex) -> Self {
        Self {
            kind: kind as u8,
            tile,
            ..Default::default()
        }
    }

    pub fn vehicle_type(&self) -> Option<VehicleType> {
        VehicleType::from_u8(self.kind)
    }

    /// Ships and trains may have travelled to buoys or rail waypoints.
    pub fn visits_waypoints(&self) -> bool {
        matches!(self.vehicle_type(), Some(VehicleType::Ship | VehicleType::Train))
    }
}

impl Pooled for Vehicle {
    const KIND: RefKind = RefKind::Vehicle;
}

static VEHICLE_DESC: LazyLock<Schema<Vehicle>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U8, field!(Vehicle, kind)),
        scalar_field(FileType::U16, field!(Vehicle, tile)).available(Availability::legacy_only(0, 5)),
        scalar_field(FileType::U32, field!(Vehicle, tile)).available(Availability::always().legacy(6, 0)),
        scalar_field(FileType::U8, field!(Vehicle, owner)),
        scalar_field(FileType::U8, field!(Vehicle, last_station_visited)).available(Availability::legacy_only(0, 4)),
        scalar_field(FileType::U16, field!(Vehicle, last_station_visited))
            .available(Availability::always().legacy(5, 0)),
        include(&ORDER_BODY_DESC, accessor!(Vehicle, current_order)),
        reference_field(field!(Vehicle, orders)).available(Availability::always().legacy(105, 0)),
        padding(2).available(Availability::legacy_only(0, 104)),
        reference_of_kind(RefKind::VehicleOld, field!(Vehicle, next)),
        scalar_field(FileType::U16, field!(Vehicle, cargo_cap)),
        reference_list_field(field!(Vehicle, cargo)).available(Availability::always().legacy(68, 0)),
    ])
});

pub(crate) fn save_vehs(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.vehicles, &VEHICLE_DESC, &());
}

pub(crate) fn load_vehs(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.vehicles, &VEHICLE_DESC, &mut ())
}

pub(crate) fn fixup_vehs(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    fixup_pool(VEHS, &mut world.vehicles, &VEHICLE_DESC, &mut (), ctx)
}
