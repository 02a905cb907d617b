//! Stations and waypoints.
//!
//! Both kinds share one pool as variants of [`BaseStation`]. Current files
//! persist them in `STNN`, where each element starts with a facilities byte
//! whose [`FACIL_WAYPOINT`] bit selects the layout. Stations then carry one
//! goods entry per cargo, each followed by its flow records and cargo lists.
//! Legacy files before 123 use the station-only `STNS` layout instead, which
//! is read but never written.
//!
//! Values that old files kept outside the station objects (waiting cargo,
//! airport registers, element counts) pass through a [`StationStaging`]
//! context shared by every element of one chunk.

use std::sync::LazyLock;

use railsave_core::buffer::{LoadBuffer, SaveBuffer};
use railsave_core::chunk::Element;
use railsave_core::conv::FileType;
use railsave_core::descriptor::{
    StringPolicy, array_field, constant_byte, include, padding, reference_field, reference_list_field, scalar_field,
    string_field,
};
use railsave_core::pool::SlotState;
use railsave_core::{
    Availability, ChunkReader, ChunkTag, ChunkWriter, FixupContext, FormatVersion, Link, Pool, Pooled, RefKind,
    Result, SaveLoadError, Schema, accessor, field, global,
};

use crate::cargo::{CARGO_LIST_DESC, CargoListEntry, CargoPacket, StationCargoList};
use crate::flow::{FLOW_DESC, FlowRecord, FlowStatMap, apply_flow_record, flow_records};
use crate::ids::{
    Date, FACIL_AIRPORT, FACIL_DOCK, FACIL_NONE, FACIL_WAYPOINT, INVALID_STATION, INVALID_TILE, LEGACY_NUM_CARGO,
    NUM_CARGO, OWNER_NONE, STR_SV_STNAME, StationId, TileIndex,
};
use crate::stop::{Dock, RoadStop, chain_tiles};
use crate::storage::{PersistentStorage, STORAGE_LEN};
use crate::tile::TileArea;
use crate::town::Town;
use crate::vehicle::Vehicle;
use crate::world::World;

pub const STNS: ChunkTag = ChunkTag::new(b"STNS");
pub const STNN: ChunkTag = ChunkTag::new(b"STNN");

/// Bit of [`GoodsEntry::status`]: the station accepts this cargo.
pub const GES_ACCEPTANCE: u8 = 0;
/// Bit of [`GoodsEntry::status`]: the cargo has a rating at this station.
pub const GES_RATING: u8 = 1;

const INITIAL_STATION_RATING: u8 = 175;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A custom station graphics reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationSpecList {
    pub grfid: u32,
    pub localidx: u8,
}

/// State shared by stations and waypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseStationData {
    /// Tile of the station sign.
    pub xy: TileIndex,
    pub town: Link<Town>,
    pub string_id: u16,
    pub name: String,
    pub delete_ctr: u8,
    pub owner: u8,
    pub facilities: u8,
    pub build_date: Date,
    pub random_bits: u16,
    pub waiting_triggers: u8,
    /// Persisted length of `speclist`.
    pub num_specs: u8,
    pub speclist: Vec<StationSpecList>,
    pub train_station: TileArea,
    /// Bounding box of every facility. Rebuilt after load.
    pub rect: TileArea,
}

impl Default for BaseStationData {
    fn default() -> Self {
        Self {
            xy: INVALID_TILE,
            town: Link::Null,
            string_id: STR_SV_STNAME,
            name: String::new(),
            delete_ctr: 0,
            owner: OWNER_NONE,
            facilities: FACIL_NONE,
            build_date: 0,
            random_bits: 0,
            waiting_triggers: 0,
            num_specs: 0,
            speclist: Vec::new(),
            train_station: TileArea::EMPTY,
            rect: TileArea::EMPTY,
        }
    }
}

impl BaseStationData {
    pub fn new(xy: TileIndex) -> Self {
        Self {
            xy,
            ..Default::default()
        }
    }

    /// Replace the spec list, keeping its persisted length in step.
    pub fn set_speclist(&mut self, speclist: Vec<StationSpecList>) {
        self.speclist = speclist;
        self.speclist.truncate(usize::from(u8::MAX));
        self.num_specs = self.speclist.len() as u8;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Airport {
    pub area: TileArea,
    pub kind: u8,
    pub layout: u8,
    pub flags: u64,
    pub rotation: u8,
    pub psa: Link<PersistentStorage>,
}

/// Per-cargo state of a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodsEntry {
    pub status: u8,
    pub time_since_pickup: u8,
    pub rating: u8,
    pub last_speed: u8,
    pub last_age: u8,
    pub amount_fract: u8,
    pub link_graph: u16,
    pub node: u16,
    pub max_waiting_cargo: u32,
    pub cargo: StationCargoList,
    pub flows: FlowStatMap,
}

impl Default for GoodsEntry {
    fn default() -> Self {
        Self {
            status: 0,
            time_since_pickup: u8::MAX,
            rating: INITIAL_STATION_RATING,
            last_speed: 0,
            last_age: u8::MAX,
            amount_fract: 0,
            link_graph: u16::MAX,
            node: u16::MAX,
            max_waiting_cargo: 0,
            cargo: StationCargoList::default(),
            flows: FlowStatMap::new(),
        }
    }
}

impl GoodsEntry {
    pub fn has_status(&self, bit: u8) -> bool {
        self.status & (1 << bit) != 0
    }

    fn set_status(&mut self, bit: u8, on: bool) {
        if on {
            self.status |= 1 << bit;
        } else {
            self.status &= !(1 << bit);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub base: BaseStationData,
    pub bus_stops: Link<RoadStop>,
    pub truck_stops: Link<RoadStop>,
    pub docks: Link<Dock>,
    pub airport: Airport,
    pub indtype: u8,
    pub time_since_load: u8,
    pub time_since_unload: u8,
    pub last_vehicle_type: u8,
    pub had_vehicle_of_type: u8,
    pub loading_vehicles: Vec<Link<Vehicle>>,
    pub always_accepted: u32,
    /// One entry per cargo type.
    pub goods: Vec<GoodsEntry>,
    pub bus_station: TileArea,
    pub truck_station: TileArea,
    pub dock_area: TileArea,
}

impl Default for Station {
    fn default() -> Self {
        Self {
            base: BaseStationData::default(),
            bus_stops: Link::Null,
            truck_stops: Link::Null,
            docks: Link::Null,
            airport: Airport::default(),
            indtype: 0,
            time_since_load: u8::MAX,
            time_since_unload: u8::MAX,
            last_vehicle_type: 0,
            had_vehicle_of_type: 0,
            loading_vehicles: Vec::new(),
            always_accepted: 0,
            goods: vec![GoodsEntry::default(); NUM_CARGO],
            bus_station: TileArea::EMPTY,
            truck_station: TileArea::EMPTY,
            dock_area: TileArea::EMPTY,
        }
    }
}

impl Station {
    pub fn new(xy: TileIndex) -> Self {
        Self {
            base: BaseStationData::new(xy),
            ..Default::default()
        }
    }

    /// Bounding box of every facility area.
    pub fn facility_rect(&self, log_x: u8) -> TileArea {
        let mut rect = TileArea::EMPTY;
        for area in [
            &self.base.train_station,
            &self.airport.area,
            &self.bus_station,
            &self.truck_station,
            &self.dock_area,
        ] {
            rect.union(area, log_x);
        }
        rect
    }
}

/// A rail waypoint or a buoy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waypoint {
    pub base: BaseStationData,
    /// Number among the waypoints of its town sharing a default name.
    pub town_cn: u16,
}

impl Waypoint {
    pub fn new(xy: TileIndex) -> Self {
        Self {
            base: BaseStationData::new(xy),
            town_cn: 0,
        }
    }
}

/// Anything stored in the station pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseStation {
    Station(Box<Station>),
    Waypoint(Waypoint),
}

impl BaseStation {
    pub fn base(&self) -> &BaseStationData {
        match self {
            BaseStation::Station(st) => &st.base,
            BaseStation::Waypoint(wp) => &wp.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseStationData {
        match self {
            BaseStation::Station(st) => &mut st.base,
            BaseStation::Waypoint(wp) => &mut wp.base,
        }
    }

    pub fn is_waypoint(&self) -> bool {
        matches!(self, BaseStation::Waypoint(_))
    }

    pub fn as_station(&self) -> Option<&Station> {
        match self {
            BaseStation::Station(st) => Some(st),
            BaseStation::Waypoint(_) => None,
        }
    }

    pub fn as_station_mut(&mut self) -> Option<&mut Station> {
        match self {
            BaseStation::Station(st) => Some(st),
            BaseStation::Waypoint(_) => None,
        }
    }

    pub fn as_waypoint(&self) -> Option<&Waypoint> {
        match self {
            BaseStation::Waypoint(wp) => Some(wp),
            BaseStation::Station(_) => None,
        }
    }
}

impl From<Station> for BaseStation {
    fn from(st: Station) -> Self {
        BaseStation::Station(Box::new(st))
    }
}

impl From<Waypoint> for BaseStation {
    fn from(wp: Waypoint) -> Self {
        BaseStation::Waypoint(wp)
    }
}

impl Pooled for BaseStation {
    const KIND: RefKind = RefKind::Station;
}

/// Values carried between the objects of one station chunk.
#[derive(Debug, Default)]
pub struct StationStaging {
    pub old_storage: [u32; STORAGE_LEN],
    pub waiting_acceptance: u16,
    pub cargo_source: StationId,
    pub cargo_source_xy: TileIndex,
    pub cargo_days: u8,
    pub cargo_feeder_share: i64,
    pub packets: Vec<Link<CargoPacket>>,
    pub num_dests: u32,
    pub num_flows: u32,
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

static BASE_STATION_DESC: LazyLock<Schema<BaseStationData, StationStaging>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U32, field!(BaseStationData, xy)),
        reference_field(field!(BaseStationData, town)),
        scalar_field(FileType::StringId, field!(BaseStationData, string_id)),
        string_field(StringPolicy::ALLOW_CONTROL, None, field!(BaseStationData, name)),
        scalar_field(FileType::U8, field!(BaseStationData, delete_ctr)),
        scalar_field(FileType::U8, field!(BaseStationData, owner)),
        scalar_field(FileType::U8, field!(BaseStationData, facilities)),
        scalar_field(FileType::I32, field!(BaseStationData, build_date)),
        scalar_field(FileType::U16, field!(BaseStationData, random_bits)),
        scalar_field(FileType::U8, field!(BaseStationData, waiting_triggers)),
        scalar_field(FileType::U8, field!(BaseStationData, num_specs)),
    ])
});

static STATION_DESC: LazyLock<Schema<Station, StationStaging>> = LazyLock::new(|| {
    Schema::new(vec![
        constant_byte(FACIL_NONE),
        include(&BASE_STATION_DESC, accessor!(Station, base)),
        scalar_field(FileType::U32, field!(Station, base.train_station.tile)),
        scalar_field(FileType::U8, field!(Station, base.train_station.w)),
        scalar_field(FileType::U8, field!(Station, base.train_station.h)),
        reference_field(field!(Station, bus_stops)),
        reference_field(field!(Station, truck_stops)),
        padding(4).available(Availability::until(14)),
        reference_field(field!(Station, docks)).available(Availability::since(15)),
        scalar_field(FileType::U32, field!(Station, airport.area.tile)),
        scalar_field(FileType::U8, field!(Station, airport.area.w)).available(Availability::always().legacy(140, 0)),
        scalar_field(FileType::U8, field!(Station, airport.area.h)).available(Availability::always().legacy(140, 0)),
        scalar_field(FileType::U8, field!(Station, airport.kind)),
        scalar_field(FileType::U8, field!(Station, airport.layout)).available(Availability::always().legacy(145, 0)),
        scalar_field(FileType::U64, field!(Station, airport.flags)),
        scalar_field(FileType::U8, field!(Station, airport.rotation)).available(Availability::always().legacy(145, 0)),
        array_field(FileType::U32, global!(StationStaging, old_storage)).available(Availability::legacy_only(145, 160)),
        reference_field(field!(Station, airport.psa)).available(Availability::always().legacy(161, 0)),
        scalar_field(FileType::U8, field!(Station, indtype)),
        scalar_field(FileType::U8, field!(Station, time_since_load)),
        scalar_field(FileType::U8, field!(Station, time_since_unload)),
        scalar_field(FileType::U8, field!(Station, last_vehicle_type)),
        scalar_field(FileType::U8, field!(Station, had_vehicle_of_type)),
        reference_list_field(field!(Station, loading_vehicles)),
        scalar_field(FileType::U32, field!(Station, always_accepted)).available(Availability::always().legacy(127, 0)),
    ])
});

static WAYPOINT_DESC: LazyLock<Schema<Waypoint, StationStaging>> = LazyLock::new(|| {
    Schema::new(vec![
        constant_byte(FACIL_WAYPOINT),
        include(&BASE_STATION_DESC, accessor!(Waypoint, base)),
        scalar_field(FileType::U16, field!(Waypoint, town_cn)),
        scalar_field(FileType::U32, field!(Waypoint, base.train_station.tile))
            .available(Availability::always().legacy(124, 0)),
        scalar_field(FileType::U8, field!(Waypoint, base.train_station.w))
            .available(Availability::always().legacy(124, 0)),
        scalar_field(FileType::U8, field!(Waypoint, base.train_station.h))
            .available(Availability::always().legacy(124, 0)),
    ])
});

static GOODS_DESC: LazyLock<Schema<GoodsEntry, StationStaging>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, global!(StationStaging, waiting_acceptance))
            .available(Availability::legacy_only(0, 67)),
        scalar_field(FileType::U8, field!(GoodsEntry, status)).available(Availability::always().legacy(68, 0)),
        padding(2).available(Availability::legacy_only(51, 67)),
        scalar_field(FileType::U8, field!(GoodsEntry, time_since_pickup)),
        scalar_field(FileType::U8, field!(GoodsEntry, rating)),
        scalar_field(FileType::U8, global!(StationStaging, cargo_source)).available(Availability::legacy_only(0, 6)),
        scalar_field(FileType::U16, global!(StationStaging, cargo_source)).available(Availability::legacy_only(7, 67)),
        scalar_field(FileType::U32, global!(StationStaging, cargo_source_xy))
            .available(Availability::legacy_only(44, 67)),
        scalar_field(FileType::U8, global!(StationStaging, cargo_days)).available(Availability::legacy_only(0, 67)),
        scalar_field(FileType::U8, field!(GoodsEntry, last_speed)),
        scalar_field(FileType::U8, field!(GoodsEntry, last_age)),
        scalar_field(FileType::U32, global!(StationStaging, cargo_feeder_share))
            .available(Availability::legacy_only(14, 64)),
        scalar_field(FileType::I64, global!(StationStaging, cargo_feeder_share))
            .available(Availability::legacy_only(65, 67)),
        scalar_field(FileType::U8, field!(GoodsEntry, amount_fract)).available(Availability::always().legacy(150, 0)),
        reference_list_field(global!(StationStaging, packets)).available(Availability::legacy_only(68, 182)),
        scalar_field(FileType::U32, global!(StationStaging, num_dests)).available(Availability::always().legacy(183, 0)),
        scalar_field(FileType::U32, field!(GoodsEntry, cargo.reserved_count))
            .available(Availability::always().legacy(181, 0)),
        scalar_field(FileType::U16, field!(GoodsEntry, link_graph)).available(Availability::always().legacy(183, 0)),
        scalar_field(FileType::U16, field!(GoodsEntry, node)).available(Availability::always().legacy(183, 0)),
        scalar_field(FileType::U32, global!(StationStaging, num_flows)).available(Availability::always().legacy(183, 0)),
        scalar_field(FileType::U32, field!(GoodsEntry, max_waiting_cargo))
            .available(Availability::always().legacy(183, 0)),
    ])
});

static SPECLIST_DESC: LazyLock<Schema<StationSpecList>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U32, field!(StationSpecList, grfid)).available(Availability::always().legacy(27, 0)),
        scalar_field(FileType::U8, field!(StationSpecList, localidx)).available(Availability::always().legacy(27, 0)),
    ])
});

/// Station layout of legacy files before 123.
static OLD_STATION_DESC: LazyLock<Schema<Station, StationStaging>> = LazyLock::new(|| {
    let old = |from, to| Availability::legacy_only(from, to);
    let from = |v| Availability::always().legacy(v, 0);
    Schema::new(vec![
        scalar_field(FileType::U16, field!(Station, base.xy)).available(old(0, 5)),
        scalar_field(FileType::U32, field!(Station, base.xy)).available(from(6)),
        padding(4).available(old(0, 5)),
        scalar_field(FileType::U16, field!(Station, base.train_station.tile)).available(old(0, 5)),
        scalar_field(FileType::U32, field!(Station, base.train_station.tile)).available(from(6)),
        scalar_field(FileType::U16, field!(Station, airport.area.tile)).available(old(0, 5)),
        scalar_field(FileType::U32, field!(Station, airport.area.tile)).available(from(6)),
        padding(2).available(old(0, 5)),
        padding(4).available(from(6)),
        reference_field(field!(Station, base.town)),
        scalar_field(FileType::U8, field!(Station, base.train_station.w)),
        scalar_field(FileType::U8, field!(Station, base.train_station.h)).available(from(2)),
        padding(1).available(old(0, 3)),
        scalar_field(FileType::StringId, field!(Station, base.string_id)),
        string_field(StringPolicy::ALLOW_CONTROL, None, field!(Station, base.name)).available(from(84)),
        scalar_field(FileType::U8, field!(Station, indtype)).available(from(103)),
        scalar_field(FileType::U16, field!(Station, had_vehicle_of_type)).available(old(0, 121)),
        scalar_field(FileType::U8, field!(Station, had_vehicle_of_type)).available(from(122)),
        scalar_field(FileType::U8, field!(Station, time_since_load)),
        scalar_field(FileType::U8, field!(Station, time_since_unload)),
        scalar_field(FileType::U8, field!(Station, base.delete_ctr)),
        scalar_field(FileType::U8, field!(Station, base.owner)),
        scalar_field(FileType::U8, field!(Station, base.facilities)),
        scalar_field(FileType::U8, field!(Station, airport.kind)),
        padding(2).available(old(0, 5)),
        padding(1).available(old(0, 4)),
        scalar_field(FileType::U16, field!(Station, airport.flags)).available(old(0, 2)),
        scalar_field(FileType::U32, field!(Station, airport.flags)).available(old(3, 45)),
        scalar_field(FileType::U64, field!(Station, airport.flags)).available(from(46)),
        padding(2).available(old(0, 25)),
        scalar_field(FileType::U8, field!(Station, last_vehicle_type)).available(from(26)),
        padding(2).available(old(3, 25)),
        scalar_field(FileType::U16, field!(Station, base.build_date)).available(old(3, 30)),
        scalar_field(FileType::I32, field!(Station, base.build_date)).available(from(31)),
        reference_field(field!(Station, bus_stops)).available(from(6)),
        reference_field(field!(Station, truck_stops)).available(from(6)),
        scalar_field(FileType::U16, field!(Station, base.random_bits)).available(from(27)),
        scalar_field(FileType::U8, field!(Station, base.waiting_triggers)).available(from(27)),
        scalar_field(FileType::U8, field!(Station, base.num_specs)).available(from(27)),
        reference_list_field(field!(Station, loading_vehicles)).available(from(57)),
        padding(32).available(old(2, 0)),
    ])
});

// ---------------------------------------------------------------------------
// STNN
// ---------------------------------------------------------------------------

fn write_goods(ge: &GoodsEntry, staging: &mut StationStaging, out: &mut SaveBuffer) {
    let fv = out.version();
    let records = flow_records(&ge.flows);
    staging.num_flows = records.len() as u32;
    staging.num_dests = ge.cargo.packets.len() as u32;
    staging.packets = ge.cargo.packets.get(&INVALID_STATION).cloned().unwrap_or_default();
    GOODS_DESC.write(ge, staging, out);
    if fv.is_legacy_before(183, 0) {
        return;
    }
    for record in &records {
        FLOW_DESC.write(record, &(), out);
    }
    for (&next, packets) in &ge.cargo.packets {
        let entry = CargoListEntry {
            next,
            packets: packets.clone(),
        };
        CARGO_LIST_DESC.write(&entry, &(), out);
    }
}

fn write_speclist(base: &BaseStationData, out: &mut SaveBuffer) {
    for spec in base.speclist.iter().take(usize::from(base.num_specs)) {
        SPECLIST_DESC.write(spec, &(), out);
    }
}

pub(crate) fn save_stnn(world: &World, w: &mut ChunkWriter<'_>) {
    let fv = w.version();
    let mut staging = StationStaging::default();
    for (index, state) in world.stations.slot_states() {
        match state {
            SlotState::Occupied => {}
            SlotState::Retired => {
                w.write_retired(index);
                continue;
            }
            SlotState::Vacant => continue,
        }
        let Some(bst) = world.stations.get_index(index) else { continue };
        let mut temp = SaveBuffer::with_version(fv);
        match bst {
            BaseStation::Waypoint(wp) => WAYPOINT_DESC.write(wp, &staging, &mut temp),
            BaseStation::Station(st) => {
                staging.old_storage = st
                    .airport
                    .psa
                    .handle()
                    .and_then(|h| world.storages.get(h))
                    .map_or([0; STORAGE_LEN], |psa| psa.storage);
                STATION_DESC.write(st, &staging, &mut temp);
                for ge in &st.goods {
                    write_goods(ge, &mut staging, &mut temp);
                }
            }
        }
        write_speclist(bst.base(), &mut temp);
        w.write_element(index, temp.as_bytes());
    }
}

fn read_speclist(base: &mut BaseStationData, body: &mut LoadBuffer<'_>) -> Result<()> {
    base.speclist = (0..base.num_specs)
        .map(|_| {
            let mut spec = StationSpecList::default();
            SPECLIST_DESC.read(&mut spec, &mut (), body)?;
            Ok(spec)
        })
        .collect::<Result<_>>()?;
    Ok(())
}

fn read_goods(ge: &mut GoodsEntry, staging: &mut StationStaging, body: &mut LoadBuffer<'_>) -> Result<()> {
    let fv = body.version();
    GOODS_DESC.read(ge, staging, body)?;
    for _ in 0..staging.num_flows {
        let mut record = FlowRecord::default();
        FLOW_DESC.read(&mut record, &mut (), body)?;
        apply_flow_record(&mut ge.flows, &record)?;
    }
    if fv.is_legacy_before(183, 0) {
        ge.cargo.swap_undirected(&mut staging.packets);
        return Ok(());
    }
    for _ in 0..staging.num_dests {
        let mut entry = CargoListEntry::default();
        CARGO_LIST_DESC.read(&mut entry, &mut (), body)?;
        if ge.cargo.packets.insert(entry.next, entry.packets).is_some() {
            return Err(SaveLoadError::corrupt(format!(
                "cargo for next hop {} listed twice",
                entry.next
            )));
        }
    }
    Ok(())
}

pub(crate) fn load_stnn(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    let fv = r.version();
    let mut staging = StationStaging::default();
    let World {
        stations, storages, ..
    } = world;
    r.for_each_element(|element, body| {
        let index = match element {
            Element::Live(index) => index,
            Element::Retired(index) => return stations.retire_at(index),
        };
        stations.check_index(index)?;
        let loaded = if body.read_u8()? & FACIL_WAYPOINT != 0 {
            let mut wp = Waypoint::default();
            WAYPOINT_DESC.read(&mut wp, &mut staging, body)?;
            read_speclist(&mut wp.base, body)?;
            BaseStation::Waypoint(wp)
        } else {
            let mut st = Box::<Station>::default();
            STATION_DESC.read(&mut st, &mut staging, body)?;
            let staged_registers = !fv.is_legacy_before(145, 0) && fv.is_legacy_before(161, 0);
            if staged_registers && st.base.facilities & FACIL_AIRPORT != 0 {
                let psa = storages.insert(PersistentStorage::with_registers(staging.old_storage))?;
                st.airport.psa = Link::live(psa);
            }
            for ge in st.goods.iter_mut() {
                read_goods(ge, &mut staging, body)?;
            }
            read_speclist(&mut st.base, body)?;
            BaseStation::Station(st)
        };
        stations.insert_at(index, loaded).map(|_| ())
    })
}

pub(crate) fn fixup_stnn(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    if ctx.version.is_legacy_before(123, 0) {
        return Ok(());
    }
    let mut staging = StationStaging::default();
    for (handle, bst) in world.stations.iter_mut() {
        let fixed = match bst {
            BaseStation::Station(st) => st
                .goods
                .iter_mut()
                .try_for_each(|ge| ge.cargo.fixup(ctx))
                .and_then(|()| STATION_DESC.fixup(st, &mut staging, ctx)),
            BaseStation::Waypoint(wp) => WAYPOINT_DESC.fixup(wp, &mut staging, ctx),
        };
        fixed.map_err(|e| e.in_chunk(STNN, Some(handle.index())))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// STNS
// ---------------------------------------------------------------------------

/// Turn the waiting cargo of a pre-68 goods entry into a packet.
fn synthesize_packet(
    ge: &mut GoodsEntry,
    staging: &StationStaging,
    fv: &FormatVersion,
    cargo_packets: &mut Pool<CargoPacket>,
) -> Result<()> {
    ge.set_status(GES_ACCEPTANCE, staging.waiting_acceptance & 0x8000 != 0);
    let count = staging.waiting_acceptance & 0x0FFF;
    if count == 0 {
        return Ok(());
    }
    let source = if fv.is_legacy_before(7, 0) && staging.cargo_source == 0xFF {
        INVALID_STATION
    } else {
        staging.cargo_source
    };
    let packet = cargo_packets.insert(CargoPacket {
        source,
        source_xy: staging.cargo_source_xy,
        loaded_at_xy: staging.cargo_source_xy,
        count,
        days_in_transit: staging.cargo_days,
        feeder_share: staging.cargo_feeder_share,
    })?;
    ge.cargo.append(Link::live(packet), INVALID_STATION);
    ge.set_status(GES_RATING, true);
    Ok(())
}

pub(crate) fn load_stns(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    let fv = r.version();
    let num_cargo = if fv.is_legacy_before(55, 0) {
        LEGACY_NUM_CARGO
    } else {
        NUM_CARGO
    };
    let mut staging = StationStaging::default();
    let World {
        stations,
        cargo_packets,
        ..
    } = world;
    r.for_each_element(|element, body| {
        let index = match element {
            Element::Live(index) => index,
            Element::Retired(index) => return stations.retire_at(index),
        };
        stations.check_index(index)?;
        let mut st = Box::<Station>::default();
        OLD_STATION_DESC.read(&mut st, &mut staging, body)?;
        staging.waiting_acceptance = 0;
        for ge in st.goods.iter_mut().take(num_cargo) {
            GOODS_DESC.read(ge, &mut staging, body)?;
            ge.cargo.swap_undirected(&mut staging.packets);
            if fv.is_legacy_before(68, 0) {
                synthesize_packet(ge, &staging, &fv, cargo_packets)?;
            }
        }
        read_speclist(&mut st.base, body)?;
        stations.insert_at(index, BaseStation::Station(st)).map(|_| ())
    })
}

pub(crate) fn fixup_stns(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    if !ctx.version.is_legacy_before(123, 0) {
        return Ok(());
    }
    let mut staging = StationStaging::default();
    for (handle, bst) in world.stations.iter_mut() {
        let BaseStation::Station(st) = bst else { continue };
        st.goods
            .iter_mut()
            .try_for_each(|ge| ge.cargo.fixup(ctx))
            .and_then(|()| OLD_STATION_DESC.fixup(st, &mut staging, ctx))
            .map_err(|e| e.in_chunk(STNS, Some(handle.index())))?;
    }
    Ok(())
}

/// Fill the per-goods values old files kept outside the entry, from the
/// first undirected packet.
#[cfg(any(test, feature = "test-utils"))]
fn stage_old_goods(ge: &GoodsEntry, staging: &mut StationStaging, cargo_packets: &Pool<CargoPacket>) {
    staging.packets = ge.cargo.packets.get(&INVALID_STATION).cloned().unwrap_or_default();
    let first = staging
        .packets
        .first()
        .and_then(Link::handle)
        .and_then(|h| cargo_packets.get(h));
    let acceptance = if ge.has_status(GES_ACCEPTANCE) { 0x8000 } else { 0 };
    staging.waiting_acceptance = acceptance | first.map_or(0, |p| p.count & 0x0FFF);
    staging.cargo_source = first.map_or(INVALID_STATION, |p| p.source);
    staging.cargo_source_xy = first.map_or(0, |p| p.source_xy);
    staging.cargo_days = first.map_or(0, |p| p.days_in_transit);
    staging.cargo_feeder_share = first.map_or(0, |p| p.feeder_share);
}

/// Write stations in the `STNS` layout, for building old files in tests.
/// Waypoints have no representation there and are skipped.
#[cfg(any(test, feature = "test-utils"))]
pub(crate) fn save_stns(world: &World, w: &mut ChunkWriter<'_>) {
    let fv = w.version();
    let num_cargo = if fv.is_legacy_before(55, 0) {
        LEGACY_NUM_CARGO
    } else {
        NUM_CARGO
    };
    let mut staging = StationStaging::default();
    for (index, state) in world.stations.slot_states() {
        match state {
            SlotState::Occupied => {}
            SlotState::Retired => {
                w.write_retired(index);
                continue;
            }
            SlotState::Vacant => continue,
        }
        let Some(st) = world.stations.get_index(index).and_then(BaseStation::as_station) else {
            continue;
        };
        let mut temp = SaveBuffer::with_version(fv);
        OLD_STATION_DESC.write(st, &staging, &mut temp);
        for ge in st.goods.iter().take(num_cargo) {
            stage_old_goods(ge, &mut staging, &world.cargo_packets);
            GOODS_DESC.write(ge, &staging, &mut temp);
        }
        write_speclist(&st.base, &mut temp);
        w.write_element(index, temp.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// After load
// ---------------------------------------------------------------------------

/// Rebuild stop areas and station rectangles, then pull every station sign
/// into its rectangle.
pub(crate) fn after_load_stations(world: &mut World, _: &FormatVersion) -> Result<()> {
    let log_x = world.map_log_x;
    let World {
        stations,
        road_stops,
        docks,
        ..
    } = world;
    for (_, bst) in stations.iter_mut() {
        match bst {
            BaseStation::Station(st) => {
                st.bus_station = TileArea::EMPTY;
                st.truck_station = TileArea::EMPTY;
                st.dock_area = TileArea::EMPTY;
                for tile in chain_tiles(road_stops, st.bus_stops) {
                    st.bus_station.add(tile, log_x);
                }
                for tile in chain_tiles(road_stops, st.truck_stops) {
                    st.truck_station.add(tile, log_x);
                }
                for tile in chain_tiles(docks, st.docks) {
                    st.dock_area.add(tile, log_x);
                }
                st.base.rect = st.facility_rect(log_x);
            }
            BaseStation::Waypoint(wp) => {
                let mut rect = wp.base.train_station;
                if rect.is_empty() && wp.base.facilities & FACIL_DOCK != 0 {
                    rect.add(wp.base.xy, log_x);
                }
                wp.base.rect = rect;
            }
        }
        let base = bst.base_mut();
        if !base.rect.is_empty() {
            base.xy = base.rect.closest_tile(base.xy, log_x);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStat;

    fn legacy(major: u16) -> FormatVersion {
        FormatVersion::Legacy { major, minor: 0 }
    }

    #[test]
    fn station_and_waypoint_lead_with_their_discriminant() {
        let staging = StationStaging::default();
        let mut out = SaveBuffer::new();
        STATION_DESC.write(&Station::new(7), &staging, &mut out);
        assert_eq!(out.as_bytes()[0], FACIL_NONE);

        let mut out = SaveBuffer::new();
        WAYPOINT_DESC.write(&Waypoint::new(7), &staging, &mut out);
        assert_eq!(out.as_bytes()[0], FACIL_WAYPOINT);
    }

    #[test]
    fn goods_layout_tracks_cargo_rework() {
        let ge = GoodsEntry::default();
        let staging = StationStaging::default();
        let len = |fv: FormatVersion| GOODS_DESC.length(&ge, &staging, &fv);
        // acceptance + pickup + rating + source + days + speed + age
        assert_eq!(len(legacy(6)), 2 + 1 + 1 + 1 + 1 + 1 + 1);
        // status + pickup + rating + speed + age + narrow packet list sentinel
        assert_eq!(len(legacy(68)), 1 + 1 + 1 + 1 + 1 + 2);
        // status + pickup + rating + speed + age + fract + dests + reserved
        // + link graph + node + flows + max waiting
        assert_eq!(len(FormatVersion::CURRENT), 5 + 1 + 4 + 4 + 2 + 2 + 4 + 4);
    }

    #[test]
    fn staged_packets_swap_into_goods() {
        let fv = legacy(100);
        let mut ge = GoodsEntry::default();
        ge.cargo.append(Link::Pending(4), INVALID_STATION);
        ge.cargo.append(Link::Pending(9), INVALID_STATION);

        let mut staging = StationStaging::default();
        let mut out = SaveBuffer::with_version(fv);
        write_goods(&ge, &mut staging, &mut out);

        let mut back = GoodsEntry::default();
        let mut staging = StationStaging::default();
        read_goods(&mut back, &mut staging, &mut LoadBuffer::new(out.as_bytes(), fv)).unwrap();
        assert_eq!(back.cargo, ge.cargo);
        assert!(staging.packets.is_empty());
    }

    #[test]
    fn current_goods_carry_flows_and_destinations() {
        let mut ge = GoodsEntry::default();
        let mut stat = FlowStat::new(3, 10, false);
        stat.append_share(7, 15, true);
        ge.flows.insert(1, stat);
        ge.cargo.append(Link::Pending(0), 3);
        ge.cargo.append(Link::Pending(1), INVALID_STATION);

        let mut staging = StationStaging::default();
        let mut out = SaveBuffer::new();
        write_goods(&ge, &mut staging, &mut out);
        assert_eq!(staging.num_flows, 2);
        assert_eq!(staging.num_dests, 2);

        let mut back = GoodsEntry::default();
        let mut input = LoadBuffer::new(out.as_bytes(), FormatVersion::CURRENT);
        read_goods(&mut back, &mut StationStaging::default(), &mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(back, ge);
    }

    #[test]
    fn repeated_destination_is_corrupt() {
        let mut staging = StationStaging {
            num_dests: 2,
            ..Default::default()
        };
        let mut out = SaveBuffer::new();
        GOODS_DESC.write(&GoodsEntry::default(), &staging, &mut out);
        let entry = CargoListEntry {
            next: 5,
            packets: vec![Link::Pending(0)],
        };
        CARGO_LIST_DESC.write(&entry, &(), &mut out);
        CARGO_LIST_DESC.write(&entry, &(), &mut out);

        let mut ge = GoodsEntry::default();
        let err = read_goods(
            &mut ge,
            &mut staging,
            &mut LoadBuffer::new(out.as_bytes(), FormatVersion::CURRENT),
        )
        .unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn old_station_tiles_widen() {
        let fv = legacy(5);
        let mut st = Station::new(0x0102);
        st.base.train_station = TileArea::new(0x0203, 2, 1);
        st.airport.area.tile = 0x0304;
        st.airport.flags = 0xBEEF;
        st.had_vehicle_of_type = 0x40;
        let mut staging = StationStaging::default();
        let mut out = SaveBuffer::with_version(fv);
        OLD_STATION_DESC.write(&st, &staging, &mut out);

        let mut back = Station::default();
        let mut input = LoadBuffer::new(out.as_bytes(), fv);
        OLD_STATION_DESC.read(&mut back, &mut staging, &mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(back.base.xy, 0x0102);
        assert_eq!(back.base.train_station, st.base.train_station);
        assert_eq!(back.airport.area.tile, 0x0304);
        assert_eq!(back.airport.flags, 0xBEEF);
        assert_eq!(back.had_vehicle_of_type, 0x40);
    }

    #[test]
    fn speclist_length_follows_num_specs() {
        let mut base = BaseStationData::default();
        base.set_speclist(vec![
            StationSpecList { grfid: 1, localidx: 2 },
            StationSpecList { grfid: 3, localidx: 4 },
        ]);
        assert_eq!(base.num_specs, 2);

        let mut out = SaveBuffer::new();
        write_speclist(&base, &mut out);
        assert_eq!(out.len(), 10);

        let mut back = BaseStationData {
            num_specs: 2,
            ..Default::default()
        };
        read_speclist(&mut back, &mut LoadBuffer::new(out.as_bytes(), FormatVersion::CURRENT)).unwrap();
        assert_eq!(back.speclist, base.speclist);
    }

    #[test]
    fn synthesized_packet_keeps_waiting_cargo() {
        let mut packets = Pool::new("cargo", 4);
        let mut ge = GoodsEntry::default();
        let staging = StationStaging {
            waiting_acceptance: 0x8000 | 42,
            cargo_source: 0xFF,
            cargo_days: 9,
            ..Default::default()
        };
        synthesize_packet(&mut ge, &staging, &legacy(6), &mut packets).unwrap();
        assert!(ge.has_status(GES_ACCEPTANCE));
        assert!(ge.has_status(GES_RATING));
        let (_, packet) = packets.iter().next().unwrap();
        assert_eq!(packet.count, 42);
        assert_eq!(packet.source, INVALID_STATION);
        assert_eq!(packet.days_in_transit, 9);
        assert_eq!(ge.cargo.packet_count(), 1);

        // From legacy 7 on, 0xFF is a real station.
        let mut ge = GoodsEntry::default();
        synthesize_packet(&mut ge, &staging, &legacy(7), &mut packets).unwrap();
        let source = packets.iter().map(|(_, p)| p.source).last();
        assert_eq!(source, Some(0xFF));
    }

    #[test]
    fn empty_acceptance_makes_no_packet() {
        let mut packets = Pool::new("cargo", 4);
        let mut ge = GoodsEntry {
            status: 1 << GES_ACCEPTANCE,
            ..Default::default()
        };
        synthesize_packet(&mut ge, &StationStaging::default(), &legacy(20), &mut packets).unwrap();
        assert!(!ge.has_status(GES_ACCEPTANCE));
        assert!(packets.is_empty());
    }
}
