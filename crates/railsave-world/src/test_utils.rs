//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use railsave_core::buffer::SaveBuffer;
use railsave_core::chunk::ChunkHeader;
use railsave_core::loader::SaveProc;
use railsave_core::{ChunkKind, ChunkTag, ChunkWriter, FormatVersion, Link, Pool, SaveGame};

use crate::cargo::CargoPacket;
use crate::config::WorldConfig;
use crate::flow::FlowStat;
use crate::ids::{
    FACIL_AIRPORT, FACIL_BUS_STOP, FACIL_DOCK, FACIL_TRAIN, HVOT_BUS, HVOT_SHIP, HVOT_TRAIN, INVALID_STATION,
    VehicleType,
};
use crate::order::{Order, OrderBody, OrderList, after_load_order_lists};
use crate::station::{
    GES_ACCEPTANCE, GES_RATING, STNN, STNS, Station, StationSpecList, Waypoint, after_load_stations, save_stns,
};
use crate::stop::{Dock, RoadStop};
use crate::storage::PersistentStorage;
use crate::tile::{TileArea, tile_xy};
use crate::town::Town;
use crate::vehicle::Vehicle;
use crate::world::World;

// ===========================================================================
// Versions
// ===========================================================================

pub fn legacy(major: u16) -> FormatVersion {
    FormatVersion::Legacy { major, minor: 0 }
}

/// Map width exponent of every sample world.
pub const LOG_X: u8 = 8;

pub fn tile(x: u32, y: u32) -> u32 {
    tile_xy(x, y, LOG_X)
}

// ===========================================================================
// Writing old files
// ===========================================================================

/// Serialize `world` laid out as format `fv`. Regular saves are always
/// current; this builds fixtures for older readers. Files before 123 get
/// their stations as `STNS`.
pub fn save_legacy(world: &World, fv: FormatVersion) -> Vec<u8> {
    let mut header = Vec::new();
    fv.write_header(&mut header);
    let mut out = SaveBuffer::with_version(fv);
    out.write_bytes(&header);

    let chunks: Vec<(ChunkTag, ChunkKind, SaveProc<World>)> = World::chunk_handlers()
        .iter()
        .filter_map(|h| {
            if h.tag == STNN && fv.is_legacy_before(123, 0) {
                return Some((STNS, h.kind, save_stns as SaveProc<World>));
            }
            h.save.map(|save| (h.tag, h.kind, save))
        })
        .collect();
    for (i, &(tag, kind, save)) in chunks.iter().enumerate() {
        let header = ChunkHeader {
            tag,
            kind,
            last: i + 1 == chunks.len(),
        };
        let mut writer = ChunkWriter::new(&mut out, header);
        save(world, &mut writer);
        writer.finish();
    }
    out.into_bytes()
}

// ===========================================================================
// World builders
// ===========================================================================

pub fn empty_world() -> World {
    World::new(&WorldConfig::default())
}

pub fn town(name: &str, xy: u32) -> Town {
    Town {
        xy,
        townnameparts: 0x0042_1337,
        name: name.to_string(),
        population: 1200,
        flags: 1,
        ..Default::default()
    }
}

pub fn packet(source: u16, count: u16) -> CargoPacket {
    CargoPacket {
        source,
        source_xy: tile(4, 4),
        loaded_at_xy: tile(4, 5),
        count,
        days_in_transit: 12,
        feeder_share: 3_000,
    }
}

/// A station with a train platform and an accepting, rated cargo 0.
pub fn rail_station(xy: u32, name: &str) -> Station {
    let mut st = Station::new(xy);
    st.base.name = name.to_string();
    st.base.owner = 1;
    st.base.build_date = 720_000;
    st.base.train_station = TileArea::new(xy, 1, 4);
    st.base.facilities = FACIL_TRAIN;
    st.had_vehicle_of_type = HVOT_TRAIN;
    st.goods[0].status = (1 << GES_ACCEPTANCE) | (1 << GES_RATING);
    st.goods[0].rating = 200;
    st
}

/// Slot of `pool` at `index`, as a live link.
pub fn link_at<T>(pool: &Pool<T>, index: u32) -> Link<T> {
    pool.handle_at(index).map_or(Link::Null, Link::live)
}

/// A world touching every chunk, with index gaps, a retired slot and
/// reference cycles between vehicles and between stations and vehicles.
/// Derived state is already rebuilt, so a save/load round trip returns an
/// equal world.
pub fn sample_world() -> World {
    let mut world = empty_world();
    world.globals.date = 730_120;
    world.globals.date_fract = 17;
    world.globals.tick_counter = 999;
    world.globals.cur_tileloop_tile = tile(3, 3);
    world.globals.random_seed = [0xDEAD_BEEF, 0x0BAD_F00D];
    world.globals.disaster_delay = 40;

    insert(&mut world.towns, 0, town("Northfield", tile(10, 10)));
    insert(&mut world.towns, 2, town("Eastwick", tile(60, 12)));

    for (i, count) in [40, 15, 7, 22].into_iter().enumerate() {
        insert(&mut world.cargo_packets, i as u32, packet(0, count));
    }
    retire(&mut world.cargo_packets, 5);

    insert(
        &mut world.storages,
        0,
        PersistentStorage {
            grfid: 0x4D47_0101,
            feature: 0x0D,
            tile: tile(30, 30),
            storage: std::array::from_fn(|i| i as u32 * 3),
        },
    );

    insert(&mut world.road_stops, 1, RoadStop::new(tile(12, 20)));
    let next_stop = link_at(&world.road_stops, 1);
    insert(
        &mut world.road_stops,
        0,
        RoadStop {
            next: next_stop,
            ..RoadStop::new(tile(12, 21))
        },
    );
    insert(&mut world.docks, 0, Dock::new(tile(14, 18)));
    insert(&mut world.docks, 3, Dock::new(tile(90, 90)));

    // Orders: 0 -> 1, shared by the two halves of a train.
    insert(&mut world.orders, 1, Order { body: OrderBody::goto_station(1), next: Link::Null });
    let next_order = link_at(&world.orders, 1);
    insert(&mut world.orders, 0, Order { body: OrderBody::goto_station(0), next: next_order });
    let first_order = link_at(&world.orders, 0);
    insert(
        &mut world.order_lists,
        0,
        OrderList {
            first: first_order,
            first_shared: None,
        },
    );

    let orders = link_at(&world.order_lists, 0);
    let mut head = Vehicle::new(VehicleType::Train, tile(12, 10));
    head.owner = 1;
    head.orders = orders;
    head.current_order = OrderBody::goto_station(0);
    head.cargo_cap = 90;
    head.cargo = vec![link_at(&world.cargo_packets, 3)];
    let mut tail = Vehicle::new(VehicleType::Train, tile(12, 11));
    tail.owner = 1;
    tail.orders = orders;
    tail.last_station_visited = 0;
    insert(&mut world.vehicles, 0, head);
    insert(&mut world.vehicles, 1, tail);
    let (head, tail) = (link_at(&world.vehicles, 0), link_at(&world.vehicles, 1));
    if let Some(v) = world.vehicles.get_index_mut(0) {
        v.next = tail;
    }
    if let Some(v) = world.vehicles.get_index_mut(1) {
        v.next = head;
    }
    retire(&mut world.vehicles, 2);
    let mut ship = Vehicle::new(VehicleType::Ship, tile(15, 18));
    ship.current_order = OrderBody::goto_station(1);
    insert(&mut world.vehicles, 3, ship);

    // Station 0: rail, bus, dock and airport.
    let mut central = rail_station(tile(12, 12), "Central");
    central.base.town = link_at(&world.towns, 0);
    central.base.facilities |= FACIL_BUS_STOP | FACIL_DOCK | FACIL_AIRPORT;
    central.base.set_speclist(vec![
        StationSpecList::default(),
        StationSpecList {
            grfid: 0x4D47_0101,
            localidx: 4,
        },
    ]);
    central.had_vehicle_of_type |= HVOT_BUS | HVOT_SHIP;
    central.bus_stops = link_at(&world.road_stops, 0);
    central.docks = link_at(&world.docks, 0);
    central.airport.area = TileArea::new(tile(20, 20), 4, 3);
    central.airport.kind = 2;
    central.airport.flags = (1 << 40) | 3;
    central.airport.psa = link_at(&world.storages, 0);
    central.loading_vehicles = vec![link_at(&world.vehicles, 0)];
    central.always_accepted = 0b101;
    let goods = &mut central.goods[0];
    goods.cargo.append(link_at(&world.cargo_packets, 0), INVALID_STATION);
    goods.cargo.append(link_at(&world.cargo_packets, 1), 1);
    goods.cargo.reserved_count = 5;
    goods.link_graph = 3;
    goods.node = 0;
    goods.max_waiting_cargo = 60;
    let mut stat = FlowStat::new(1, 10, false);
    stat.append_share(4, 5, true);
    goods.flows.insert(0, stat);
    goods.flows.insert(4, FlowStat::new(INVALID_STATION, 7, false));
    central.goods[3].status = 1 << GES_RATING;
    central.goods[3].cargo.append(link_at(&world.cargo_packets, 2), 4);
    insert(&mut world.stations, 0, central.into());

    // Station 1: a second rail station in another town.
    let mut east = rail_station(tile(60, 14), "East");
    east.base.town = link_at(&world.towns, 2);
    insert(&mut world.stations, 1, east.into());
    retire(&mut world.stations, 2);

    // Station 4: a rail waypoint.
    let mut wp = Waypoint::new(tile(40, 40));
    wp.base.town = link_at(&world.towns, 0);
    wp.base.train_station = TileArea::new(tile(40, 40), 1, 1);
    wp.base.facilities = FACIL_TRAIN;
    wp.town_cn = 2;
    insert(&mut world.stations, 4, wp.into());

    rebuild_derived(&mut world);
    world
}

/// Run the post-load repairs a loaded world receives.
pub fn rebuild_derived(world: &mut World) {
    let fv = FormatVersion::CURRENT;
    after_load_order_lists(world, &fv).expect("order lists rebuild");
    after_load_stations(world, &fv).expect("station areas rebuild");
}

fn insert<T>(pool: &mut Pool<T>, index: u32, value: T) {
    pool.insert_at(index, value).expect("sample index in range");
}

fn retire<T>(pool: &mut Pool<T>, index: u32) {
    pool.retire_at(index).expect("sample index in range");
}

// ===========================================================================
// Comparison
// ===========================================================================

fn live<T>(pool: &Pool<T>) -> Vec<(u32, &T)> {
    pool.iter().map(|(h, v)| (h.index(), v)).collect()
}

fn assert_pool_eq<T: PartialEq + std::fmt::Debug>(a: &Pool<T>, b: &Pool<T>) {
    let states = |p: &Pool<T>| p.slot_states().collect::<Vec<_>>();
    assert_eq!(states(a), states(b), "slot states of pool '{}'", a.name());
    assert_eq!(live(a), live(b), "objects of pool '{}'", a.name());
}

/// Assert that two worlds hold the same objects at the same indices.
pub fn assert_same_world(a: &World, b: &World) {
    assert_eq!(a.globals, b.globals);
    assert_pool_eq(&a.towns, &b.towns);
    assert_pool_eq(&a.cargo_packets, &b.cargo_packets);
    assert_pool_eq(&a.orders, &b.orders);
    assert_pool_eq(&a.order_lists, &b.order_lists);
    assert_pool_eq(&a.vehicles, &b.vehicles);
    assert_pool_eq(&a.storages, &b.storages);
    assert_pool_eq(&a.stations, &b.stations);
    assert_pool_eq(&a.road_stops, &b.road_stops);
    assert_pool_eq(&a.docks, &b.docks);
}
