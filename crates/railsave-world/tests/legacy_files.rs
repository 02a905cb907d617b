//! Loading files written in older layouts.

use railsave_core::pool::SlotState;
use railsave_core::{FormatVersion, Link, load};
use railsave_world::flow::FlowStat;
use railsave_world::ids::{INVALID_STATION, INVALID_TILE, VehicleType};
use railsave_world::station::{GES_ACCEPTANCE, GES_RATING};
use railsave_world::test_utils::*;
use railsave_world::vehicle::Vehicle;
use railsave_world::{BaseStation, Station, World, WorldConfig};

fn load_as(world: &World, fv: FormatVersion) -> World {
    let bytes = save_legacy(world, fv);
    load(&bytes, &WorldConfig::default()).unwrap_or_else(|e| panic!("{fv}: {e}"))
}

fn central(world: &World) -> &Station {
    world.stations.get_index(0).and_then(BaseStation::as_station).unwrap()
}

// ===========================================================================
// Unified station pool (123 and later)
// ===========================================================================

#[test]
fn recent_legacy_keeps_flows_but_not_current_only_fields() {
    let world = sample_world();
    let back = load_as(&world, legacy(190));

    assert_pool_eq_towns(&world, &back);
    let goods = &central(&back).goods[0];
    let mut expected = FlowStat::new(1, 10, false);
    expected.append_share(4, 5, true);
    assert_eq!(goods.flows[&0], expected);
    assert_eq!(goods.cargo.packets.len(), 2);

    let psa = back.storages.get_index(0).unwrap();
    assert_eq!(psa.storage, world.storages.get_index(0).unwrap().storage);
    assert_eq!(psa.feature, 0);
    assert_eq!(psa.tile, INVALID_TILE);

    assert!(central(&back).docks.is_null());
    assert!(central(&back).dock_area.is_empty());
    assert!(back.stations.get_index(4).unwrap().is_waypoint());
}

fn assert_pool_eq_towns(a: &World, b: &World) {
    let towns = |w: &World| w.towns.iter().map(|(h, t)| (h.index(), t.clone())).collect::<Vec<_>>();
    assert_eq!(towns(a), towns(b));
}

#[test]
fn flows_before_restriction_flag_are_unrestricted() {
    let back = load_as(&sample_world(), legacy(186));
    let stat = &central(&back).goods[0].flows[&0];
    assert_eq!(stat.total(), 15);
    assert_eq!(stat.unrestricted(), 15);

    let back = load_as(&sample_world(), FormatVersion::Current { version: 12 });
    assert_eq!(central(&back).goods[0].flows[&0].unrestricted(), 15);
}

#[test]
fn old_current_files_lack_later_fields() {
    let back = load_as(&sample_world(), FormatVersion::Current { version: 9 });
    assert_eq!(back.storages.get_index(0).unwrap().tile, INVALID_TILE);
    assert!(central(&back).docks.is_null());
}

#[test]
fn packet_list_era_keeps_only_undirected_cargo() {
    let world = sample_world();
    let back = load_as(&world, legacy(170));
    let st = central(&back);
    let goods = &st.goods[0];
    assert!(goods.flows.is_empty());
    assert_eq!(goods.cargo.packets.keys().copied().collect::<Vec<_>>(), vec![INVALID_STATION]);
    assert_eq!(goods.cargo.packets[&INVALID_STATION].len(), 1);
    assert_eq!(goods.cargo.reserved_count, 0);
    assert_eq!(goods.link_graph, u16::MAX);
    assert!(st.goods[3].cargo.packets.is_empty());
    assert!(goods.has_status(GES_ACCEPTANCE));
}

#[test]
fn staged_airport_registers_become_a_storage_object() {
    let world = sample_world();
    let back = load_as(&world, legacy(150));
    let psa = central(&back).airport.psa.handle().unwrap();
    assert_eq!(psa.index(), 1);
    let storage = back.storages.get(psa).unwrap();
    assert_eq!(storage.storage, world.storages.get_index(0).unwrap().storage);
    assert_eq!(storage.grfid, 0);
    assert_eq!(back.storages.len(), 2);
}

// ===========================================================================
// Station-only pool (before 123)
// ===========================================================================

#[test]
fn old_station_chunk_loads_stations() {
    let world = sample_world();
    let back = load_as(&world, legacy(110));
    let st = central(&back);
    let original = central(&world);

    assert_eq!(st.base.name, "Central");
    assert_eq!(st.base.xy, original.base.xy);
    assert_eq!(st.base.train_station, original.base.train_station);
    assert_eq!(st.base.speclist, original.base.speclist);
    assert_eq!(st.bus_station, original.bus_station);
    assert_eq!(st.airport.area.tile, original.airport.area.tile);
    assert_eq!(st.had_vehicle_of_type, original.had_vehicle_of_type);
    assert_eq!(st.loading_vehicles.len(), 1);
    assert_eq!(st.goods[0].cargo.packets[&INVALID_STATION].len(), 1);

    assert_eq!(back.stations.slot_state(2), SlotState::Retired);
    assert_eq!(back.stations.slot_state(4), SlotState::Vacant);
}

#[test]
fn waiting_cargo_becomes_a_packet() {
    let world = sample_world();
    let back = load_as(&world, legacy(60));
    let goods = &central(&back).goods[0];
    assert!(goods.has_status(GES_ACCEPTANCE));
    assert!(goods.has_status(GES_RATING));

    let staged = &goods.cargo.packets[&INVALID_STATION];
    assert_eq!(staged.len(), 1);
    let handle = staged[0].handle().unwrap();
    assert_eq!(handle.index(), 4);
    let packet = back.cargo_packets.get(handle).unwrap();
    assert_eq!(packet.count, 40);
    assert_eq!(packet.source, 0);
    assert_eq!(packet.source_xy, tile(4, 4));
    assert_eq!(packet.loaded_at_xy, tile(4, 4));
    assert_eq!(packet.days_in_transit, 12);
    assert_eq!(packet.feeder_share, 3_000);

    let quiet = &central(&back).goods[3];
    assert_eq!(quiet.status, 0);
    assert!(quiet.cargo.packets.is_empty());
}

#[test]
fn very_old_files_have_twelve_cargoes() {
    let mut world = sample_world();
    if let Some(st) = world.stations.get_index_mut(1).and_then(BaseStation::as_station_mut) {
        st.goods[20].rating = 3;
    }
    let back = load_as(&world, legacy(40));
    let east = back.stations.get_index(1).and_then(BaseStation::as_station).unwrap();
    assert_eq!(east.goods.len(), 32);
    assert_eq!(east.goods[0].rating, 200);
    assert_eq!(east.goods[20].rating, 175);
}

// ===========================================================================
// Narrow references
// ===========================================================================

fn coupled_pair() -> World {
    let mut world = empty_world();
    world
        .vehicles
        .insert_at(1, Vehicle::new(VehicleType::Road, tile(2, 2)))
        .unwrap();
    let tail = link_at(&world.vehicles, 1);
    world
        .vehicles
        .insert_at(
            0,
            Vehicle {
                next: tail,
                ..Vehicle::new(VehicleType::Road, tile(2, 3))
            },
        )
        .unwrap();
    world
}

#[test]
fn early_vehicle_links_use_raw_indices() {
    let world = coupled_pair();
    let before = FormatVersion::Legacy { major: 4, minor: 3 };
    let after = FormatVersion::Legacy { major: 4, minor: 4 };
    assert_ne!(save_legacy(&world, before), save_legacy(&world, after));

    for fv in [before, after, legacy(60)] {
        let back = load_as(&world, fv);
        let tail = back.vehicles.handle_at(1).unwrap();
        assert_eq!(back.vehicles.get_index(0).unwrap().next, Link::live(tail), "{fv}");
        assert!(back.vehicles.get(tail).unwrap().next.is_null(), "{fv}");
    }
}
