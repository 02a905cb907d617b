//! Property-based round trips of generated worlds.
//!
//! Pools are filled at random indices with random retired slots, stations
//! get random flows and cargo lists, and vehicles link to random other
//! vehicles, cycles included.

use proptest::prelude::*;
use railsave_core::{load, save};
use railsave_world::flow::FlowStat;
use railsave_world::ids::{INVALID_STATION, VehicleType};
use railsave_world::test_utils::*;
use railsave_world::vehicle::Vehicle;
use railsave_world::{Station, World, WorldConfig};

// ===========================================================================
// Generators
// ===========================================================================

/// Per index below the bound: absent, retired, or live.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Vacant,
    Retired,
    Live,
}

fn arb_slots(max: usize) -> impl Strategy<Value = Vec<Slot>> {
    prop::collection::vec(
        prop_oneof![
            2 => Just(Slot::Vacant),
            1 => Just(Slot::Retired),
            4 => Just(Slot::Live),
        ],
        0..max,
    )
}

/// One flow share per entry: (source, via, share, restricted).
fn arb_flows() -> impl Strategy<Value = Vec<(u16, u16, u32, bool)>> {
    prop::collection::vec((0u16..6, 0u16..6, 1u32..1000, any::<bool>()), 0..8)
}

#[derive(Debug, Clone)]
struct Plan {
    town_slots: Vec<Slot>,
    town_names: Vec<String>,
    packet_slots: Vec<Slot>,
    vehicle_slots: Vec<Slot>,
    vehicle_links: Vec<u8>,
    station_slots: Vec<Slot>,
    flows: Vec<(u16, u16, u32, bool)>,
    destinations: Vec<u16>,
}

fn arb_plan() -> impl Strategy<Value = Plan> {
    (
        arb_slots(12),
        prop::collection::vec("[a-zA-Z ]{0,20}", 12),
        arb_slots(24),
        arb_slots(10),
        prop::collection::vec(any::<u8>(), 10),
        arb_slots(6),
        arb_flows(),
        prop::collection::vec(prop_oneof![Just(INVALID_STATION), 0u16..6], 0..4),
    )
        .prop_map(
            |(
                town_slots,
                town_names,
                packet_slots,
                vehicle_slots,
                vehicle_links,
                station_slots,
                flows,
                destinations,
            )| Plan {
                town_slots,
                town_names,
                packet_slots,
                vehicle_slots,
                vehicle_links,
                station_slots,
                flows,
                destinations,
            },
        )
}

fn fill<T>(pool: &mut railsave_core::Pool<T>, slots: &[Slot], mut make: impl FnMut(usize) -> T) {
    for (i, slot) in slots.iter().enumerate() {
        match slot {
            Slot::Vacant => {}
            Slot::Retired => pool.retire_at(i as u32).unwrap(),
            Slot::Live => {
                pool.insert_at(i as u32, make(i)).unwrap();
            }
        }
    }
}

fn build(plan: &Plan) -> World {
    let mut world = empty_world();
    fill(&mut world.towns, &plan.town_slots, |i| town(&plan.town_names[i], tile(i as u32, 7)));
    fill(&mut world.cargo_packets, &plan.packet_slots, |i| packet(i as u16, i as u16 + 1));

    fill(&mut world.vehicles, &plan.vehicle_slots, |i| {
        Vehicle::new(VehicleType::Train, tile(i as u32, 9))
    });
    let live: Vec<u32> = world.vehicles.iter().map(|(h, _)| h.index()).collect();
    for (n, &index) in live.iter().enumerate() {
        let target = live[usize::from(plan.vehicle_links[n]) % live.len()];
        let next = link_at(&world.vehicles, target);
        if let Some(v) = world.vehicles.get_index_mut(index) {
            v.next = next;
        }
    }

    // Restricted shares follow every unrestricted share of their source.
    let mut flows = plan.flows.clone();
    flows.sort_by_key(|&(_, _, _, restricted)| restricted);

    let packets: Vec<u32> = world.cargo_packets.iter().map(|(h, _)| h.index()).collect();
    fill(&mut world.stations, &plan.station_slots, |i| {
        let mut st = Station::new(tile(20 + i as u32, 20));
        for &(source, via, share, restricted) in &flows {
            match st.goods[1].flows.get_mut(&source) {
                Some(stat) => stat.append_share(via, share, restricted),
                None => {
                    st.goods[1].flows.insert(source, FlowStat::new(via, share, restricted));
                }
            }
        }
        st.into()
    });
    let station_indices: Vec<u32> = world.stations.iter().map(|(h, _)| h.index()).collect();
    for (n, &dest) in plan.destinations.iter().enumerate() {
        let (Some(&packet), Some(&station)) = (packets.get(n), station_indices.first()) else { break };
        let link = link_at(&world.cargo_packets, packet);
        if let Some(st) = world.stations.get_index_mut(station).and_then(|b| b.as_station_mut()) {
            st.goods[1].cargo.append(link, dest);
        }
    }

    rebuild_derived(&mut world);
    world
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generated_worlds_round_trip(plan in arb_plan()) {
        let world = build(&plan);
        let bytes = save(&world);
        let back: World = load(&bytes, &WorldConfig::default()).unwrap();
        assert_same_world(&world, &back);
        prop_assert_eq!(save(&back), bytes);
    }

    #[test]
    fn restricted_share_never_exceeds_total(plan in arb_plan()) {
        let back: World = load(&save(&build(&plan)), &WorldConfig::default()).unwrap();
        for (_, bst) in back.stations.iter() {
            let Some(st) = bst.as_station() else { continue };
            for stat in st.goods[1].flows.values() {
                prop_assert!(stat.unrestricted() <= stat.total());
                prop_assert!(stat.total() > 0);
            }
        }
    }

    #[test]
    fn legacy_pools_keep_their_slots(plan in arb_plan(), major in 69u16..200) {
        let world = build(&plan);
        let back: World = load(&save_legacy(&world, legacy(major)), &WorldConfig::default()).unwrap();
        let states = |w: &World| w.cargo_packets.slot_states().collect::<Vec<_>>();
        prop_assert_eq!(states(&back), states(&world));
        let towns = |w: &World| w.towns.iter().map(|(h, t)| (h.index(), t.population)).collect::<Vec<_>>();
        prop_assert_eq!(towns(&back), towns(&world));
    }
}
