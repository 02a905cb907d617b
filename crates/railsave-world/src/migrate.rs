//! One-shot repair of worlds from before waypoints had their own kind.
//!
//! Old files stored buoys and rail waypoints as ordinary stations that had
//! seen a waypoint-class vehicle. After load each such station is replaced,
//! at the same pool index, by a [`Waypoint`], and the orders of ships and
//! trains that head there become waypoint orders.

use railsave_core::migration::MigrationError;
use railsave_core::{FormatVersion, Pool};
use tracing::info;

use crate::ids::{
    FACIL_DOCK, FACIL_TRAIN, HVOT_WAYPOINT, OWNER_NONE, STR_SV_STNAME_BUOY, STR_SV_STNAME_WAYPOINT, StationId,
};
use crate::order::{OrderBody, OrderType, chain};
use crate::station::{BaseStation, Station, Waypoint};
use crate::vehicle::Vehicle;
use crate::world::World;

pub const MOVE_BUOYS: &str = "move_buoys_to_waypoints";

/// Numbered buoy names reserved after [`STR_SV_STNAME_BUOY`].
const BUOY_NAMES: u16 = 9;

/// Whether `fv` predates waypoints sharing the station pool.
pub fn before_waypoint_pool(fv: &FormatVersion) -> bool {
    fv.is_legacy_before(123, 0)
}

fn is_waypoint_station(stations: &Pool<BaseStation>, id: StationId) -> bool {
    stations
        .get_index(u32::from(id))
        .and_then(BaseStation::as_station)
        .is_some_and(|st| st.had_vehicle_of_type & HVOT_WAYPOINT != 0)
}

fn update_waypoint_order(body: &mut OrderBody, stations: &Pool<BaseStation>) {
    if body.is_type(OrderType::GotoStation) && is_waypoint_station(stations, body.dest) {
        body.make_goto_waypoint(body.dest);
    }
}

fn into_waypoint(st: Station, log_x: u8) -> Waypoint {
    let base = st.base;
    let train = !base.train_station.is_empty();
    let mut wp = Waypoint::new(base.xy);
    wp.base.town = base.town;
    wp.base.string_id = if train {
        STR_SV_STNAME_WAYPOINT
    } else {
        STR_SV_STNAME_BUOY
    };
    wp.base.name = base.name;
    wp.base.build_date = base.build_date;
    wp.base.owner = if train { base.owner } else { OWNER_NONE };
    if (STR_SV_STNAME_BUOY..STR_SV_STNAME_BUOY + BUOY_NAMES).contains(&base.string_id) {
        wp.town_cn = base.string_id - STR_SV_STNAME_BUOY;
    }
    if train {
        wp.base.train_station = base.train_station;
        wp.base.rect.union(&base.train_station, log_x);
        wp.base.facilities |= FACIL_TRAIN;
    } else {
        wp.base.rect.add(base.xy, log_x);
        wp.base.facilities |= FACIL_DOCK;
    }
    wp
}

/// Reclassify buoy and rail-waypoint stations. Returns how many stations
/// became waypoints. Handles to the converted stations go stale.
pub fn move_buoys_to_waypoints(world: &mut World, _: &FormatVersion) -> Result<usize, MigrationError> {
    let log_x = world.map_log_x;
    let World {
        stations,
        orders,
        order_lists,
        vehicles,
        ..
    } = world;

    for (_, list) in order_lists.iter() {
        let visits = list
            .first_shared
            .and_then(|h| vehicles.get(h))
            .is_some_and(Vehicle::visits_waypoints);
        if !visits {
            continue;
        }
        let chained: Vec<_> = chain(orders, list.first).collect();
        for handle in chained {
            if let Some(order) = orders.get_mut(handle) {
                update_waypoint_order(&mut order.body, stations);
            }
        }
    }

    for (_, vehicle) in vehicles.iter_mut() {
        if vehicle.visits_waypoints() {
            update_waypoint_order(&mut vehicle.current_order, stations);
        }
    }

    let converted: Vec<u32> = stations
        .iter()
        .filter(|(_, bst)| {
            bst.as_station()
                .is_some_and(|st| st.had_vehicle_of_type & HVOT_WAYPOINT != 0)
        })
        .map(|(handle, _)| handle.index())
        .collect();
    for &index in &converted {
        stations
            .reconstruct_at(index, |bst| match bst {
                BaseStation::Station(st) => BaseStation::Waypoint(into_waypoint(*st, log_x)),
                waypoint => waypoint,
            })
            .ok_or(MigrationError::MissingObject {
                name: MOVE_BUOYS,
                index,
            })?;
    }

    info!(count = converted.len(), "stations converted to waypoints");
    Ok(converted.len())
}
