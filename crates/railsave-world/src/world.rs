//! The complete persisted game state and its chunk table.

use railsave_core::migration::MigrationRegistry;
use railsave_core::{ChunkHandler, ChunkKind, Pool, Pooled, ReferenceTable, SaveGame};

use crate::cargo::{self, CAPA, CargoPacket};
use crate::config::WorldConfig;
use crate::globals::{self, DATE, GameGlobals};
use crate::migrate;
use crate::order::{self, ORDL, ORDR, Order, OrderList};
use crate::station::{self, BaseStation, STNN, STNS};
use crate::stop::{self, DOCK, Dock, ROAD, RoadStop};
use crate::storage::{self, PSAC, PersistentStorage};
use crate::town::{self, CITY, Town};
use crate::vehicle::{self, VEHS, Vehicle};

/// Everything a savegame holds.
#[derive(Debug)]
pub struct World {
    /// Log2 of the map width; used to rebuild tile areas.
    pub map_log_x: u8,
    pub globals: GameGlobals,
    pub towns: Pool<Town>,
    pub cargo_packets: Pool<CargoPacket>,
    pub orders: Pool<Order>,
    pub order_lists: Pool<OrderList>,
    pub vehicles: Pool<Vehicle>,
    pub storages: Pool<PersistentStorage>,
    pub stations: Pool<BaseStation>,
    pub road_stops: Pool<RoadStop>,
    pub docks: Pool<Dock>,
}

impl World {
    pub fn new(config: &WorldConfig) -> Self {
        let p = &config.pools;
        Self {
            map_log_x: config.map_log_x,
            globals: GameGlobals::default(),
            towns: Pool::new("towns", p.towns),
            cargo_packets: Pool::new("cargo_packets", p.cargo_packets),
            orders: Pool::new("orders", p.orders),
            order_lists: Pool::new("order_lists", p.order_lists),
            vehicles: Pool::new("vehicles", p.vehicles),
            storages: Pool::new("storages", p.storages),
            stations: Pool::new("stations", p.stations),
            road_stops: Pool::new("road_stops", p.road_stops),
            docks: Pool::new("docks", p.docks),
        }
    }

    /// Live objects per pool, in handler order.
    pub fn object_counts(&self) -> [(&'static str, usize); 9] {
        [
            (self.towns.name(), self.towns.len()),
            (self.cargo_packets.name(), self.cargo_packets.len()),
            (self.orders.name(), self.orders.len()),
            (self.order_lists.name(), self.order_lists.len()),
            (self.vehicles.name(), self.vehicles.len()),
            (self.storages.name(), self.storages.len()),
            (self.stations.name(), self.stations.len()),
            (self.road_stops.name(), self.road_stops.len()),
            (self.docks.name(), self.docks.len()),
        ]
    }
}

static HANDLERS: [ChunkHandler<World>; 11] = [
    ChunkHandler {
        tag: DATE,
        kind: ChunkKind::Record,
        save: Some(globals::save_date),
        load: globals::load_date,
        fixup: None,
        post_load: None,
    },
    ChunkHandler {
        tag: CITY,
        kind: ChunkKind::Array,
        save: Some(town::save_city),
        load: town::load_city,
        fixup: None,
        post_load: None,
    },
    ChunkHandler {
        tag: CAPA,
        kind: ChunkKind::Array,
        save: Some(cargo::save_capa),
        load: cargo::load_capa,
        fixup: None,
        post_load: None,
    },
    ChunkHandler {
        tag: ORDR,
        kind: ChunkKind::Array,
        save: Some(order::save_ordr),
        load: order::load_ordr,
        fixup: Some(order::fixup_ordr),
        post_load: None,
    },
    ChunkHandler {
        tag: ORDL,
        kind: ChunkKind::Array,
        save: Some(order::save_ordl),
        load: order::load_ordl,
        fixup: Some(order::fixup_ordl),
        post_load: Some(order::after_load_order_lists),
    },
    ChunkHandler {
        tag: VEHS,
        kind: ChunkKind::Array,
        save: Some(vehicle::save_vehs),
        load: vehicle::load_vehs,
        fixup: Some(vehicle::fixup_vehs),
        post_load: None,
    },
    ChunkHandler {
        tag: PSAC,
        kind: ChunkKind::Array,
        save: Some(storage::save_psac),
        load: storage::load_psac,
        fixup: None,
        post_load: None,
    },
    ChunkHandler {
        tag: STNS,
        kind: ChunkKind::Array,
        save: None,
        load: station::load_stns,
        fixup: Some(station::fixup_stns),
        post_load: None,
    },
    ChunkHandler {
        tag: STNN,
        kind: ChunkKind::Array,
        save: Some(station::save_stnn),
        load: station::load_stnn,
        fixup: Some(station::fixup_stnn),
        post_load: Some(station::after_load_stations),
    },
    ChunkHandler {
        tag: ROAD,
        kind: ChunkKind::Array,
        save: Some(stop::save_road),
        load: stop::load_road,
        fixup: Some(stop::fixup_road),
        post_load: None,
    },
    ChunkHandler {
        tag: DOCK,
        kind: ChunkKind::Array,
        save: Some(stop::save_dock),
        load: stop::load_dock,
        fixup: Some(stop::fixup_dock),
        post_load: None,
    },
];

impl SaveGame for World {
    type Config = WorldConfig;

    fn chunk_handlers() -> &'static [ChunkHandler<Self>] {
        &HANDLERS
    }

    fn empty(config: &WorldConfig) -> Self {
        World::new(config)
    }

    fn reference_table(&self) -> ReferenceTable {
        ReferenceTable::new()
            .with_pool(Town::KIND, &self.towns)
            .with_pool(CargoPacket::KIND, &self.cargo_packets)
            .with_pool(Order::KIND, &self.orders)
            .with_pool(OrderList::KIND, &self.order_lists)
            .with_pool(Vehicle::KIND, &self.vehicles)
            .with_pool(PersistentStorage::KIND, &self.storages)
            .with_pool(BaseStation::KIND, &self.stations)
            .with_pool(RoadStop::KIND, &self.road_stops)
            .with_pool(Dock::KIND, &self.docks)
    }

    fn migrations() -> MigrationRegistry<Self> {
        MigrationRegistry::new().with(
            migrate::MOVE_BUOYS,
            migrate::before_waypoint_pool,
            migrate::move_buoys_to_waypoints,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_handler_tag_is_unique() {
        let tags: Vec<_> = HANDLERS.iter().map(|h| h.tag).collect();
        for (i, tag) in tags.iter().enumerate() {
            assert!(!tags[i + 1..].contains(tag), "{tag} registered twice");
        }
    }

    #[test]
    fn only_legacy_stations_are_load_only() {
        let load_only: Vec<_> = HANDLERS.iter().filter(|h| h.save.is_none()).map(|h| h.tag).collect();
        assert_eq!(load_only, vec![STNS]);
    }

    #[test]
    fn pools_take_configured_capacities() {
        let world = World::new(&WorldConfig::with_capacity(3));
        assert_eq!(world.stations.capacity(), 3);
        assert!(world.object_counts().iter().all(|&(_, n)| n == 0));
    }
}
