//! Pool capacities and map dimensions, read from TOML.
//!
//! Every key is optional:
//!
//! ```toml
//! map_log_x = 9
//!
//! [pools]
//! stations = 4096
//! vehicles = 65000
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::ids::INVALID_STATION;

/// Errors that can occur while reading a [`WorldConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("pool '{pool}' capacity {capacity} is outside 1..={max}")]
    Capacity {
        pool: &'static str,
        capacity: usize,
        max: usize,
    },

    #[error("map_log_x {0} is outside 6..=12")]
    MapSize(u8),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capacity of every pool a world owns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolCapacities {
    pub towns: usize,
    pub cargo_packets: usize,
    pub orders: usize,
    pub order_lists: usize,
    pub vehicles: usize,
    pub storages: usize,
    pub stations: usize,
    pub road_stops: usize,
    pub docks: usize,
}

impl Default for PoolCapacities {
    fn default() -> Self {
        Self {
            towns: 64_000,
            cargo_packets: 0xFF_0000,
            orders: 0xFF_0000,
            order_lists: 64_000,
            vehicles: 0xFF_000,
            storages: 64_000,
            stations: 64_000,
            road_stops: 64_000,
            docks: 64_000,
        }
    }
}

/// Everything needed to build an empty world.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Log2 of the map width in tiles.
    pub map_log_x: u8,
    pub pools: PoolCapacities,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            map_log_x: 8,
            pools: PoolCapacities::default(),
        }
    }
}

impl WorldConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// A config with every pool capped at `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map_log_x: 8,
            pools: PoolCapacities {
                towns: capacity,
                cargo_packets: capacity,
                orders: capacity,
                order_lists: capacity,
                vehicles: capacity,
                storages: capacity,
                stations: capacity,
                road_stops: capacity,
                docks: capacity,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=12).contains(&self.map_log_x) {
            return Err(ConfigError::MapSize(self.map_log_x));
        }
        let p = &self.pools;
        let station_max = usize::from(INVALID_STATION);
        let checks = [
            ("towns", p.towns, 0xFFFF),
            ("cargo_packets", p.cargo_packets, 0xFF_FFFF),
            ("orders", p.orders, 0xFF_FFFF),
            ("order_lists", p.order_lists, 0xFFFF),
            ("vehicles", p.vehicles, 0xFF_FFFF),
            ("storages", p.storages, 0xFFFF),
            ("stations", p.stations, station_max),
            ("road_stops", p.road_stops, 0xFFFF),
            ("docks", p.docks, 0xFFFF),
        ];
        for (pool, capacity, max) in checks {
            if capacity == 0 || capacity > max {
                return Err(ConfigError::Capacity { pool, capacity, max });
            }
        }
        Ok(())
    }
}
