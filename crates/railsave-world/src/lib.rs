//! Railsave World -- the persisted state of a tile-based transport game and
//! the chunk handlers that save and load it through `railsave-core`.
//!
//! A [`world::World`] owns one pool per object kind. Each kind registers a
//! chunk with save, load, fixup and post-load procedures; the core loader
//! drives them in its fixed phase order.
//!
//! # Chunks
//!
//! | Tag    | Contents                                          |
//! |--------|---------------------------------------------------|
//! | `DATE` | Calendar, tick counter and random seeds (record)  |
//! | `CITY` | Towns                                             |
//! | `CAPA` | Cargo packets                                     |
//! | `ORDR` | Orders                                            |
//! | `ORDL` | Shared order lists                                |
//! | `VEHS` | Vehicles                                          |
//! | `PSAC` | Persistent storage arrays                         |
//! | `STNS` | Stations of legacy files before 123 (load only)   |
//! | `STNN` | Stations and waypoints                            |
//! | `ROAD` | Road stops                                        |
//! | `DOCK` | Docks                                             |
//!
//! Files older than the unified station pool are repaired after load by
//! [`migrate::move_buoys_to_waypoints`].
//!
//! ```rust,ignore
//! let world = sample_world();
//! let bytes = railsave_core::save(&world);
//! let back: World = railsave_core::load(&bytes, &WorldConfig::default())?;
//! ```

pub mod cargo;
pub mod config;
pub mod flow;
pub mod globals;
pub mod ids;
pub mod migrate;
pub mod order;
pub mod station;
pub mod stop;
pub mod storage;
pub mod tile;
pub mod town;
pub mod vehicle;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigError, WorldConfig};
pub use station::{BaseStation, Station, Waypoint};
pub use world::World;
