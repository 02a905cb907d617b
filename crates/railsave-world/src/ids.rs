//! Identifiers, sentinels and shared constants of the world model.

/// Index of a map tile.
pub type TileIndex = u32;

/// No tile.
pub const INVALID_TILE: TileIndex = u32::MAX;

/// Pool index of a station or waypoint, as stored in orders and flows.
pub type StationId = u16;

/// No station.
pub const INVALID_STATION: StationId = 0xFFFF;

/// Index of a cargo type.
pub type CargoId = u8;

/// Cargo slots per station.
pub const NUM_CARGO: usize = 32;

/// Cargo slots per station in legacy files before 55.
pub const LEGACY_NUM_CARGO: usize = 12;

/// Days since year zero.
pub type Date = i32;

/// Owner of tiles nobody owns.
pub const OWNER_NONE: u8 = 0x10;

// ---------------------------------------------------------------------------
// Station facilities and history
// ---------------------------------------------------------------------------

pub const FACIL_NONE: u8 = 0;
pub const FACIL_TRAIN: u8 = 1 << 0;
pub const FACIL_TRUCK_STOP: u8 = 1 << 1;
pub const FACIL_BUS_STOP: u8 = 1 << 2;
pub const FACIL_AIRPORT: u8 = 1 << 3;
pub const FACIL_DOCK: u8 = 1 << 4;
/// Set on the leading byte of every persisted waypoint.
pub const FACIL_WAYPOINT: u8 = 1 << 7;

pub const HVOT_TRAIN: u8 = 1 << 1;
pub const HVOT_BUS: u8 = 1 << 2;
pub const HVOT_TRUCK: u8 = 1 << 3;
pub const HVOT_AIRCRAFT: u8 = 1 << 4;
pub const HVOT_SHIP: u8 = 1 << 5;
/// The station was a buoy or a rail waypoint in an old file.
pub const HVOT_WAYPOINT: u8 = 1 << 6;

// ---------------------------------------------------------------------------
// Station name strings
// ---------------------------------------------------------------------------

pub const STR_SV_STNAME: u16 = 0x300D;
pub const STR_SV_STNAME_WAYPOINT: u16 = 0x3033;
/// First of nine numbered buoy names.
pub const STR_SV_STNAME_BUOY: u16 = 0x3034;

/// Kind of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VehicleType {
    Train = 0,
    Road = 1,
    Ship = 2,
    Aircraft = 3,
    Effect = 4,
    Disaster = 5,
}

impl VehicleType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => VehicleType::Train,
            1 => VehicleType::Road,
            2 => VehicleType::Ship,
            3 => VehicleType::Aircraft,
            4 => VehicleType::Effect,
            5 => VehicleType::Disaster,
            _ => return None,
        })
    }
}
