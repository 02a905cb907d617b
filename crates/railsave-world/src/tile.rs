//! Rectangular tile areas on a map `1 << log_x` tiles wide.

use crate::ids::{INVALID_TILE, TileIndex};

pub fn tile_x(tile: TileIndex, log_x: u8) -> u32 {
    tile & ((1 << log_x) - 1)
}

pub fn tile_y(tile: TileIndex, log_x: u8) -> u32 {
    tile >> log_x
}

pub fn tile_xy(x: u32, y: u32, log_x: u8) -> TileIndex {
    (y << log_x) | x
}

/// Axis-aligned rectangle of tiles. Empty when `tile` is [`INVALID_TILE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileArea {
    pub tile: TileIndex,
    pub w: u16,
    pub h: u16,
}

impl Default for TileArea {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl TileArea {
    pub const EMPTY: TileArea = TileArea {
        tile: INVALID_TILE,
        w: 0,
        h: 0,
    };

    pub fn new(tile: TileIndex, w: u16, h: u16) -> Self {
        Self { tile, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.tile == INVALID_TILE
    }

    /// Grow the area to cover `tile`.
    pub fn add(&mut self, tile: TileIndex, log_x: u8) {
        if tile == INVALID_TILE {
            return;
        }
        if self.is_empty() {
            *self = TileArea::new(tile, 1, 1);
            return;
        }
        let (x, y) = (tile_x(tile, log_x), tile_y(tile, log_x));
        let (sx, sy) = (tile_x(self.tile, log_x), tile_y(self.tile, log_x));
        let (ex, ey) = (sx + u32::from(self.w) - 1, sy + u32::from(self.h) - 1);
        let (sx, sy) = (sx.min(x), sy.min(y));
        let (ex, ey) = (ex.max(x), ey.max(y));
        *self = TileArea::new(tile_xy(sx, sy, log_x), (ex - sx + 1) as u16, (ey - sy + 1) as u16);
    }

    /// Grow the area to cover all of `other`.
    pub fn union(&mut self, other: &TileArea, log_x: u8) {
        if other.is_empty() {
            return;
        }
        let (x, y) = (tile_x(other.tile, log_x), tile_y(other.tile, log_x));
        self.add(other.tile, log_x);
        let far_x = x + u32::from(other.w.max(1)) - 1;
        let far_y = y + u32::from(other.h.max(1)) - 1;
        self.add(tile_xy(far_x, far_y, log_x), log_x);
    }

    pub fn contains(&self, tile: TileIndex, log_x: u8) -> bool {
        if self.is_empty() || tile == INVALID_TILE {
            return false;
        }
        let (x, y) = (tile_x(tile, log_x), tile_y(tile, log_x));
        let (sx, sy) = (tile_x(self.tile, log_x), tile_y(self.tile, log_x));
        x >= sx && y >= sy && x < sx + u32::from(self.w) && y < sy + u32::from(self.h)
    }

    /// The tile of the area nearest to `tile`. An empty area returns `tile`.
    pub fn closest_tile(&self, tile: TileIndex, log_x: u8) -> TileIndex {
        if self.is_empty() {
            return tile;
        }
        let (sx, sy) = (tile_x(self.tile, log_x), tile_y(self.tile, log_x));
        let ex = sx + u32::from(self.w.max(1)) - 1;
        let ey = sy + u32::from(self.h.max(1)) - 1;
        let x = tile_x(tile, log_x).clamp(sx, ex);
        let y = tile_y(tile, log_x).clamp(sy, ey);
        tile_xy(x, y, log_x)
    }
}
