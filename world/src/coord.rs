//! Coordinate algebra between tiles, slices and regions.
//!
//! A region is a `R`x`R` grid of slices; a slice is a `S`x`S` grid of tiles.
//! World-space tile coordinates convert to slice/region coordinates with bit
//! shifts since both `S` and `R` are powers of two.

use common::derive_more::{Add, From, Into, Sub};
use common::*;

/// Side length of a slice, in tiles.
pub const S: i32 = 16;
/// Side length of a region, in slices.
pub const R: i32 = 16;

const S_SHIFT: u32 = S.trailing_zeros();
const R_SHIFT: u32 = R.trailing_zeros();

/// Absolute tile coordinate in world space.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Add, Sub, Into, From)]
pub struct TilePoint(pub i32, pub i32);

/// Coordinate of a slice within its owning region, in `[0, R)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Into, From)]
pub struct SlicePoint(pub i32, pub i32);

/// Coordinate of a tile within its owning slice, in `[0, S)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Into, From)]
pub struct SliceBlock(pub i32, pub i32);

/// Coordinate of a region in region-space.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Add, Sub, Into, From)]
pub struct RegionPoint(pub i32, pub i32);

impl TilePoint {
    pub fn region(self) -> RegionPoint {
        RegionPoint(self.0 >> (S_SHIFT + R_SHIFT), self.1 >> (S_SHIFT + R_SHIFT))
    }

    pub fn slice(self) -> SlicePoint {
        SlicePoint(
            (self.0 >> S_SHIFT).rem_euclid(R),
            (self.1 >> S_SHIFT).rem_euclid(R),
        )
    }

    pub fn block(self) -> SliceBlock {
        SliceBlock(self.0.rem_euclid(S), self.1.rem_euclid(S))
    }
}

impl RegionPoint {
    pub const fn origin_tile(self) -> TilePoint {
        TilePoint(self.0 * S * R, self.1 * S * R)
    }

    /// The 8 neighbouring regions sharing an edge or corner, in a fixed order.
    pub fn neighbours(self) -> [RegionPoint; 8] {
        let RegionPoint(x, y) = self;
        [
            RegionPoint(x - 1, y - 1),
            RegionPoint(x, y - 1),
            RegionPoint(x + 1, y - 1),
            RegionPoint(x - 1, y),
            RegionPoint(x + 1, y),
            RegionPoint(x - 1, y + 1),
            RegionPoint(x, y + 1),
            RegionPoint(x + 1, y + 1),
        ]
    }

    /// Stable 8x8 stagger bucket used to spread saves across ticks, per the
    /// save-stagger design in the region store: `(ry mod 8) * 8 + (rx mod 8)`.
    pub fn save_stagger_bucket(self) -> u32 {
        let x = (self.0 & 7) as u32;
        let y = (self.1 & 7) as u32;
        y * 8 + x
    }
}

impl SlicePoint {
    pub fn index(self) -> usize {
        (self.1 * R + self.0) as usize
    }
}

impl SliceBlock {
    pub fn index(self) -> usize {
        (self.1 * S + self.0) as usize
    }
}

impl Debug for TilePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "[{}, {}]", self.0, self.1)
    }
}

impl Debug for RegionPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "({}, {})", self.0, self.1)
    }
}

impl Display for RegionPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "r_{}_{}", self.0, self.1)
    }
}

slog_value_debug!(TilePoint);
slog_kv_debug!(TilePoint, "tile");

slog_value_display!(RegionPoint);
slog_kv_display!(RegionPoint, "region");
