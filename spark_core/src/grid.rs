//! The shared byte grid: environment and write substrate.
//!
//! Every cell is one byte whose value range encodes its type:
//!
//! ```text
//! ┌───────────┬───────────┬───────────┬───────────┐
//! │   0..=63  │  64..=127 │ 128..=191 │ 192..=255 │
//! │   VOID    │   WALL    │   SOLAR   │   DATA    │
//! └───────────┴───────────┴───────────┴───────────┘
//! ```
//!
//! The four ranges are each 64 wide, so `value >> 6` classifies a cell.
//! Cell values change only through the VM write atom, solar absorption and
//! regrowth.

use crate::rng::XorShift32;

// ============================================================================
// CELL ENCODING
// ============================================================================

pub const VOID_MIN: u8 = 0;
pub const VOID_MAX: u8 = 63;
pub const WALL_MIN: u8 = 64;
pub const WALL_MAX: u8 = 127;
pub const SOLAR_MIN: u8 = 128;
pub const SOLAR_MAX: u8 = 191;
pub const DATA_MIN: u8 = 192;
pub const DATA_MAX: u8 = 255;

/// Width of each value range.
pub const RANGE_WIDTH: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Void,
    Wall,
    Solar,
    Data,
}

/// Classify a cell byte. Total: every byte maps to exactly one kind.
#[inline(always)]
pub fn kind(value: u8) -> CellKind {
    match value >> 6 {
        0 => CellKind::Void,
        1 => CellKind::Wall,
        2 => CellKind::Solar,
        _ => CellKind::Data,
    }
}

#[inline(always)]
pub fn is_void(value: u8) -> bool {
    value <= VOID_MAX
}

#[inline(always)]
pub fn is_wall(value: u8) -> bool {
    (WALL_MIN..=WALL_MAX).contains(&value)
}

#[inline(always)]
pub fn is_solar(value: u8) -> bool {
    (SOLAR_MIN..=SOLAR_MAX).contains(&value)
}

#[inline(always)]
pub fn is_data(value: u8) -> bool {
    value >= DATA_MIN
}

// ============================================================================
// TERRAIN MIX
// ============================================================================

// Initial proportions in percent: VOID 5, WALL 20, SOLAR 50, DATA 25.
// Thresholds are cumulative over a single 0..100 roll.
const TERRAIN_VOID_CUM: u32 = 5;
const TERRAIN_WALL_CUM: u32 = 25;
const TERRAIN_SOLAR_CUM: u32 = 75;

// ============================================================================
// GRID
// ============================================================================

pub struct Grid {
    size: usize,
    cells: Vec<u8>,
}

impl Grid {
    /// Allocate and seed a size x size grid from the terrain mix.
    pub fn new(size: usize, rng: &mut XorShift32) -> Self {
        let mut grid = Self {
            size,
            cells: vec![0; size * size],
        };
        grid.regenerate(rng);
        grid
    }

    /// Redraw every cell from the terrain mix, keeping the allocation.
    pub fn regenerate(&mut self, rng: &mut XorShift32) {
        for cell in self.cells.iter_mut() {
            let roll = rng.bounded(100);
            let base = if roll < TERRAIN_VOID_CUM {
                VOID_MIN
            } else if roll < TERRAIN_WALL_CUM {
                WALL_MIN
            } else if roll < TERRAIN_SOLAR_CUM {
                SOLAR_MIN
            } else {
                DATA_MIN
            };
            *cell = base + rng.bounded(RANGE_WIDTH) as u8;
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Convert (x, y) to flat index. 800 is not a power of two, so this is a
    /// real multiply rather than a shift-and-mask.
    #[inline(always)]
    pub fn index(&self, x: u16, y: u16) -> usize {
        y as usize * self.size + x as usize
    }

    /// Convert flat index back to (x, y).
    #[inline(always)]
    pub fn coords(&self, idx: usize) -> (u16, u16) {
        ((idx % self.size) as u16, (idx / self.size) as u16)
    }

    #[inline(always)]
    pub fn get(&self, x: u16, y: u16) -> u8 {
        self.cells[self.index(x, y)]
    }

    #[inline(always)]
    pub fn get_at(&self, idx: usize) -> u8 {
        self.cells[idx]
    }

    #[inline(always)]
    pub fn set_at(&mut self, idx: usize, value: u8) {
        self.cells[idx] = value;
    }

    /// Overwrite the whole grid with one value (test terrain sculpting).
    pub fn fill(&mut self, value: u8) {
        self.cells.fill(value);
    }

    /// Wrap a possibly out-of-range coordinate onto the torus.
    #[inline(always)]
    pub fn wrap(&self, v: i32) -> u16 {
        v.rem_euclid(self.size as i32) as u16
    }

    #[inline(always)]
    pub fn wrap_pos(&self, x: i32, y: i32) -> (u16, u16) {
        (self.wrap(x), self.wrap(y))
    }

    /// Euclidean distance between two positions, measured around the torus.
    pub fn toroidal_displacement(&self, ax: u16, ay: u16, bx: u16, by: u16) -> f32 {
        let size = self.size as i32;
        let mut dx = (ax as i32 - bx as i32).abs();
        let mut dy = (ay as i32 - by as i32).abs();
        dx = dx.min(size - dx);
        dy = dy.min(size - dy);
        ((dx * dx + dy * dy) as f32).sqrt()
    }
}
