//! Core contract constants and the per-step tuning record.

use serde::{Deserialize, Serialize};

// ============================================================================
// WORLD DIMENSIONS & CAPACITIES
// ============================================================================

/// Default grid edge length (the world is GRID_SIZE x GRID_SIZE cells).
pub const GRID_SIZE: usize = 800;

/// Hard ceiling on sparks per buffer. Smaller worlds are additionally capped
/// at one spark per cell, which every seated buffer satisfies by occupancy
/// uniqueness.
pub const SPARK_CAP: usize = 150_000;

/// Population planted by `World::new`, `reseed` and the extinction safeguard.
pub const SPARK_COUNT_MIN: usize = 100_000;

// ============================================================================
// ENERGY ECONOMY
// ============================================================================

/// Upper bound on stored energy; every gain is clamped here.
pub const ENERGY_CAP: f32 = 2000.0;

/// Deducted per executed microcode atom.
pub const COST_ATOM: f32 = 0.001;

/// Deducted by a successful APPLY_MOVE.
pub const COST_MOVE: f32 = 0.3;

/// Deducted by a wall reflection instead of a move.
pub const WALL_REFLECT_COST: f32 = 0.1;

/// WRITE_GRID executes only above this energy, and deducts it. Kept above
/// the maximum solar yield so a write can never be farmed back.
pub const COST_WRITE: f32 = 20.0;

/// Up-front price of reproduction, deducted before the site check.
pub const COST_SPLIT: f32 = 15.0;

/// Fraction of COST_SPLIT returned when no valid child site exists.
pub const SPLIT_REFUND: f32 = 0.5;

/// SPLIT_COND only fires strictly above this energy.
pub const SPLIT_THRESHOLD: f32 = 50.0;

/// Symmetric energy loss when two sparks contend for one cell.
pub const COLLISION_COST: f32 = 8.0;

/// Deducted by TRANSFER on a void cell.
pub const VOID_DISSIPATION: f32 = 0.2;

/// Deducted from the acting spark by a completed CONJUGATE.
pub const CONJUGATE_COST: f32 = 0.5;

/// Flat per-tick age cost, plus a slope that grows with age.
pub const AGE_COST_BASE: f32 = 0.1;
pub const AGE_COST_SLOPE: f32 = 0.001;

// ============================================================================
// METABOLISM
// ============================================================================

/// Metabolism range is [0, METABOLISM_MAX].
pub const METABOLISM_MAX: f32 = 100.0;

/// Below this level the hunger penalty applies.
pub const METABOLISM_FLOOR: f32 = 20.0;

/// Lost per tick while effectively stationary (displacement <= 0.5).
pub const METABOLISM_DECAY: f32 = 2.0;

/// Gained per unit of toroidal displacement.
pub const METABOLISM_GAIN: f32 = 0.5;

/// Energy penalty per point of deficit under METABOLISM_FLOOR.
pub const METABOLISM_PENALTY: f32 = 0.15;

/// Metabolism at spawn and at birth.
pub const METABOLISM_SPAWN: f32 = 50.0;

// ============================================================================
// SCHEDULING & ENVIRONMENT
// ============================================================================

/// The visitation order is reshuffled every this many ticks.
pub const SHUFFLE_FREQUENCY: u32 = 4;

/// Random cells probed for solar regrowth per tick.
pub const SOLAR_REGROWTH_RATE: u32 = 2000;

/// An eligible probed cell regrows with probability 1/SOLAR_REGROWTH_CHANCE.
pub const SOLAR_REGROWTH_CHANCE: u32 = 2;

// ============================================================================
// GENOME SHAPE
// ============================================================================

/// Number of distinct microcode atoms.
pub const ATOM_COUNT: u8 = 20;

/// Library slots per genome.
pub const MICRO_FUNC_COUNT: usize = 16;

/// Atoms per library function.
pub const MICRO_FUNC_LEN: usize = 8;

/// Atoms inlined from the callee by CALL_FUNC.
pub const CALL_INLINE_LEN: usize = 4;

/// Inlined atoms run at half price.
pub const CALL_ATOM_COST: f32 = 0.5 * COST_ATOM;

// ============================================================================
// MUTATION & LINEAGE
// ============================================================================

/// Independent per-child mutation probabilities, in percent.
pub const MUT_POINT_PCT: u32 = 30;
pub const MUT_MATRIX_PCT: u32 = 20;
pub const MUT_DUP_PCT: u32 = 10;
pub const MUT_SHIFT_PCT: u32 = 5;
pub const MUT_STATE_PCT: u32 = 15;

/// Per-channel color drift probability, in percent.
pub const COLOR_DRIFT_PCT: u32 = 10;

/// Color drift delta is uniform in [-COLOR_DRIFT_MAX, COLOR_DRIFT_MAX].
pub const COLOR_DRIFT_MAX: i32 = 15;

/// Lineage channels never drift below this, keeping every spark visible.
pub const COLOR_MIN: u8 = 50;

// ============================================================================
// SPAWNING
// ============================================================================

/// Fresh spawn energy is uniform in [SPAWN_ENERGY_MIN, SPAWN_ENERGY_MAX].
pub const SPAWN_ENERGY_MIN: i32 = 50;
pub const SPAWN_ENERGY_MAX: i32 = 80;

/// Random positions tried for a unique spawn before overlap is accepted.
pub const SPAWN_RETRY_LIMIT: usize = 16;

/// Default solar yield scaler (see `Tuning::solar_bonus_max`).
pub const SOLAR_BONUS_DEFAULT: f32 = 15.0;

// ============================================================================
// PER-STEP TUNING
// ============================================================================

/// Inputs a host resolves before each step. The core treats these as plain
/// numbers; policy (population-pressure scaling, UI sliders) stays outside.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    /// Extra energy yielded by the brightest solar tile on top of the base
    /// yield of 1. The dimmest tile yields 1 regardless of this value.
    pub solar_bonus_max: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            solar_bonus_max: SOLAR_BONUS_DEFAULT,
        }
    }
}
