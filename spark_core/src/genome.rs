//! Genome: decision matrix, microcode library, and the mutation operators.
//!
//! A genome is two inline tables: a 256-entry decision matrix mapping an
//! 8-bit key (`internal_state XOR grid value`) to one of 16 library slots,
//! and the library itself, 16 functions of 8 atoms. Children receive a deep
//! copy of the parent genome; the copy then passes through the mutation
//! operators below. Horizontal transfer (CONJUGATE) swaps slots between two
//! live genomes and lives in the VM.

use crate::config::{
    ATOM_COUNT, COLOR_DRIFT_MAX, COLOR_DRIFT_PCT, COLOR_MIN, MICRO_FUNC_COUNT, MICRO_FUNC_LEN,
    MUT_DUP_PCT, MUT_MATRIX_PCT, MUT_POINT_PCT, MUT_SHIFT_PCT, MUT_STATE_PCT,
};
use crate::rng::XorShift32;
use crate::spark::Spark;

/// Decision matrix entries, one per 8-bit key.
pub const MATRIX_LEN: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct Genome {
    /// Key -> library slot (0..16).
    pub matrix: [u8; MATRIX_LEN],
    /// 16 functions of 8 atoms each.
    pub library: [[u8; MICRO_FUNC_LEN]; MICRO_FUNC_COUNT],
}

impl Genome {
    /// Uniform random genome for fresh seeds.
    pub fn random(rng: &mut XorShift32) -> Self {
        let mut genome = Genome {
            matrix: [0; MATRIX_LEN],
            library: [[0; MICRO_FUNC_LEN]; MICRO_FUNC_COUNT],
        };
        for entry in genome.matrix.iter_mut() {
            *entry = rng.bounded(MICRO_FUNC_COUNT as u32) as u8;
        }
        for func in genome.library.iter_mut() {
            for atom in func.iter_mut() {
                *atom = rng.bounded(ATOM_COUNT as u32) as u8;
            }
        }
        genome
    }

    /// Library slot selected by the decision matrix for `key`.
    #[inline(always)]
    pub fn decide(&self, key: u8) -> usize {
        (self.matrix[key as usize] & 0x0F) as usize
    }
}

// ============================================================================
// MUTATION
// ============================================================================

/// Apply the hereditary operators to a freshly copied child. Each operator
/// rolls independently; color drift always gets its per-channel rolls.
pub fn mutate_child(child: &mut Spark, rng: &mut XorShift32) {
    // Point mutation: one random atom is rewritten.
    if rng.percent(MUT_POINT_PCT) {
        let func = rng.bounded(MICRO_FUNC_COUNT as u32) as usize;
        let slot = rng.bounded(MICRO_FUNC_LEN as u32) as usize;
        child.genome.library[func][slot] = rng.bounded(ATOM_COUNT as u32) as u8;
    }
    // Decision rewiring: one key maps to a new function.
    if rng.percent(MUT_MATRIX_PCT) {
        let key = rng.bounded(MATRIX_LEN as u32) as usize;
        child.genome.matrix[key] = rng.bounded(MICRO_FUNC_COUNT as u32) as u8;
    }
    // Gene duplication: one function overwrites a different slot.
    if rng.percent(MUT_DUP_PCT) {
        let src = rng.bounded(MICRO_FUNC_COUNT as u32) as usize;
        let dst = (src + 1 + rng.bounded(MICRO_FUNC_COUNT as u32 - 1) as usize) % MICRO_FUNC_COUNT;
        child.genome.library[dst] = child.genome.library[src];
    }
    // Frame shift: rotate one function's atoms left by one.
    if rng.percent(MUT_SHIFT_PCT) {
        let func = rng.bounded(MICRO_FUNC_COUNT as u32) as usize;
        child.genome.library[func].rotate_left(1);
    }
    // Internal-state flip.
    if rng.percent(MUT_STATE_PCT) {
        child.internal_state ^= rng.byte();
    }
    drift_color(&mut child.color, rng);
}

/// Per-channel lineage drift: rare, small, clamped to the visible band.
pub fn drift_color(color: &mut [u8; 3], rng: &mut XorShift32) {
    for channel in color.iter_mut() {
        if rng.percent(COLOR_DRIFT_PCT) {
            let delta = rng.int_inclusive(-COLOR_DRIFT_MAX, COLOR_DRIFT_MAX);
            *channel = (*channel as i32 + delta).clamp(COLOR_MIN as i32, 255) as u8;
        }
    }
}

// ============================================================================
// SEED COLORS
// ============================================================================

/// Hue-spread seed color: HSV with s = 0.8, v = 1.0. These parameters put
/// every channel in [51, 255], inside the lineage band.
pub fn random_seed_color(rng: &mut XorShift32) -> [u8; 3] {
    hsv_to_rgb(rng.bounded(360) as f32, 0.8, 1.0)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}
