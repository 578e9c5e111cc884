//! The microcode VM: 20 atoms interpreted against a spark and the world.
//!
//! Execution fetches the 8-atom function chosen by the decision matrix and
//! walks it with a program counter. Every atom costs `COST_ATOM` up front;
//! execution halts as soon as energy is non-positive. Side effects reach the
//! spark, the grid, the write buffer (conjugation) and the world RNG, in
//! visitation order only.

use crate::config::{
    CALL_ATOM_COST, CALL_INLINE_LEN, CONJUGATE_COST, COST_ATOM, COST_MOVE, COST_SPLIT, COST_WRITE,
    ENERGY_CAP, METABOLISM_SPAWN, MICRO_FUNC_COUNT, MICRO_FUNC_LEN, SPLIT_REFUND, SPLIT_THRESHOLD,
    Tuning, VOID_DISSIPATION, WALL_REFLECT_COST,
};
use crate::genome::mutate_child;
use crate::grid::{is_wall, kind, CellKind, RANGE_WIDTH, SOLAR_MIN, VOID_MAX};
use crate::spark::Spark;
use crate::world::World;

// ============================================================================
// ATOM IDS
// ============================================================================

pub const OP_NOP: u8 = 0;
pub const OP_SET_DX_POS: u8 = 1;
pub const OP_SET_DX_NEG: u8 = 2;
pub const OP_SET_DY_POS: u8 = 3;
pub const OP_SET_DY_NEG: u8 = 4;
pub const OP_APPLY_MOVE: u8 = 5;
pub const OP_READ_GRID: u8 = 6;
pub const OP_WRITE_GRID: u8 = 7;
pub const OP_LOAD_ENG: u8 = 8;
pub const OP_TRANSFER: u8 = 9;
pub const OP_SPLIT_COND: u8 = 10;
pub const OP_REG_INC: u8 = 11;
pub const OP_REG_DEC: u8 = 12;
pub const OP_SWAP_REGS: u8 = 13;
pub const OP_JUMP_IF: u8 = 14;
pub const OP_RESET: u8 = 15;
pub const OP_CONJUGATE: u8 = 16;
pub const OP_SENSE_AHEAD: u8 = 17;
pub const OP_CALL_FUNC: u8 = 18;
pub const OP_RANDOM: u8 = 19;

/// Program-counter effect of an atom.
enum Flow {
    Continue,
    SkipNext,
}

/// Atoms CALL_FUNC may inline: motor setters, movement, register
/// arithmetic, register swap and TRANSFER. Everything else, including a
/// nested CALL_FUNC, is skipped.
#[inline(always)]
fn call_safe(atom: u8) -> bool {
    matches!(
        atom,
        OP_SET_DX_POS..=OP_APPLY_MOVE | OP_TRANSFER | OP_REG_INC | OP_REG_DEC | OP_SWAP_REGS
    )
}

impl World {
    /// Run one microcode function against a spark being visited.
    pub(crate) fn run_function(&mut self, spark: &mut Spark, func: usize, tuning: &Tuning) {
        debug_assert!(func < MICRO_FUNC_COUNT, "function index {func} out of range");
        let atoms = spark.genome.library[func];
        let mut pc = 0;
        while pc < MICRO_FUNC_LEN {
            let atom = atoms[pc];
            spark.energy -= COST_ATOM;
            if spark.energy <= 0.0 {
                return;
            }
            let flow = self.exec_atom(spark, atom, tuning);
            if spark.energy <= 0.0 {
                return;
            }
            pc += match flow {
                Flow::Continue => 1,
                Flow::SkipNext => 2,
            };
        }
    }

    fn exec_atom(&mut self, spark: &mut Spark, atom: u8, tuning: &Tuning) -> Flow {
        match atom {
            OP_NOP => {}
            OP_SET_DX_POS => spark.dx = 1,
            OP_SET_DX_NEG => spark.dx = -1,
            OP_SET_DY_POS => spark.dy = 1,
            OP_SET_DY_NEG => spark.dy = -1,
            OP_APPLY_MOVE => self.op_apply_move(spark),
            OP_READ_GRID => spark.reg_a = self.grid.get(spark.x, spark.y),
            OP_WRITE_GRID => {
                // Strictly above the cost; writing must never be farmable.
                if spark.energy > COST_WRITE {
                    let idx = self.grid.index(spark.x, spark.y);
                    self.grid.set_at(idx, spark.reg_a);
                    spark.energy -= COST_WRITE;
                }
            }
            OP_LOAD_ENG => spark.reg_a = (spark.energy * 1.275).clamp(0.0, 255.0) as u8,
            OP_TRANSFER => self.op_transfer(spark, tuning),
            OP_SPLIT_COND => {
                if spark.energy > SPLIT_THRESHOLD {
                    self.op_split(spark);
                }
            }
            OP_REG_INC => spark.reg_a = spark.reg_a.wrapping_add(1),
            OP_REG_DEC => spark.reg_a = spark.reg_a.wrapping_sub(1),
            OP_SWAP_REGS => std::mem::swap(&mut spark.reg_a, &mut spark.reg_b),
            OP_JUMP_IF => {
                if spark.reg_a > 128 {
                    return Flow::SkipNext;
                }
            }
            OP_RESET => {
                spark.dx = 0;
                spark.dy = 0;
                spark.reg_a = 0;
                spark.reg_b = 0;
            }
            OP_CONJUGATE => self.op_conjugate(spark),
            OP_SENSE_AHEAD => self.op_sense_ahead(spark),
            OP_CALL_FUNC => self.op_call_func(spark, tuning),
            OP_RANDOM => spark.reg_a = self.rng.byte(),
            _ => debug_assert!(false, "atom {atom} out of range"),
        }
        Flow::Continue
    }

    /// Move one cell along the motor, or reflect off a wall. Even wall
    /// values flip the x motor, odd the y motor.
    fn op_apply_move(&mut self, spark: &mut Spark) {
        let (nx, ny) = self
            .grid
            .wrap_pos(spark.x as i32 + spark.dx as i32, spark.y as i32 + spark.dy as i32);
        let dest = self.grid.get(nx, ny);
        if is_wall(dest) {
            if dest % 2 == 0 {
                spark.dx = -spark.dx;
            } else {
                spark.dy = -spark.dy;
            }
            spark.energy -= WALL_REFLECT_COST;
        } else {
            spark.x = nx;
            spark.y = ny;
            spark.energy -= COST_MOVE;
        }
    }

    /// Universal environmental interaction at the current cell.
    fn op_transfer(&mut self, spark: &mut Spark, tuning: &Tuning) {
        let idx = self.grid.index(spark.x, spark.y);
        let value = self.grid.get_at(idx);
        match kind(value) {
            CellKind::Solar => {
                // Yield scales linearly across the band: the dimmest tile
                // gives 1, the brightest 1 + solar_bonus_max. The tile is
                // fully drained to void.
                let charge = (value - SOLAR_MIN) as f32 / (RANGE_WIDTH - 1) as f32;
                spark.energy =
                    (spark.energy + 1.0 + charge * tuning.solar_bonus_max).min(ENERGY_CAP);
                self.grid.set_at(idx, VOID_MAX);
            }
            CellKind::Void => spark.energy -= VOID_DISSIPATION,
            CellKind::Wall | CellKind::Data => {}
        }
    }

    /// Reproduction. The child buds perpendicular to the heading (left
    /// first, then right), inherits a mutated deep copy of the genome and
    /// half the parent's remaining energy.
    fn op_split(&mut self, spark: &mut Spark) {
        spark.energy -= COST_SPLIT;

        // A zero motor has no split axis.
        if spark.dx == 0 && spark.dy == 0 {
            spark.energy += COST_SPLIT * SPLIT_REFUND;
            return;
        }

        let primary = (-(spark.dy as i32), spark.dx as i32);
        let fallback = (spark.dy as i32, -(spark.dx as i32));
        let mut site = None;
        for (ox, oy) in [primary, fallback] {
            let (cx, cy) = self.grid.wrap_pos(spark.x as i32 + ox, spark.y as i32 + oy);
            let idx = self.grid.index(cx, cy);
            if !is_wall(self.grid.get_at(idx)) && !self.occupancy.is_claimed(idx) {
                site = Some((cx, cy, ox as i8, oy as i8));
                break;
            }
        }
        let Some((cx, cy, cdx, cdy)) = site else {
            // Both sites blocked: half the split cost comes back.
            spark.energy += COST_SPLIT * SPLIT_REFUND;
            return;
        };

        let half = spark.energy * 0.5;
        spark.energy = half;

        let mut child = *spark;
        child.x = cx;
        child.y = cy;
        child.last_x = cx;
        child.last_y = cy;
        child.dx = cdx;
        child.dy = cdy;
        child.energy = half;
        child.reg_a = 0;
        child.reg_b = 0;
        child.age = 0;
        child.metabolism = METABOLISM_SPAWN;
        child.generation = spark.generation.wrapping_add(1);
        mutate_child(&mut child, &mut self.rng);

        // The site is unclaimed, so this only fails on a full buffer; the
        // committed energy is then lost with the child.
        self.try_seat(child);
    }

    /// Horizontal gene transfer with the first already-seated cardinal
    /// neighbor, scanned in N, S, E, W order.
    fn op_conjugate(&mut self, spark: &mut Spark) {
        let x = spark.x as i32;
        let y = spark.y as i32;
        let neighbors = [(x, y - 1), (x, y + 1), (x + 1, y), (x - 1, y)];
        for (nx, ny) in neighbors {
            let (wx, wy) = self.grid.wrap_pos(nx, ny);
            let idx = self.grid.index(wx, wy);
            let Some(slot) = self.occupancy.claimant(idx) else {
                continue;
            };
            let channel = self.rng.bounded(3) as usize;
            let partner = &mut self.sparks_next[slot];

            // One library slot changes hands in both directions.
            let func = spark.reg_b as usize % MICRO_FUNC_COUNT;
            std::mem::swap(
                &mut spark.genome.library[func],
                &mut partner.genome.library[func],
            );

            // XOR-swap one decision entry.
            let key = spark.reg_a as usize;
            spark.genome.matrix[key] ^= partner.genome.matrix[key];
            partner.genome.matrix[key] ^= spark.genome.matrix[key];
            spark.genome.matrix[key] ^= partner.genome.matrix[key];

            // One color channel converges to the shared average.
            let avg = ((spark.color[channel] as u16 + partner.color[channel] as u16) / 2) as u8;
            spark.color[channel] = avg;
            partner.color[channel] = avg;

            spark.energy -= CONJUGATE_COST;
            return;
        }
    }

    /// Peek at the cell one step along the heading. Bit 7 reports a
    /// mid-tick claim on that cell in the write buffer.
    fn op_sense_ahead(&mut self, spark: &mut Spark) {
        let (tx, ty) = self
            .grid
            .wrap_pos(spark.x as i32 + spark.dx as i32, spark.y as i32 + spark.dy as i32);
        let idx = self.grid.index(tx, ty);
        let mut sensed = self.grid.get_at(idx);
        if self.occupancy.is_claimed(idx) {
            sensed |= 0x80;
        }
        spark.reg_a = sensed;
    }

    /// Bounded single-level inlining: the first `CALL_INLINE_LEN` atoms of
    /// the callee run at half cost, restricted to the safe subset. No call
    /// stack exists, so microcode cannot loop.
    fn op_call_func(&mut self, spark: &mut Spark, tuning: &Tuning) {
        let callee = spark.reg_b as usize % MICRO_FUNC_COUNT;
        let mut inlined = [0u8; CALL_INLINE_LEN];
        inlined.copy_from_slice(&spark.genome.library[callee][..CALL_INLINE_LEN]);
        for atom in inlined {
            if !call_safe(atom) {
                continue;
            }
            spark.energy -= CALL_ATOM_COST;
            if spark.energy <= 0.0 {
                return;
            }
            self.exec_atom(spark, atom, tuning);
            if spark.energy <= 0.0 {
                return;
            }
        }
    }
}
