//! The world: grid, double spark buffers, occupancy arena and the tick loop.
//!
//! One `step` runs a full synchronous tick:
//!
//! 1. every `SHUFFLE_FREQUENCY` ticks, reshuffle the visitation order
//! 2. reset the write buffer (allocation retained)
//! 3. environmental physics (solar regrowth)
//! 4. fresh occupancy generation
//! 5. serial spark visitation: decide, run microcode, age, metabolize, seat
//! 6. extinction safeguard if the write buffer stayed empty
//! 7. swap buffers, bump the tick counter
//!
//! Visitation is strictly serial: spark k observes every grid mutation made
//! by sparks 0..k this tick, and the arbiter resolves contested cells in
//! visitation order. That ordering is part of the contract.

use serde::{Deserialize, Serialize};

use crate::config::{
    AGE_COST_BASE, AGE_COST_SLOPE, COLLISION_COST, ENERGY_CAP, METABOLISM_DECAY, METABOLISM_FLOOR,
    METABOLISM_GAIN, METABOLISM_MAX, METABOLISM_PENALTY, METABOLISM_SPAWN, SHUFFLE_FREQUENCY,
    SOLAR_REGROWTH_CHANCE, SOLAR_REGROWTH_RATE, SPARK_CAP, SPARK_COUNT_MIN, SPAWN_ENERGY_MAX,
    SPAWN_ENERGY_MIN, SPAWN_RETRY_LIMIT, Tuning,
};
use crate::genome::{random_seed_color, Genome};
use crate::grid::{is_solar, is_void, is_wall, Grid, RANGE_WIDTH, SOLAR_MIN};
use crate::occupancy::Occupancy;
use crate::rng::XorShift32;
use crate::spark::Spark;

/// Outcome of asking the arbiter to seat a spark.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeatResult {
    pub seated: bool,
    /// Collision damage charged to both parties, 0 on an uncontested claim.
    pub damage: f32,
}

/// Aggregate snapshot for hosts; computed on demand, never cached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldStats {
    pub tick: u64,
    pub live: u32,
    pub total_energy: f64,
    pub mean_energy: f32,
    pub mean_age: f32,
    pub mean_metabolism: f32,
    pub max_generation: u32,
    pub solar_cells: u32,
    pub wall_cells: u32,
}

pub struct World {
    pub(crate) grid: Grid,
    /// Read buffer for the running tick; the live population between ticks.
    pub(crate) sparks: Vec<Spark>,
    /// Write buffer being seated during a tick.
    pub(crate) sparks_next: Vec<Spark>,
    pub(crate) occupancy: Occupancy,
    pub(crate) rng: XorShift32,
    seed: u32,
    tick: u64,
    shuffle_counter: u32,
}

impl World {
    /// Allocate a world and seed terrain plus the initial population.
    pub fn new(size: usize, seed: u32) -> Self {
        let mut world = Self::new_empty(size, seed);
        let target = SPARK_COUNT_MIN.min(world.spark_capacity());
        world.seed_current_population(target);
        world
    }

    /// Allocate a world with terrain but no population. Hosts that drive
    /// the population entirely through `inject`/`place` start here.
    pub fn new_empty(size: usize, seed: u32) -> Self {
        assert!(
            (3..=u16::MAX as usize).contains(&size),
            "world size {size} out of range"
        );
        let mut rng = XorShift32::new(seed, size);
        let grid = Grid::new(size, &mut rng);
        let capacity = SPARK_CAP.min(grid.len());
        Self {
            occupancy: Occupancy::new(grid.len()),
            sparks: Vec::with_capacity(capacity),
            sparks_next: Vec::with_capacity(capacity),
            grid,
            rng,
            seed,
            tick: 0,
            shuffle_counter: 0,
        }
    }

    /// Rebuild everything from a new seed, reusing every allocation.
    pub fn reseed(&mut self, seed: u32) {
        self.rng = XorShift32::new(seed, self.grid.size());
        self.seed = seed;
        self.grid.regenerate(&mut self.rng);
        self.sparks.clear();
        self.sparks_next.clear();
        self.occupancy.reset();
        self.tick = 0;
        self.shuffle_counter = 0;
        let target = SPARK_COUNT_MIN.min(self.spark_capacity());
        self.seed_current_population(target);
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn size(&self) -> usize {
        self.grid.size()
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable terrain access for hosts that sculpt the environment.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// The live population between ticks (may contain collision corpses
    /// with non-positive energy until the next step discards them).
    pub fn sparks(&self) -> &[Spark] {
        &self.sparks
    }

    pub fn live_count(&self) -> usize {
        self.sparks.iter().filter(|s| s.alive()).count()
    }

    /// Per-buffer spark ceiling: SPARK_CAP, or one per cell on small worlds.
    pub fn spark_capacity(&self) -> usize {
        SPARK_CAP.min(self.grid.len())
    }

    /// Spark seated at (x, y), if any. Valid between ticks; mid-step the
    /// claims describe the buffer under construction.
    pub fn spark_at(&self, x: u16, y: u16) -> Option<&Spark> {
        let idx = self.grid.index(x, y);
        self.occupancy
            .claimant(idx)
            .and_then(|slot| self.sparks.get(slot))
            .filter(|s| s.alive())
    }

    // ========================================================================
    // TICK LOOP
    // ========================================================================

    /// One synchronous world update. Deterministic for fixed state + tuning.
    pub fn step(&mut self, tuning: &Tuning) {
        // 1. Periodic reshuffle of the visitation order.
        self.shuffle_counter += 1;
        if self.shuffle_counter % SHUFFLE_FREQUENCY == 0 {
            self.rng.shuffle(&mut self.sparks);
        }

        // 2. Reset the write buffer.
        self.sparks_next.clear();

        // 3. Environmental physics. Runs against the previous generation's
        //    claims, so regrowth never lands under a seated spark.
        self.solar_regrowth();

        // 4. Fresh claim generation for this tick's seats.
        self.occupancy.begin_tick();

        // 5. Serial visitation.
        for i in 0..self.sparks.len() {
            let mut spark = self.sparks[i];
            self.update_spark(&mut spark, tuning);
        }

        // 6. Total extinction: reseed the population rather than go dark.
        if self.sparks_next.is_empty() {
            self.reseed_population();
        }

        // 7. Flip buffers.
        std::mem::swap(&mut self.sparks, &mut self.sparks_next);
        self.tick += 1;
    }

    /// Attempt `SOLAR_REGROWTH_RATE` random cells; an unoccupied void cell
    /// regrows into a random solar tile with probability 1 in
    /// `SOLAR_REGROWTH_CHANCE`.
    fn solar_regrowth(&mut self) {
        let cells = self.grid.len() as u32;
        for _ in 0..SOLAR_REGROWTH_RATE {
            let idx = self.rng.bounded(cells) as usize;
            if !is_void(self.grid.get_at(idx)) || self.occupancy.is_claimed(idx) {
                continue;
            }
            if self.rng.bounded(SOLAR_REGROWTH_CHANCE) == 0 {
                let value = SOLAR_MIN + self.rng.bounded(RANGE_WIDTH) as u8;
                self.grid.set_at(idx, value);
            }
        }
    }

    /// Run one spark's tick: decision matrix, microcode, state feedback,
    /// aging, metabolism, then seating.
    fn update_spark(&mut self, spark: &mut Spark, tuning: &Tuning) {
        let grid_value = self.grid.get(spark.x, spark.y);
        let func = spark.genome.decide(spark.decision_key(grid_value));
        self.run_function(spark, func, tuning);

        // Register feedback keeps the decision key moving.
        spark.internal_state ^= spark.reg_a;

        // Aging grows more expensive every tick, forcing turnover.
        spark.age += 1;
        spark.energy -= AGE_COST_BASE + AGE_COST_SLOPE * spark.age as f32;

        // Metabolism charges on movement and starves the stationary.
        let moved = self
            .grid
            .toroidal_displacement(spark.last_x, spark.last_y, spark.x, spark.y);
        if moved > 0.5 {
            spark.metabolism = (spark.metabolism + METABOLISM_GAIN * moved).min(METABOLISM_MAX);
        } else {
            spark.metabolism = (spark.metabolism - METABOLISM_DECAY).max(0.0);
        }
        if spark.metabolism < METABOLISM_FLOOR {
            spark.energy -= METABOLISM_PENALTY * (METABOLISM_FLOOR - spark.metabolism);
        }
        spark.last_x = spark.x;
        spark.last_y = spark.y;

        if spark.energy > 0.0 && spark.energy < ENERGY_CAP {
            self.try_seat(*spark);
        }
    }

    // ========================================================================
    // OCCUPANCY ARBITRATION
    // ========================================================================

    /// Seat a spark at its own cell in the write buffer. A contested cell
    /// costs both parties `COLLISION_COST`; the attacker takes the seat only
    /// if it survives with strictly more energy than the damaged occupant.
    /// Takeover overwrites the occupant's slot in place.
    pub(crate) fn try_seat(&mut self, mut spark: Spark) -> SeatResult {
        let idx = self.grid.index(spark.x, spark.y);
        match self.occupancy.claimant(idx) {
            None => {
                if self.sparks_next.len() >= self.spark_capacity() {
                    // Write buffer full; the spark is not seated this tick.
                    return SeatResult {
                        seated: false,
                        damage: 0.0,
                    };
                }
                self.occupancy.claim(idx, self.sparks_next.len());
                self.sparks_next.push(spark);
                SeatResult {
                    seated: true,
                    damage: 0.0,
                }
            }
            Some(slot) => {
                spark.energy -= COLLISION_COST;
                let occupant = &mut self.sparks_next[slot];
                occupant.energy -= COLLISION_COST;
                if spark.energy > 0.0 && spark.energy > occupant.energy {
                    *occupant = spark;
                    SeatResult {
                        seated: true,
                        damage: COLLISION_COST,
                    }
                } else {
                    SeatResult {
                        seated: false,
                        damage: COLLISION_COST,
                    }
                }
            }
        }
    }

    // ========================================================================
    // SPAWNING & SAFEGUARD
    // ========================================================================

    /// Add up to `count` randomly placed fresh sparks to the current buffer.
    /// Returns how many were actually placed.
    pub fn inject(&mut self, count: usize) -> usize {
        let mut placed = 0;
        for _ in 0..count {
            if self.sparks.len() >= self.spark_capacity() {
                break;
            }
            let idx = self.random_spawn_site();
            let (x, y) = self.grid.coords(idx);
            let spark = self.fresh_spark(x, y);
            if self.place(spark) {
                placed += 1;
            }
        }
        placed
    }

    /// Seat a specific spark in the current buffer, claiming its cell.
    /// Refused when the cell is taken or the buffer is full.
    pub fn place(&mut self, spark: Spark) -> bool {
        let idx = self.grid.index(spark.x, spark.y);
        if self.occupancy.is_claimed(idx) || self.sparks.len() >= self.spark_capacity() {
            return false;
        }
        self.occupancy.claim(idx, self.sparks.len());
        self.sparks.push(spark);
        true
    }

    /// Post-extinction reseed into the write buffer, before the swap.
    fn reseed_population(&mut self) {
        let target = SPARK_COUNT_MIN.min(self.spark_capacity());
        for _ in 0..target {
            if self.sparks_next.len() >= self.spark_capacity() {
                break;
            }
            let idx = self.random_spawn_site();
            let (x, y) = self.grid.coords(idx);
            let spark = self.fresh_spark(x, y);
            self.try_seat(spark);
        }
    }

    /// Initial population for `new`/`reseed`, claimed in the current buffer.
    fn seed_current_population(&mut self, count: usize) {
        for _ in 0..count {
            if self.sparks.len() >= self.spark_capacity() {
                break;
            }
            let idx = self.random_spawn_site();
            let (x, y) = self.grid.coords(idx);
            let spark = self.fresh_spark(x, y);
            self.place(spark);
        }
    }

    /// Draw a random cell, preferring an unclaimed one for up to
    /// `SPAWN_RETRY_LIMIT` draws. The last draw stands either way; the
    /// caller's seating path resolves any residual overlap.
    fn random_spawn_site(&mut self) -> usize {
        let cells = self.grid.len() as u32;
        let mut idx = self.rng.bounded(cells) as usize;
        for _ in 1..SPAWN_RETRY_LIMIT {
            if !self.occupancy.is_claimed(idx) {
                break;
            }
            idx = self.rng.bounded(cells) as usize;
        }
        idx
    }

    /// Fully random newcomer: uniform genome, hue-spread color, nonzero
    /// motor, spawn-band energy.
    fn fresh_spark(&mut self, x: u16, y: u16) -> Spark {
        let genome = Genome::random(&mut self.rng);
        let color = random_seed_color(&mut self.rng);
        let mut dx = self.rng.choice_dir3();
        let mut dy = self.rng.choice_dir3();
        while dx == 0 && dy == 0 {
            dx = self.rng.choice_dir3();
            dy = self.rng.choice_dir3();
        }
        let energy = self.rng.int_inclusive(SPAWN_ENERGY_MIN, SPAWN_ENERGY_MAX) as f32;
        Spark {
            x,
            y,
            dx,
            dy,
            energy,
            reg_a: 0,
            reg_b: 0,
            internal_state: self.rng.byte(),
            color,
            generation: 0,
            metabolism: METABOLISM_SPAWN,
            last_x: x,
            last_y: y,
            age: 0,
            genome,
        }
    }

    // ========================================================================
    // RENDERING
    // ========================================================================

    /// Pure mapping from the live population to packed 0x00RRGGBB pixels on
    /// a black background. No simulation state is touched.
    pub fn render(&self, pixels: &mut Vec<u32>) {
        pixels.clear();
        pixels.resize(self.grid.len(), 0);
        for spark in &self.sparks {
            if spark.alive() {
                pixels[self.grid.index(spark.x, spark.y)] = pack_rgb(spark.color);
            }
        }
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn stats(&self) -> WorldStats {
        let mut stats = WorldStats {
            tick: self.tick,
            ..WorldStats::default()
        };
        let mut age_sum = 0u64;
        let mut metabolism_sum = 0f64;
        for spark in self.sparks.iter().filter(|s| s.alive()) {
            stats.live += 1;
            stats.total_energy += spark.energy as f64;
            age_sum += spark.age as u64;
            metabolism_sum += spark.metabolism as f64;
            stats.max_generation = stats.max_generation.max(spark.generation);
        }
        if stats.live > 0 {
            stats.mean_energy = (stats.total_energy / stats.live as f64) as f32;
            stats.mean_age = (age_sum as f64 / stats.live as f64) as f32;
            stats.mean_metabolism = (metabolism_sum / stats.live as f64) as f32;
        }
        for &value in self.grid.cells() {
            if is_solar(value) {
                stats.solar_cells += 1;
            } else if is_wall(value) {
                stats.wall_cells += 1;
            }
        }
        stats
    }
}

#[inline(always)]
pub fn pack_rgb(color: [u8; 3]) -> u32 {
    (color[0] as u32) << 16 | (color[1] as u32) << 8 | color[2] as u32
}
