//! Sparks backend: the autonomous world canister.
//!
//! Owns one [`spark_core::World`], advances it on a timer, and resolves the
//! outer-loop inputs the core consumes as plain numbers each step: the solar
//! bonus under population pressure and automatic injection after a collapse.
//! Everything observable goes through candid queries; the simulation itself
//! stays inside `spark_core`.

mod benchmarks;

pub use benchmarks::{BenchmarkData, BenchmarkReport, OperationStats};

use arrayvec::ArrayVec;
use candid::{CandidType, Deserialize};
use ic_cdk::{init, post_upgrade, pre_upgrade, query, update};
use ic_cdk_timers::TimerId;
use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::{DefaultMemoryImpl, StableCell, Storable};
use serde::Serialize;
use spark_core::config::{GRID_SIZE, SOLAR_BONUS_DEFAULT, SPARK_CAP};
use spark_core::{Spark, Tuning, World, WorldStats};
use std::borrow::Cow;
use std::cell::RefCell;
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

const WORLD_SIZE: usize = GRID_SIZE;

/// Simulation timing: one core step per timer tick.
const TICK_INTERVAL_MS: u64 = 1000;
const STEPS_PER_TICK: u32 = 1;

/// Bounds on the manual endpoints.
const MAX_MANUAL_STEPS: u32 = 32;
const MAX_INJECT: u32 = 10_000;

/// Largest render/terrain region served per query (256 x 256).
const MAX_REGION_CELLS: u64 = 65_536;

/// Largest terrain paint batch per call.
const MAX_PAINT_CELLS: usize = 1000;

/// Auto-solar floor; the bonus fades from SOLAR_BONUS_DEFAULT toward this
/// as the smoothed population approaches SPARK_CAP.
const SOLAR_BONUS_MIN: f32 = 2.0;

/// Auto-inject: burst size and trigger, gated by a cooldown.
const AUTO_INJECT_FLOOR: u32 = 5_000;
const AUTO_INJECT_BURST: u32 = 2_000;
const AUTO_INJECT_COOLDOWN_TICKS: u64 = 50;

/// Population samples kept for pressure smoothing.
const POP_WINDOW: usize = 8;

const MEMORY_ID_META: MemoryId = MemoryId::new(0);

type Memory = VirtualMemory<DefaultMemoryImpl>;

// ============================================================================
// PERSISTED METADATA
// ============================================================================

/// Everything that survives an upgrade. The world itself is rebuilt from
/// the seed; simulation state is ephemeral by contract.
#[derive(CandidType, Deserialize, Serialize, Clone)]
struct WorldMeta {
    seed: u32,
    tick: u64,
    solar_bonus_max: f32,
    auto_solar: bool,
    auto_inject: bool,
    is_running: bool,
}

impl Default for WorldMeta {
    fn default() -> Self {
        Self {
            seed: 0,
            tick: 0,
            solar_bonus_max: SOLAR_BONUS_DEFAULT,
            auto_solar: true,
            auto_inject: true,
            is_running: true,
        }
    }
}

impl Storable for WorldMeta {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(candid::encode_one(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).unwrap_or_default()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Unbounded;
}

// ============================================================================
// AUTOPILOT
// ============================================================================

/// Resolves the outer-loop inputs: solar yield under population pressure
/// and injection bursts after a collapse. Pressure is smoothed over a
/// bounded sample window so a single bad tick does not whipsaw the bonus.
struct AutoPilot {
    samples: ArrayVec<u32, POP_WINDOW>,
    cursor: usize,
    last_injection_tick: Option<u64>,
}

impl AutoPilot {
    const fn new() -> Self {
        Self {
            samples: ArrayVec::new_const(),
            cursor: 0,
            last_injection_tick: None,
        }
    }

    fn observe(&mut self, live: u32) {
        if self.samples.is_full() {
            self.samples[self.cursor] = live;
            self.cursor = (self.cursor + 1) % POP_WINDOW;
        } else {
            self.samples.push(live);
        }
    }

    fn smoothed_population(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        (self.samples.iter().map(|&s| s as u64).sum::<u64>() / self.samples.len() as u64) as u32
    }

    /// Linear fade from the default bonus as the population approaches the
    /// spark cap, clamped at the floor.
    fn solar_bonus(&self) -> f32 {
        let pressure = (self.smoothed_population() as f32 / SPARK_CAP as f32).min(1.0);
        (SOLAR_BONUS_DEFAULT * (1.0 - pressure)).max(SOLAR_BONUS_MIN)
    }

    fn injection_due(&self, world_tick: u64) -> bool {
        if self.samples.is_empty() || self.smoothed_population() >= AUTO_INJECT_FLOOR {
            return false;
        }
        match self.last_injection_tick {
            Some(last) => world_tick.saturating_sub(last) >= AUTO_INJECT_COOLDOWN_TICKS,
            None => true,
        }
    }

    fn note_injection(&mut self, world_tick: u64) {
        self.last_injection_tick = Some(world_tick);
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.cursor = 0;
        self.last_injection_tick = None;
    }
}

// ============================================================================
// STATE
// ============================================================================

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));

    // The world lives on the heap; only WorldMeta crosses upgrades.
    static WORLD: RefCell<World> = RefCell::new(World::new_empty(WORLD_SIZE, 0));

    static META_CELL: RefCell<StableCell<WorldMeta, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MEMORY_ID_META)),
            WorldMeta::default(),
        )
        .expect("failed to initialize world metadata cell")
    );

    static TUNING: RefCell<Tuning> = const { RefCell::new(Tuning { solar_bonus_max: SOLAR_BONUS_DEFAULT }) };
    static RUNNING: RefCell<bool> = const { RefCell::new(true) };
    static AUTO_SOLAR: RefCell<bool> = const { RefCell::new(true) };
    static AUTO_INJECT: RefCell<bool> = const { RefCell::new(true) };
    static AUTOPILOT: RefCell<AutoPilot> = const { RefCell::new(AutoPilot::new()) };

    static TIMER_ID: RefCell<Option<TimerId>> = const { RefCell::new(None) };
}

/// Live population and tick, for the benchmark report.
pub(crate) fn population_snapshot() -> (u32, u64) {
    WORLD.with(|w| {
        let world = w.borrow();
        (world.live_count() as u32, world.tick())
    })
}

// ============================================================================
// API RESPONSE TYPES
// ============================================================================

#[derive(CandidType, Deserialize, Clone)]
pub struct WorldInfo {
    pub size: u32,
    pub tick: u64,
    pub seed: u32,
    pub live_sparks: u32,
    pub is_running: bool,
    pub solar_bonus_max: f32,
    pub auto_solar: bool,
    pub auto_inject: bool,
}

#[derive(CandidType, Deserialize, Clone)]
pub struct StatsView {
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

impl From<WorldStats> for StatsView {
    fn from(s: WorldStats) -> Self {
        Self {
            tick: s.tick,
            live: s.live,
            total_energy: s.total_energy,
            mean_energy: s.mean_energy,
            mean_age: s.mean_age,
            mean_metabolism: s.mean_metabolism,
            max_generation: s.max_generation,
            solar_cells: s.solar_cells,
            wall_cells: s.wall_cells,
        }
    }
}

#[derive(CandidType, Deserialize, Clone)]
pub struct SparkView {
    pub x: u16,
    pub y: u16,
    pub dx: i8,
    pub dy: i8,
    pub energy: f32,
    pub age: u32,
    pub generation: u32,
    pub metabolism: f32,
    pub internal_state: u8,
    pub color: (u8, u8, u8),
}

impl From<&Spark> for SparkView {
    fn from(s: &Spark) -> Self {
        Self {
            x: s.x,
            y: s.y,
            dx: s.dx,
            dy: s.dy,
            energy: s.energy,
            age: s.age,
            generation: s.generation,
            metabolism: s.metabolism,
            internal_state: s.internal_state,
            color: (s.color[0], s.color[1], s.color[2]),
        }
    }
}

/// A rectangle of packed RGB bytes, row-major, 3 bytes per cell.
#[derive(CandidType, Deserialize, Clone)]
pub struct RegionFrame {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

// ============================================================================
// HELPERS
// ============================================================================

fn boot_seed() -> u32 {
    let t = ic_cdk::api::time();
    (t ^ (t >> 32)) as u32
}

fn build_info() -> WorldInfo {
    WORLD.with(|w| {
        let world = w.borrow();
        WorldInfo {
            size: world.size() as u32,
            tick: world.tick(),
            seed: world.seed(),
            live_sparks: world.live_count() as u32,
            is_running: RUNNING.with(|r| *r.borrow()),
            solar_bonus_max: TUNING.with(|t| t.borrow().solar_bonus_max),
            auto_solar: AUTO_SOLAR.with(|f| *f.borrow()),
            auto_inject: AUTO_INJECT.with(|f| *f.borrow()),
        }
    })
}

fn validate_region(x: u32, y: u32, width: u32, height: u32) -> Result<(), String> {
    let size = WORLD_SIZE as u32;
    if width == 0 || height == 0 {
        return Err("region must not be empty".to_string());
    }
    if width as u64 * height as u64 > MAX_REGION_CELLS {
        return Err(format!("region exceeds {MAX_REGION_CELLS} cells"));
    }
    let x_end = x.checked_add(width);
    let y_end = y.checked_add(height);
    if x_end.map_or(true, |xe| xe > size) || y_end.map_or(true, |ye| ye > size) {
        return Err(format!("region out of the {size}x{size} grid"));
    }
    Ok(())
}

fn save_meta() {
    let meta = WORLD.with(|w| {
        let world = w.borrow();
        WorldMeta {
            seed: world.seed(),
            tick: world.tick(),
            solar_bonus_max: TUNING.with(|t| t.borrow().solar_bonus_max),
            auto_solar: AUTO_SOLAR.with(|f| *f.borrow()),
            auto_inject: AUTO_INJECT.with(|f| *f.borrow()),
            is_running: RUNNING.with(|r| *r.borrow()),
        }
    });
    META_CELL.with(|cell| {
        let _ = cell.borrow_mut().set(meta);
    });
}

// ============================================================================
// TICK ORCHESTRATION
// ============================================================================

fn tick() {
    benchmark!(Tick);

    if !RUNNING.with(|r| *r.borrow()) {
        return;
    }

    let (live, world_tick) = population_snapshot();
    AUTOPILOT.with(|a| a.borrow_mut().observe(live));

    if AUTO_SOLAR.with(|f| *f.borrow()) {
        let bonus = AUTOPILOT.with(|a| a.borrow().solar_bonus());
        TUNING.with(|t| t.borrow_mut().solar_bonus_max = bonus);
    }

    if AUTO_INJECT.with(|f| *f.borrow()) && AUTOPILOT.with(|a| a.borrow().injection_due(world_tick))
    {
        let added = WORLD.with(|w| {
            benchmark!(InjectSparks);
            w.borrow_mut().inject(AUTO_INJECT_BURST as usize)
        });
        AUTOPILOT.with(|a| a.borrow_mut().note_injection(world_tick));
        ic_cdk::println!("auto-inject: {added} sparks at tick {world_tick} (live was {live})");
    }

    let tuning = TUNING.with(|t| *t.borrow());
    WORLD.with(|w| {
        let mut world = w.borrow_mut();
        for _ in 0..STEPS_PER_TICK {
            benchmark!(WorldStep);
            world.step(&tuning);
        }
    });
}

fn start_timer() {
    let timer_id = ic_cdk_timers::set_timer_interval(
        Duration::from_millis(TICK_INTERVAL_MS),
        || async { tick() },
    );
    TIMER_ID.with(|t| {
        *t.borrow_mut() = Some(timer_id);
    });
}

// ============================================================================
// CANISTER LIFECYCLE
// ============================================================================

#[init]
fn init() {
    let seed = boot_seed();
    WORLD.with(|w| w.borrow_mut().reseed(seed));
    save_meta();
    start_timer();
    ic_cdk::println!(
        "Sparks world initialized: {}x{} grid, seed {}, {} live sparks",
        WORLD_SIZE,
        WORLD_SIZE,
        seed,
        population_snapshot().0
    );
}

#[pre_upgrade]
fn pre_upgrade() {
    save_meta();
    ic_cdk::println!("Sparks pre_upgrade: metadata saved");
}

#[post_upgrade]
fn post_upgrade() {
    let meta = META_CELL.with(|cell| cell.borrow().get().clone());

    TUNING.with(|t| t.borrow_mut().solar_bonus_max = meta.solar_bonus_max);
    AUTO_SOLAR.with(|f| *f.borrow_mut() = meta.auto_solar);
    AUTO_INJECT.with(|f| *f.borrow_mut() = meta.auto_inject);
    RUNNING.with(|r| *r.borrow_mut() = meta.is_running);

    // The world rebuilds from the saved seed; the previous run's tick
    // counter is informational only.
    WORLD.with(|w| w.borrow_mut().reseed(meta.seed));
    start_timer();
    ic_cdk::println!(
        "Sparks post_upgrade: world rebuilt from seed {} (previous run reached tick {})",
        meta.seed,
        meta.tick
    );
}

// ============================================================================
// UPDATE METHODS
// ============================================================================

/// Rebuild the whole world from a seed, preserving allocations.
#[update]
fn reseed(seed: u32) -> WorldInfo {
    benchmark!(Reseed);
    WORLD.with(|w| w.borrow_mut().reseed(seed));
    AUTOPILOT.with(|a| a.borrow_mut().reset());
    ic_cdk::println!("world reseeded: {seed}");
    build_info()
}

/// Pause or resume the timer-driven simulation.
#[update]
fn set_running(running: bool) -> bool {
    RUNNING.with(|r| *r.borrow_mut() = running);
    running
}

/// Advance one tick by hand (works while paused).
#[update]
fn step_once() -> u64 {
    let tuning = TUNING.with(|t| *t.borrow());
    WORLD.with(|w| {
        let mut world = w.borrow_mut();
        benchmark!(WorldStep);
        world.step(&tuning);
        world.tick()
    })
}

/// Advance a bounded number of ticks by hand.
#[update]
fn step_many(count: u32) -> Result<u64, String> {
    if count == 0 || count > MAX_MANUAL_STEPS {
        return Err(format!("step count must be in 1..={MAX_MANUAL_STEPS}"));
    }
    let tuning = TUNING.with(|t| *t.borrow());
    WORLD.with(|w| {
        let mut world = w.borrow_mut();
        for _ in 0..count {
            benchmark!(WorldStep);
            world.step(&tuning);
        }
        Ok(world.tick())
    })
}

/// Drop up to `count` fresh random sparks into the world.
#[update]
fn inject_sparks(count: u32) -> Result<u32, String> {
    if count == 0 || count > MAX_INJECT {
        return Err(format!("inject count must be in 1..={MAX_INJECT}"));
    }
    let added = WORLD.with(|w| {
        benchmark!(InjectSparks);
        w.borrow_mut().inject(count as usize)
    });
    Ok(added as u32)
}

/// Manual solar bonus override; disables auto-solar until re-enabled.
#[update]
fn set_solar_bonus(bonus: f32) -> Result<f32, String> {
    if !bonus.is_finite() || !(0.0..=100.0).contains(&bonus) {
        return Err("solar bonus must be finite and in [0, 100]".to_string());
    }
    AUTO_SOLAR.with(|f| *f.borrow_mut() = false);
    TUNING.with(|t| t.borrow_mut().solar_bonus_max = bonus);
    Ok(bonus)
}

/// Overwrite terrain bytes in a bounded batch. Cells holding a seated
/// spark are painted too; the spark simply stands on the new value.
#[update]
fn paint_terrain(cells: Vec<(u32, u32, u8)>) -> Result<u32, String> {
    if cells.len() > MAX_PAINT_CELLS {
        return Err(format!("max {MAX_PAINT_CELLS} cells per call"));
    }
    let size = WORLD_SIZE as u32;
    for &(x, y, _) in &cells {
        if x >= size || y >= size {
            return Err(format!("cell ({x}, {y}) out of the {size}x{size} grid"));
        }
    }
    WORLD.with(|w| {
        let mut world = w.borrow_mut();
        let grid = world.grid_mut();
        for (x, y, value) in &cells {
            let idx = grid.index(*x as u16, *y as u16);
            grid.set_at(idx, *value);
        }
    });
    Ok(cells.len() as u32)
}

#[update]
fn set_auto_solar(enabled: bool) -> bool {
    AUTO_SOLAR.with(|f| *f.borrow_mut() = enabled);
    enabled
}

#[update]
fn set_auto_inject(enabled: bool) -> bool {
    AUTO_INJECT.with(|f| *f.borrow_mut() = enabled);
    enabled
}

// ============================================================================
// QUERY METHODS
// ============================================================================

#[query]
fn get_info() -> WorldInfo {
    build_info()
}

#[query]
fn get_stats() -> StatsView {
    benchmark!(GetStats);
    WORLD.with(|w| w.borrow().stats().into())
}

/// The spark seated at (x, y), if any.
#[query]
fn get_spark_at(x: u32, y: u32) -> Result<Option<SparkView>, String> {
    let size = WORLD_SIZE as u32;
    if x >= size || y >= size {
        return Err(format!("coordinates out of the {size}x{size} grid"));
    }
    Ok(WORLD.with(|w| w.borrow().spark_at(x as u16, y as u16).map(SparkView::from)))
}

/// Spark colors over a black background for a bounded region.
#[query]
fn render_region(x: u32, y: u32, width: u32, height: u32) -> Result<RegionFrame, String> {
    benchmark!(RenderRegion);
    validate_region(x, y, width, height)?;
    WORLD.with(|w| {
        let world = w.borrow();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for row in y..y + height {
            for col in x..x + width {
                match world.spark_at(col as u16, row as u16) {
                    Some(spark) => rgb.extend_from_slice(&spark.color),
                    None => rgb.extend_from_slice(&[0, 0, 0]),
                }
            }
        }
        Ok(RegionFrame {
            x,
            y,
            width,
            height,
            rgb,
        })
    })
}

/// Raw terrain bytes for a bounded region, row-major.
#[query]
fn get_terrain_region(x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>, String> {
    validate_region(x, y, width, height)?;
    WORLD.with(|w| {
        let world = w.borrow();
        let grid = world.grid();
        let mut bytes = Vec::with_capacity((width * height) as usize);
        for row in y..y + height {
            let start = grid.index(x as u16, row as u16);
            bytes.extend_from_slice(&grid.cells()[start..start + width as usize]);
        }
        Ok(bytes)
    })
}

ic_cdk::export_candid!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autopilot_bonus_fades_with_pressure_and_clamps() {
        let mut pilot = AutoPilot::new();
        pilot.observe(0);
        assert_eq!(pilot.solar_bonus(), SOLAR_BONUS_DEFAULT);

        let mut crowded = AutoPilot::new();
        crowded.observe(SPARK_CAP as u32);
        assert_eq!(crowded.solar_bonus(), SOLAR_BONUS_MIN);

        let mut half = AutoPilot::new();
        half.observe(SPARK_CAP as u32 / 2);
        let bonus = half.solar_bonus();
        assert!(bonus < SOLAR_BONUS_DEFAULT && bonus > SOLAR_BONUS_MIN);
    }

    #[test]
    fn autopilot_bonus_is_monotone_in_population() {
        let mut previous = f32::MAX;
        for live in (0..=SPARK_CAP as u32).step_by(SPARK_CAP / 10) {
            let mut pilot = AutoPilot::new();
            pilot.observe(live);
            let bonus = pilot.solar_bonus();
            assert!(bonus <= previous, "bonus rose with population");
            previous = bonus;
        }
    }

    #[test]
    fn autopilot_smoothing_window_wraps() {
        let mut pilot = AutoPilot::new();
        for _ in 0..POP_WINDOW {
            pilot.observe(1000);
        }
        assert_eq!(pilot.smoothed_population(), 1000);
        // New samples overwrite the oldest slots in place.
        for _ in 0..POP_WINDOW {
            pilot.observe(3000);
        }
        assert_eq!(pilot.smoothed_population(), 3000);
    }

    #[test]
    fn autopilot_injection_respects_floor_and_cooldown() {
        let mut pilot = AutoPilot::new();
        assert!(!pilot.injection_due(10), "no samples, no injection");

        pilot.observe(AUTO_INJECT_FLOOR);
        assert!(!pilot.injection_due(10), "at the floor is healthy");

        let mut starving = AutoPilot::new();
        starving.observe(100);
        assert!(starving.injection_due(10));
        starving.note_injection(10);
        assert!(!starving.injection_due(10 + AUTO_INJECT_COOLDOWN_TICKS - 1));
        assert!(starving.injection_due(10 + AUTO_INJECT_COOLDOWN_TICKS));
    }

    #[test]
    fn world_meta_roundtrips_through_storable() {
        let meta = WorldMeta {
            seed: 7,
            tick: 42,
            solar_bonus_max: 9.5,
            auto_solar: false,
            auto_inject: true,
            is_running: false,
        };
        let back = WorldMeta::from_bytes(meta.to_bytes());
        assert_eq!(back.seed, 7);
        assert_eq!(back.tick, 42);
        assert_eq!(back.solar_bonus_max, 9.5);
        assert!(!back.auto_solar);
        assert!(back.auto_inject);
        assert!(!back.is_running);
    }

    #[test]
    fn corrupt_meta_bytes_fall_back_to_defaults() {
        let back = WorldMeta::from_bytes(Cow::Borrowed(&[0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(back.seed, 0);
        assert!(back.is_running);
    }

    #[test]
    fn region_validation_bounds() {
        assert!(validate_region(0, 0, 1, 1).is_ok());
        assert!(validate_region(0, 0, 256, 256).is_ok());
        assert!(validate_region(0, 0, 0, 10).is_err(), "empty");
        assert!(validate_region(0, 0, 257, 256).is_err(), "too many cells");
        assert!(validate_region(790, 0, 16, 1).is_err(), "x overflow");
        assert!(validate_region(0, 799, 1, 2).is_err(), "y overflow");
        assert!(validate_region(u32::MAX, 0, 1, 1).is_err(), "wrapping x");
    }
}
