//! Instruction-count instrumentation for the world canister.
//!
//! Wraps the hot operations in RAII guards reading the IC performance
//! counter, and exposes the collected numbers plus a projected daily burn
//! through candid queries.

use candid::CandidType;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Samples kept per operation (circular buffer).
const MAX_SAMPLES: usize = 100;

/// Counters for a single operation type.
#[derive(Clone, Default, CandidType, Deserialize, Serialize)]
pub struct OperationStats {
    pub call_count: u64,
    pub total_instructions: u64,
    pub min_instructions: u64,
    pub max_instructions: u64,
    /// Most recent samples, oldest overwritten first.
    pub recent_samples: Vec<u64>,
    sample_index: usize,
}

impl OperationStats {
    pub fn new() -> Self {
        Self {
            call_count: 0,
            total_instructions: 0,
            min_instructions: u64::MAX,
            max_instructions: 0,
            recent_samples: Vec::with_capacity(MAX_SAMPLES),
            sample_index: 0,
        }
    }

    pub fn record(&mut self, instructions: u64) {
        self.call_count += 1;
        self.total_instructions += instructions;
        self.min_instructions = self.min_instructions.min(instructions);
        self.max_instructions = self.max_instructions.max(instructions);

        if self.recent_samples.len() < MAX_SAMPLES {
            self.recent_samples.push(instructions);
        } else {
            self.recent_samples[self.sample_index] = instructions;
            self.sample_index = (self.sample_index + 1) % MAX_SAMPLES;
        }
    }

    pub fn average(&self) -> u64 {
        if self.call_count == 0 {
            0
        } else {
            self.total_instructions / self.call_count
        }
    }
}

/// All tracked operations.
#[derive(Clone, Default, CandidType, Deserialize, Serialize)]
pub struct BenchmarkData {
    /// Full timer tick (autopilot + steps).
    pub tick: OperationStats,
    /// One core world step.
    pub world_step: OperationStats,
    /// Spark injection (manual or autopilot).
    pub inject_sparks: OperationStats,
    /// Full world rebuild.
    pub reseed: OperationStats,
    /// Region render query.
    pub render_region: OperationStats,
    /// Stats aggregation query.
    pub get_stats: OperationStats,
    /// Timestamp of the last reset (ns).
    pub last_reset_ns: u64,
}

impl BenchmarkData {
    pub fn new() -> Self {
        Self {
            tick: OperationStats::new(),
            world_step: OperationStats::new(),
            inject_sparks: OperationStats::new(),
            reseed: OperationStats::new(),
            render_region: OperationStats::new(),
            get_stats: OperationStats::new(),
            last_reset_ns: 0,
        }
    }

    pub fn reset(&mut self, now_ns: u64) {
        *self = Self::new();
        self.last_reset_ns = now_ns;
    }
}

/// Projection over a day of ticking, per operation.
#[derive(Clone, CandidType, Deserialize, Serialize)]
pub struct DailyBreakdown {
    pub ticks: u64,
    pub world_steps: u64,
    pub injections: u64,
    pub renders: u64,
}

#[derive(Clone, CandidType, Deserialize, Serialize)]
pub struct BenchmarkReport {
    pub tracking_hours: f64,
    pub total_ticks: u64,
    pub total_steps: u64,
    pub instructions_per_tick_avg: u64,
    pub instructions_per_step_avg: u64,
    pub projected_daily_instructions: u64,
    pub daily_breakdown: DailyBreakdown,
    /// Live population when the report was built; an idle (extinct) world
    /// still burns the tick overhead.
    pub live_sparks: u32,
    pub world_tick: u64,
}

thread_local! {
    static BENCHMARKS: RefCell<BenchmarkData> = RefCell::new(BenchmarkData::new());
}

/// Current instruction count; zero off-chain so tests stay runnable.
#[inline]
pub fn instruction_counter() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        unsafe { ic0::performance_counter(0) }
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        0
    }
}

#[derive(Clone, Copy)]
pub enum BenchmarkOperation {
    Tick,
    WorldStep,
    InjectSparks,
    Reseed,
    RenderRegion,
    GetStats,
}

/// RAII guard recording the instructions spent in its scope.
pub struct BenchmarkGuard {
    start: u64,
    operation: BenchmarkOperation,
}

impl BenchmarkGuard {
    pub fn new(operation: BenchmarkOperation) -> Self {
        Self {
            start: instruction_counter(),
            operation,
        }
    }
}

impl Drop for BenchmarkGuard {
    fn drop(&mut self) {
        let elapsed = instruction_counter().saturating_sub(self.start);
        BENCHMARKS.with(|b| {
            let mut b = b.borrow_mut();
            match self.operation {
                BenchmarkOperation::Tick => b.tick.record(elapsed),
                BenchmarkOperation::WorldStep => b.world_step.record(elapsed),
                BenchmarkOperation::InjectSparks => b.inject_sparks.record(elapsed),
                BenchmarkOperation::Reseed => b.reseed.record(elapsed),
                BenchmarkOperation::RenderRegion => b.render_region.record(elapsed),
                BenchmarkOperation::GetStats => b.get_stats.record(elapsed),
            }
        });
    }
}

#[macro_export]
macro_rules! benchmark {
    ($op:ident) => {
        let _guard =
            $crate::benchmarks::BenchmarkGuard::new($crate::benchmarks::BenchmarkOperation::$op);
    };
}

// ============================================================================
// Candid-exposed query/update functions
// ============================================================================

#[ic_cdk::query]
pub fn get_benchmarks() -> BenchmarkData {
    BENCHMARKS.with(|b| b.borrow().clone())
}

#[ic_cdk::query]
pub fn get_benchmark_report() -> BenchmarkReport {
    let (live_sparks, world_tick) = crate::population_snapshot();

    BENCHMARKS.with(|b| {
        let b = b.borrow();
        let now = ic_cdk::api::time();
        let duration_ns = now.saturating_sub(b.last_reset_ns);
        let tracking_hours = duration_ns as f64 / 3_600_000_000_000.0;

        const TICKS_PER_DAY: u64 = 86_400;
        // Amortize each operation over the observed ticks, then scale to a
        // day of ticking.
        let per_tick_share = |op: &OperationStats| {
            if b.tick.call_count == 0 {
                0
            } else {
                op.total_instructions / b.tick.call_count
            }
        };

        let breakdown = DailyBreakdown {
            ticks: b.tick.average() * TICKS_PER_DAY,
            world_steps: per_tick_share(&b.world_step) * TICKS_PER_DAY,
            injections: per_tick_share(&b.inject_sparks) * TICKS_PER_DAY,
            renders: per_tick_share(&b.render_region) * TICKS_PER_DAY,
        };

        BenchmarkReport {
            tracking_hours,
            total_ticks: b.tick.call_count,
            total_steps: b.world_step.call_count,
            instructions_per_tick_avg: b.tick.average(),
            instructions_per_step_avg: b.world_step.average(),
            projected_daily_instructions: breakdown.ticks,
            daily_breakdown: breakdown,
            live_sparks,
            world_tick,
        }
    })
}

#[ic_cdk::update]
pub fn reset_benchmarks() {
    BENCHMARKS.with(|b| {
        b.borrow_mut().reset(ic_cdk::api::time());
    });
}

// External IC API for wasm32
#[cfg(target_arch = "wasm32")]
mod ic0 {
    #[link(wasm_import_module = "ic0")]
    extern "C" {
        pub fn performance_counter(counter_type: u32) -> u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_the_envelope() {
        let mut stats = OperationStats::new();
        for v in [10u64, 30, 20] {
            stats.record(v);
        }
        assert_eq!(stats.call_count, 3);
        assert_eq!(stats.min_instructions, 10);
        assert_eq!(stats.max_instructions, 30);
        assert_eq!(stats.average(), 20);
    }

    #[test]
    fn recent_samples_wrap_around() {
        let mut stats = OperationStats::new();
        for v in 0..(MAX_SAMPLES as u64 + 5) {
            stats.record(v);
        }
        assert_eq!(stats.recent_samples.len(), MAX_SAMPLES);
        // The oldest five samples were overwritten in place.
        assert_eq!(stats.recent_samples[0], MAX_SAMPLES as u64);
        assert_eq!(stats.recent_samples[4], MAX_SAMPLES as u64 + 4);
        assert_eq!(stats.recent_samples[5], 5);
    }
}
