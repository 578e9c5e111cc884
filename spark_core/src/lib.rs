//! Sparks: a deterministic byte-cellular artificial-life world.
//!
//! A flat grid of byte cells (void, wall, solar, data) is shared by a
//! population of autonomous agents ("sparks"), each carrying an evolvable
//! genome: a 256-entry decision matrix plus a library of 16 microcode
//! functions interpreted by a small register machine. One call to
//! [`World::step`] runs a full synchronous tick: environmental regrowth,
//! serial spark visitation (microcode, metabolism, aging), occupancy
//! arbitration with collision damage, reproduction with mutation and
//! color-lineage drift, and an extinction safeguard.
//!
//! The engine is fully deterministic for a fixed seed and input sequence.
//! All allocations happen at world creation; stepping does not touch the
//! heap. Host-facing concerns (timers, pixel readback transport, tuning
//! policy) live outside this crate and interact only through [`World`]'s
//! public methods and the [`Tuning`] record.

pub mod config;
pub mod genome;
pub mod grid;
pub mod occupancy;
pub mod rng;
pub mod spark;
pub mod vm;
pub mod world;


pub use config::Tuning;
pub use rng::XorShift32;
pub use spark::Spark;
pub use world::{SeatResult, World, WorldStats};
