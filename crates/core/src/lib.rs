//! Domain model for the Cursus study platform.
//!
//! Everything in this crate is pure data and pure functions: snapshots of a
//! user's progress, the rules for mutating them, and a clock abstraction so
//! date-sensitive rules (streaks, the daily challenge) stay deterministic in
//! tests. Persistence and synchronization live in the `storage` and
//! `services` crates.

#![forbid(unsafe_code)]

pub mod model;
pub mod time;

pub use time::Clock;
