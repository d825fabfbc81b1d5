//! Persistence adapters for Cursus progress data.
//!
//! [`repository`] defines the store traits plus in-memory doubles,
//! [`sqlite`] implements the durable backend, and [`cache`] holds the
//! device-local snapshot cache with its pending-write slot.

#![forbid(unsafe_code)]

pub mod cache;
pub mod repository;
pub mod sqlite;
