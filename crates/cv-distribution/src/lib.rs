//! Allocation engine routing newly arrived candidate records across public sales channels.

pub mod config;
pub mod distribution;
pub mod error;
pub mod telemetry;
