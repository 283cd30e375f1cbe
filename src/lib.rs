//! Reframer - packet reframing and time-range extraction
//!
//! This library crate exposes the trace replay used by the CLI for
//! integration testing.

pub mod runner;
pub mod trace;
