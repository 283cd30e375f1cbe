//! rf-core: shared types for the reframer workspace.
//!
//! This crate holds everything the extraction engine and the CLI agree on:
//! the error type, the stage configuration, media-domain value types and the
//! packet that flows between the host and the stage.

pub mod config;
pub mod error;
pub mod media;
pub mod packet;

pub use error::{Error, ErrorCategory, Result};
pub use media::{LaneId, LaneInfo, Rational, SapType, StreamCategory};
pub use packet::{ChunkInfo, Packet};
