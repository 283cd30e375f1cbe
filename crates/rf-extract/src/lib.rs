//! rf-extract: the reframing and time-range extraction engine.
//!
//! Packets arrive per lane through a [`Host`], are classified against the
//! active range, optionally paced against the wall clock and forwarded with
//! rebased timestamps. The engine is split into pure pieces that can be
//! tested on their own and a stage that wires them together.
//!
//! # Modules
//!
//! - [`descriptor`] - Range bound descriptors (`T00:01:00`, `F25`, `D10`, `S1m`, `SAP`, dates)
//! - [`plan`] - Extraction mode and ordered ranges from the configuration
//! - [`classify`] - Before / in / after placement of a packet against a range
//! - [`lane`] - Per-lane queue, strategy and start search
//! - [`resolver`] - Cut points for duration, size and sync-point splits
//! - [`pacer`] - Real-time release of packets
//! - [`utc`] - Media time to UTC mapping
//! - [`rewrite`] - Partial-packet trimming and timestamp rebasing
//! - [`session`] - Range advancement and cross-range state
//! - [`host`] - The host interface and an in-memory host
//! - [`stage`] - The [`Reframer`] tick engine
//!
//! # Example
//!
//! ```
//! use rf_core::config::ReframerConfig;
//! use rf_core::{LaneInfo, Packet};
//! use rf_extract::{MemoryHost, Reframer, Tick};
//!
//! let packets: Vec<Packet> = (0..100)
//!     .map(|i| Packet::new(i, 1, vec![0u8; 8]).sync())
//!     .collect();
//!
//! let mut host = MemoryHost::new();
//! let lane = host.add_lane(LaneInfo::video(25).intra_only(), packets, false);
//!
//! let cfg = ReframerConfig {
//!     xs: vec!["1".into()],
//!     xe: vec!["2".into()],
//!     ..Default::default()
//! };
//! let mut stage = Reframer::new(cfg);
//! stage.attach_lane(lane, LaneInfo::video(25).intra_only());
//!
//! while stage.process(&mut host).unwrap() != Tick::Finished {}
//! assert_eq!(host.outputs(lane).len(), 25);
//! assert_eq!(host.outputs(lane)[0].cts, 0);
//! ```

pub mod classify;
pub mod clock;
pub mod descriptor;
pub mod host;
pub mod lane;
pub mod pacer;
pub mod plan;
pub mod resolver;
pub mod rewrite;
pub mod session;
pub mod stage;
pub mod utc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::{parse, ParseError, RangeBound};
pub use host::{Host, MemoryHost};
pub use plan::{plan, ExtractMode, Plan, Range, RangePoint};
pub use stage::{Reframer, Tick};
