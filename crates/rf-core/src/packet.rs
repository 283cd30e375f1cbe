//! The unit of data exchanged between the host and the stage.

use bytes::Bytes;
use serde::Serialize;

use crate::media::SapType;

/// Chunk-boundary metadata attached to the first packet a lane forwards for
/// each extracted range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    /// One-based index of the range within the session.
    pub index: u32,
    /// Filename-friendly label derived from the range bounds.
    pub suffix: String,
    /// Video frames emitted by the session before this range.
    pub frame_offset: u64,
    /// The range starts a new output file and timestamps restart at zero.
    pub file_boundary: bool,
    /// Extra per-range properties.
    pub props: Vec<(String, String)>,
}

/// A framed elementary-stream packet.
///
/// Input packets only use the timing, SAP and payload fields. The stage fills
/// in the output hints (`seek`, `skip_begin`, `split`, `chunk`) when it
/// forwards a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Composition timestamp in lane ticks.
    pub cts: u64,
    /// Decode timestamp in lane ticks.
    pub dts: u64,
    /// Duration in lane ticks.
    pub duration: u32,
    pub sap: SapType,
    /// No other packet references this one.
    pub droppable: bool,
    pub payload: Bytes,
    /// Sender wall-clock time (milliseconds since the Unix epoch).
    pub utc_ms: Option<u64>,
    /// The payload borrows a host resource and must be copied before it can
    /// be kept past the current tick.
    pub transient: bool,
    /// Seek point: the packet starts before the requested start. It is
    /// decode-only unless `skip_begin` says how much of it to drop.
    pub seek: bool,
    /// Ticks a decoder should drop from the start of the decoded packet.
    pub skip_begin: u32,
    /// The packet was cut at a range end.
    pub split: bool,
    pub chunk: Option<ChunkInfo>,
}

impl Packet {
    pub fn new(cts: u64, duration: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            cts,
            dts: cts,
            duration,
            sap: SapType::None,
            droppable: false,
            payload: payload.into(),
            utc_ms: None,
            transient: false,
            seek: false,
            skip_begin: 0,
            split: false,
            chunk: None,
        }
    }

    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_sap(mut self, sap: SapType) -> Self {
        self.sap = sap;
        self
    }

    /// Mark as a type-1 sync point.
    pub fn sync(self) -> Self {
        self.with_sap(SapType::Type1)
    }

    pub fn droppable(mut self) -> Self {
        self.droppable = true;
        self
    }

    pub fn with_utc(mut self, utc_ms: u64) -> Self {
        self.utc_ms = Some(utc_ms);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_sync(&self) -> bool {
        self.sap.is_sync()
    }

    /// End of the packet in lane ticks.
    pub fn end(&self) -> u64 {
        self.cts + self.duration as u64
    }

    /// Copy a borrowed payload into owned memory so the packet can be kept.
    pub fn detach(mut self) -> Self {
        if self.transient {
            self.payload = Bytes::copy_from_slice(&self.payload);
            self.transient = false;
        }
        self
    }
}
