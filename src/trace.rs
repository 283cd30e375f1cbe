//! JSON packet traces, the input of the `run` command.
//!
//! ```json
//! {
//!   "lanes": [
//!     {
//!       "info": { "category": "video", "timescale": 25, "all_sap": false },
//!       "seekable": true,
//!       "packets": [ { "cts": 0, "duration": 1, "sap": 1, "size": 1200 } ]
//!     }
//!   ]
//! }
//! ```
//!
//! A packet payload is either the explicit `data` bytes or `size` zero bytes.

use anyhow::{Context, Result};
use bytes::Bytes;
use rf_core::{LaneInfo, Packet, SapType};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    pub lanes: Vec<TraceLane>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceLane {
    #[serde(default)]
    pub info: LaneInfo,
    #[serde(default)]
    pub seekable: bool,
    #[serde(default)]
    pub packets: Vec<TracePacket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracePacket {
    pub cts: u64,
    #[serde(default)]
    pub dts: Option<u64>,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub sap: SapType,
    #[serde(default)]
    pub droppable: bool,
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub utc_ms: Option<u64>,
}

impl From<TracePacket> for Packet {
    fn from(p: TracePacket) -> Self {
        let payload = match p.data {
            Some(data) => Bytes::from(data),
            None => Bytes::from(vec![0u8; p.size]),
        };
        let mut packet = Packet::new(p.cts, p.duration, payload)
            .with_dts(p.dts.unwrap_or(p.cts))
            .with_sap(p.sap);
        packet.droppable = p.droppable;
        packet.utc_ms = p.utc_ms;
        packet
    }
}

impl Trace {
    pub fn from_json(json: &str) -> Result<Self> {
        let trace: Trace = serde_json::from_str(json).context("invalid packet trace")?;
        if trace.lanes.is_empty() {
            anyhow::bail!("packet trace has no lanes");
        }
        Ok(trace)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read trace {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("in {}", path.display()))
    }

    pub fn packet_count(&self) -> usize {
        self.lanes.iter().map(|l| l.packets.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::StreamCategory;

    #[test]
    fn parses_minimal_trace() {
        let trace = Trace::from_json(
            r#"{"lanes":[{"info":{"category":"video","timescale":25,"all_sap":false},
                "packets":[{"cts":0,"duration":1,"sap":1,"size":4},{"cts":1,"duration":1}]}]}"#,
        )
        .unwrap();
        assert_eq!(trace.packet_count(), 2);
        let lane = &trace.lanes[0];
        assert_eq!(lane.info.category, StreamCategory::Video);
        assert!(!lane.seekable);

        let first = Packet::from(lane.packets[0].clone());
        assert!(first.is_sync());
        assert_eq!(first.size(), 4);
        assert_eq!(first.dts, 0);
    }

    #[test]
    fn explicit_data_wins_over_size() {
        let packet = Packet::from(TracePacket {
            cts: 3,
            dts: Some(1),
            duration: 1,
            sap: SapType::None,
            droppable: true,
            size: 100,
            data: Some(vec![0, 0, 0, 7]),
            utc_ms: Some(42),
        });
        assert_eq!(&packet.payload[..], &[0, 0, 0, 7]);
        assert_eq!(packet.dts, 1);
        assert!(packet.droppable);
        assert_eq!(packet.utc_ms, Some(42));
    }

    #[test]
    fn rejects_empty_trace() {
        assert!(Trace::from_json(r#"{"lanes":[]}"#).is_err());
        assert!(Trace::from_json("not json").is_err());
    }
}
