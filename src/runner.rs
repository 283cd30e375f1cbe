//! Drives the stage over an in-memory host on the tokio runtime.

use anyhow::Result;
use rf_core::config::ReframerConfig;
use rf_core::{ChunkInfo, LaneId, Packet, SapType};
use rf_extract::{MemoryHost, Reframer, Tick};
use serde::Serialize;
use std::io::Write;

use crate::trace::Trace;

/// Consecutive idle ticks after which a replay is considered stuck. A trace
/// has no live lanes, so a healthy stage is never idle for long.
const MAX_IDLE_TICKS: u32 = 64;

/// One forwarded packet, written as a JSON line.
#[derive(Debug, Serialize)]
pub struct OutputRecord<'a> {
    pub lane: usize,
    pub cts: u64,
    pub dts: u64,
    pub duration: u32,
    pub sap: SapType,
    pub size: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub seek: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub split: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub skip_begin: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<&'a ChunkInfo>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl<'a> OutputRecord<'a> {
    pub fn new(lane: LaneId, p: &'a Packet) -> Self {
        Self {
            lane: lane.0,
            cts: p.cts,
            dts: p.dts,
            duration: p.duration,
            sap: p.sap,
            size: p.size(),
            seek: p.seek,
            split: p.split,
            skip_begin: p.skip_begin,
            chunk: p.chunk.as_ref(),
        }
    }
}

/// Per-lane outcome of a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneReport {
    pub lane: usize,
    pub packets: usize,
    pub chunks: usize,
    pub ended: bool,
}

#[derive(Debug)]
pub struct Report {
    pub lanes: Vec<LaneReport>,
    pub records: usize,
    /// The error that stopped the stage, if any. Output forwarded before the
    /// failure has still been written.
    pub failure: Option<rf_core::Error>,
}

/// Replay `trace` through a stage configured with `cfg` and write every
/// forwarded packet to `out`.
pub async fn run(cfg: ReframerConfig, trace: Trace, out: &mut dyn Write) -> Result<Report> {
    let mut host = MemoryHost::new();
    let mut stage = Reframer::new(cfg);

    for lane in trace.lanes {
        let packets = lane.packets.into_iter().map(Packet::from).collect();
        let id = host.add_lane(lane.info.clone(), packets, lane.seekable);
        stage.attach_lane(id, lane.info);
    }

    let mut idle = 0;
    let failure = loop {
        match stage.process(&mut host) {
            Ok(Tick::Finished) => break None,
            Ok(Tick::Progress) => idle = 0,
            Ok(Tick::Reschedule(after)) => {
                idle = 0;
                host.take_reschedule();
                tokio::time::sleep(after).await;
            }
            Ok(Tick::Idle) => {
                idle += 1;
                if idle > MAX_IDLE_TICKS {
                    anyhow::bail!("stage made no progress in phase {:?}", stage.phase());
                }
                tokio::task::yield_now().await;
            }
            Err(err) => break Some(err),
        }
    };

    let ids: Vec<LaneId> = host.lanes().map(|(id, _)| id).collect();
    let mut records = 0;
    let mut lanes = Vec::with_capacity(ids.len());
    for id in ids {
        let packets = host.outputs(id);
        for p in packets {
            serde_json::to_writer(&mut *out, &OutputRecord::new(id, p))?;
            writeln!(out)?;
            records += 1;
        }
        lanes.push(LaneReport {
            lane: id.0,
            packets: packets.len(),
            chunks: packets.iter().filter(|p| p.chunk.is_some()).count(),
            ended: host.output_eos(id),
        });
    }
    out.flush()?;

    Ok(Report {
        lanes,
        records,
        failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_trace(frames: u64, gop: u64) -> Trace {
        let packets: Vec<String> = (0..frames)
            .map(|i| {
                let sap = u8::from(i % gop == 0);
                format!(r#"{{"cts":{i},"duration":1,"sap":{sap},"size":10}}"#)
            })
            .collect();
        Trace::from_json(&format!(
            r#"{{"lanes":[{{"info":{{"category":"video","timescale":25,"all_sap":false}},"packets":[{}]}}]}}"#,
            packets.join(",")
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn extracts_a_range() {
        let cfg = ReframerConfig {
            xs: vec!["2".into()],
            xe: vec!["4".into()],
            ..Default::default()
        };
        let mut out = Vec::new();
        let report = run(cfg, video_trace(250, 25), &mut out).await.unwrap();

        assert!(report.failure.is_none());
        assert_eq!(report.records, 50);
        assert_eq!(
            report.lanes,
            vec![LaneReport {
                lane: 0,
                packets: 50,
                chunks: 1,
                ended: true
            }]
        );

        let text = String::from_utf8(out).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["cts"], 0);
        assert_eq!(first["chunk"]["index"], 1);
        assert!(first.get("seek").is_none());
    }

    #[tokio::test]
    async fn reports_failure_after_partial_output() {
        let cfg = ReframerConfig {
            xs: vec!["6".into(), "1".into()],
            ..Default::default()
        };
        let mut out = Vec::new();
        let report = run(cfg, video_trace(250, 25), &mut out).await.unwrap();
        assert!(matches!(
            report.failure,
            Some(rf_core::Error::OutOfOrderRange { index: 1, .. })
        ));
        assert_eq!(report.records, 100);
    }
}
