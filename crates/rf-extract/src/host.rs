//! The boundary between the stage and the pipeline that runs it.
//!
//! The stage never owns its inputs or outputs. Everything it consumes and
//! produces goes through [`Host`]. [`MemoryHost`] is a complete in-process
//! implementation backed by packet vectors, used by the CLI and the tests.

use rf_core::{LaneId, LaneInfo, Packet, Rational};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Services the pipeline provides to the stage.
pub trait Host {
    /// Peek at the next pending input packet of a lane.
    fn next_input(&mut self, lane: LaneId) -> Option<&Packet>;

    /// Take the next pending input packet of a lane.
    fn drop_input(&mut self, lane: LaneId) -> Option<Packet>;

    /// The lane has no pending packet and will not get another one.
    fn is_eos(&self, lane: LaneId) -> bool;

    /// The source of a lane can reposition.
    fn can_seek(&self, lane: LaneId) -> bool;

    /// Reposition the source of a lane so delivery restarts at or before
    /// `position`.
    fn send_seek(&mut self, lane: LaneId, position: Rational);

    /// Ask the source of a lane to stop delivering.
    fn send_stop(&mut self, lane: LaneId);

    /// Resume a stopped source from `position`.
    fn send_play(&mut self, lane: LaneId, position: Rational);

    fn push_output(&mut self, lane: LaneId, packet: Packet);

    fn set_output_eos(&mut self, lane: LaneId);

    /// Ask to be invoked again after `after`.
    fn request_reschedule(&mut self, after: Duration);
}

// ---------------------------------------------------------------------------
// MemoryHost
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Source {
    info: LaneInfo,
    packets: Vec<Packet>,
    cursor: usize,
    /// More packets may still be pushed.
    live: bool,
    seekable: bool,
    stopped: bool,
}

impl Source {
    /// Index of the last sync packet at or before `position`.
    fn seek_index(&self, position: Rational) -> usize {
        let target = position.to_ticks(self.info.timescale);
        self.packets
            .iter()
            .rposition(|p| {
                (self.info.all_sap || p.is_sync()) && p.cts as i64 + self.info.delay <= target
            })
            .unwrap_or(0)
    }
}

/// In-memory host: inputs are packet lists, outputs are collected per lane.
#[derive(Debug, Default)]
pub struct MemoryHost {
    sources: Vec<Source>,
    outputs: BTreeMap<LaneId, Vec<Packet>>,
    output_eos: BTreeSet<LaneId>,
    reschedule: Option<Duration>,
    seeks: Vec<(LaneId, Rational)>,
    stops: Vec<LaneId>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lane whose input is `packets`, followed by end of stream.
    pub fn add_lane(&mut self, info: LaneInfo, packets: Vec<Packet>, seekable: bool) -> LaneId {
        self.sources.push(Source {
            info,
            packets,
            cursor: 0,
            live: false,
            seekable,
            stopped: false,
        });
        LaneId(self.sources.len() - 1)
    }

    /// Add a lane that is fed with [`MemoryHost::push_input`].
    pub fn add_live_lane(&mut self, info: LaneInfo) -> LaneId {
        let id = self.add_lane(info, Vec::new(), false);
        self.sources[id.0].live = true;
        id
    }

    pub fn push_input(&mut self, lane: LaneId, packet: Packet) {
        if let Some(src) = self.sources.get_mut(lane.0) {
            src.packets.push(packet);
        }
    }

    /// End a live lane.
    pub fn close_input(&mut self, lane: LaneId) {
        if let Some(src) = self.sources.get_mut(lane.0) {
            src.live = false;
        }
    }

    pub fn lane_info(&self, lane: LaneId) -> Option<&LaneInfo> {
        self.sources.get(lane.0).map(|s| &s.info)
    }

    pub fn lanes(&self) -> impl Iterator<Item = (LaneId, &LaneInfo)> {
        self.sources
            .iter()
            .enumerate()
            .map(|(i, s)| (LaneId(i), &s.info))
    }

    /// Packets forwarded on a lane so far.
    pub fn outputs(&self, lane: LaneId) -> &[Packet] {
        self.outputs.get(&lane).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output_eos(&self, lane: LaneId) -> bool {
        self.output_eos.contains(&lane)
    }

    /// The last reschedule request, cleared on read.
    pub fn take_reschedule(&mut self) -> Option<Duration> {
        self.reschedule.take()
    }

    pub fn seeks(&self) -> &[(LaneId, Rational)] {
        &self.seeks
    }

    pub fn stops(&self) -> &[LaneId] {
        &self.stops
    }
}

impl Host for MemoryHost {
    fn next_input(&mut self, lane: LaneId) -> Option<&Packet> {
        let src = self.sources.get(lane.0)?;
        if src.stopped {
            return None;
        }
        src.packets.get(src.cursor)
    }

    fn drop_input(&mut self, lane: LaneId) -> Option<Packet> {
        let src = self.sources.get_mut(lane.0)?;
        if src.stopped {
            return None;
        }
        let packet = src.packets.get(src.cursor).cloned()?;
        src.cursor += 1;
        Some(packet)
    }

    fn is_eos(&self, lane: LaneId) -> bool {
        self.sources
            .get(lane.0)
            .map_or(true, |s| s.stopped || (!s.live && s.cursor >= s.packets.len()))
    }

    fn can_seek(&self, lane: LaneId) -> bool {
        self.sources.get(lane.0).is_some_and(|s| s.seekable)
    }

    fn send_seek(&mut self, lane: LaneId, position: Rational) {
        self.seeks.push((lane, position));
        if let Some(src) = self.sources.get_mut(lane.0) {
            if src.seekable {
                src.cursor = src.seek_index(position);
            }
        }
    }

    fn send_stop(&mut self, lane: LaneId) {
        self.stops.push(lane);
        if let Some(src) = self.sources.get_mut(lane.0) {
            src.stopped = true;
        }
    }

    fn send_play(&mut self, lane: LaneId, position: Rational) {
        if let Some(src) = self.sources.get_mut(lane.0) {
            src.stopped = false;
            if src.seekable {
                src.cursor = src.seek_index(position);
            }
        }
    }

    fn push_output(&mut self, lane: LaneId, packet: Packet) {
        self.outputs.entry(lane).or_default().push(packet);
    }

    fn set_output_eos(&mut self, lane: LaneId) {
        self.output_eos.insert(lane);
    }

    fn request_reschedule(&mut self, after: Duration) {
        self.reschedule = Some(self.reschedule.map_or(after, |r| r.min(after)));
    }
}
