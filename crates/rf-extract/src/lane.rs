//! Per-lane state: the retained packet queue, the rounding strategy chosen
//! from the stream category, and the transient fields of the active range.

use rf_core::config::{ReframerConfig, XRound};
use rf_core::{LaneId, LaneInfo, Packet, Rational, StreamCategory};
use std::collections::VecDeque;

use crate::classify::Rounding;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// What happens to a packet that only partly overlaps a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialPolicy {
    /// Cut the payload at a sample boundary.
    SplitPayload,
    /// Move the start or end of the packet; the payload is kept whole.
    Retime,
    /// Forward the whole packet with a skip hint or a clipped duration.
    Hint,
}

/// Per-lane behavior selected once when the lane attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStrategy {
    /// The lane may only start on a sync point.
    pub constrained: bool,
    pub rounding: Rounding,
    pub partial: PartialPolicy,
    /// The part of a packet past a range end opens the next range.
    pub requeue_remainder: bool,
}

impl LaneStrategy {
    pub fn for_lane(info: &LaneInfo, cfg: &ReframerConfig) -> Self {
        let seek = cfg.xround == XRound::Seek;
        let sync_structured = !info.all_sap && !cfg.nosap;

        match info.category {
            StreamCategory::Video => Self {
                constrained: sync_structured,
                rounding: if seek || cfg.nosap {
                    Rounding::Sample
                } else {
                    Rounding::Gop
                },
                partial: PartialPolicy::Hint,
                requeue_remainder: false,
            },
            StreamCategory::CompressedAudio => Self {
                constrained: sync_structured,
                rounding: if (seek && !cfg.no_audio_seek) || cfg.nosap {
                    Rounding::Sample
                } else {
                    Rounding::Gop
                },
                partial: PartialPolicy::Hint,
                requeue_remainder: false,
            },
            StreamCategory::UncompressedAudio => Self {
                constrained: false,
                rounding: Rounding::Sample,
                partial: if info.bytes_per_frame > 0 {
                    PartialPolicy::SplitPayload
                } else {
                    PartialPolicy::Retime
                },
                requeue_remainder: true,
            },
            StreamCategory::Text | StreamCategory::Generic => Self {
                constrained: false,
                rounding: Rounding::Sample,
                partial: PartialPolicy::Retime,
                requeue_remainder: true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Queue entries and start state
// ---------------------------------------------------------------------------

/// A packet retained by the lane, with its presentation time in lane ticks,
/// its one-based input frame index and the UTC instant derived when it was
/// taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Queued {
    pub packet: Packet,
    pub media: i64,
    pub frame: u64,
    pub utc_ms: Option<i64>,
}

impl Queued {
    pub fn end(&self) -> i64 {
        self.media + self.packet.duration as i64
    }
}

/// Where a lane stands with respect to the start of the active range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartState {
    #[default]
    AwaitingStart,
    /// Forwarding starts at this presentation time (lane ticks).
    StartAt(i64),
    /// The lane ended before reaching the range.
    EndOfStreamBeforeStart,
    /// The lane's only packet was replayed at the head of the range.
    HeldSinglePacketReinjected,
}

/// Target of a start search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTarget {
    /// Presentation time in lane ticks.
    Time(i64),
    /// One-based frame index.
    Frame(u64),
}

/// Outcome of a start search on a sync-constrained lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located {
    /// Start on the sync point at this presentation time.
    At(i64),
    /// The sync point at this presentation time was forwarded by the
    /// previous range; the queue still holds everything after it.
    Consumed(i64),
    EndOfStream,
    /// More packets are needed.
    Pending,
}

// ---------------------------------------------------------------------------
// LaneState
// ---------------------------------------------------------------------------

/// Everything the stage tracks for one lane.
#[derive(Debug)]
pub struct LaneState {
    pub id: LaneId,
    pub info: LaneInfo,
    pub strategy: LaneStrategy,
    pub fifo: VecDeque<Queued>,
    /// Copy of the first packet while it is the only one seen.
    pub held: Option<Packet>,
    /// Input frame counter (one-based index of the last packet taken).
    pub frames_seen: u64,
    /// Admitted packets taken from the host.
    pub packets_seen: u64,
    /// Input reached end of stream.
    pub eos: bool,
    /// Paused by a downstream stop.
    pub stopped: bool,
    /// No more output for the session.
    pub done: bool,
    pub output_eos_sent: bool,

    // Per-range fields, reset by `reset_for_range`.
    pub start: StartState,
    /// First presentation time admitted by the window.
    pub window_start: i64,
    /// Sync point the lane starts decoding from.
    pub sync_start: Option<i64>,
    /// Ticks subtracted from input timestamps.
    pub shift: i64,
    pub range_done: bool,
    /// The lane cannot make progress without more input.
    pub starved: bool,
    pub forwarded_in_range: u64,
    pub chunk_sent: bool,
    pub last_sync_forwarded: Option<i64>,
    pub last_forwarded_end: Option<i64>,
    /// The range picks up right after the data the previous range forwarded.
    pub continues: bool,
    /// Last output timestamp of the current output file.
    pub last_out: Option<u64>,
    /// Frame index and presentation time of the last sync point forwarded,
    /// kept across ranges until the input is repositioned.
    pub last_sync_emitted: Option<(u64, i64)>,
}

impl LaneState {
    pub fn new(id: LaneId, info: LaneInfo, cfg: &ReframerConfig) -> Self {
        let strategy = LaneStrategy::for_lane(&info, cfg);
        Self {
            id,
            info,
            strategy,
            fifo: VecDeque::new(),
            held: None,
            frames_seen: 0,
            packets_seen: 0,
            eos: false,
            stopped: false,
            done: false,
            output_eos_sent: false,
            start: StartState::AwaitingStart,
            window_start: 0,
            sync_start: None,
            shift: 0,
            range_done: false,
            starved: false,
            forwarded_in_range: 0,
            chunk_sent: false,
            last_sync_forwarded: None,
            last_forwarded_end: None,
            continues: false,
            last_out: None,
            last_sync_emitted: None,
        }
    }

    /// Presentation time of a packet in lane ticks.
    pub fn media_of(&self, packet: &Packet) -> i64 {
        packet.cts as i64 + self.info.delay
    }

    pub fn to_rational(&self, ticks: i64) -> Rational {
        Rational::from_ticks(ticks, self.info.timescale)
    }

    pub fn to_ticks(&self, time: Rational) -> i64 {
        time.to_ticks(self.info.timescale)
    }

    /// Exclusive end bound in lane ticks.
    pub fn to_end_ticks(&self, time: Rational) -> i64 {
        time.to_ticks_ceil(self.info.timescale)
    }

    /// Whether the next input packet passes the SAP, reference and frame
    /// filters. Must be called before the frame counter is advanced.
    pub fn admits(&self, packet: &Packet, cfg: &ReframerConfig) -> bool {
        if !cfg.saps.is_empty() && !cfg.saps.contains(&packet.sap) {
            return false;
        }
        if cfg.refs && packet.droppable {
            return false;
        }
        if !cfg.frames.is_empty() && !cfg.frames.contains(&(self.frames_seen + 1)) {
            return false;
        }
        true
    }

    /// The frame filter has passed its highest listed frame.
    pub fn frames_exhausted(&self, cfg: &ReframerConfig) -> bool {
        cfg.frames
            .iter()
            .max()
            .is_some_and(|&last| self.frames_seen >= last)
    }

    /// Whether decoding may start at this entry.
    pub fn is_sync(&self, entry: &Queued) -> bool {
        self.info.all_sap || entry.packet.is_sync()
    }

    /// Record an admitted packet and keep the held copy up to date.
    pub fn note_packet(&mut self, packet: &Packet) {
        self.packets_seen += 1;
        match self.packets_seen {
            1 if self.info.category.is_sparse() => self.held = Some(packet.clone().detach()),
            2 => self.held = None,
            _ => {}
        }
    }

    /// The lane ended after a single packet that is still held.
    pub fn is_single_packet(&self) -> bool {
        self.eos && self.packets_seen == 1 && self.held.is_some()
    }

    pub fn enqueue(&mut self, packet: Packet, utc_ms: Option<i64>) {
        let media = self.media_of(&packet);
        self.fifo.push_back(Queued {
            packet,
            media,
            frame: self.frames_seen,
            utc_ms,
        });
    }

    /// No more packets for the active range.
    pub fn is_exhausted(&self) -> bool {
        self.done || self.stopped || self.range_done
    }

    /// Presentation time of the newest packet known to the lane.
    pub fn tail(&self) -> Option<i64> {
        self.fifo.back().map(Queued::end).or(self.last_forwarded_end)
    }

    pub fn reset_for_range(&mut self, new_file: bool) {
        self.start = StartState::AwaitingStart;
        self.window_start = 0;
        self.sync_start = None;
        self.shift = 0;
        self.range_done = false;
        self.starved = false;
        self.forwarded_in_range = 0;
        self.chunk_sent = false;
        self.last_sync_forwarded = None;
        self.continues = false;
        if new_file {
            self.last_out = None;
        }
    }

    /// Search the queue for the sync point a constrained lane starts on.
    ///
    /// Packets that can no longer be a start are discarded so the queue never
    /// grows past one group of pictures plus the lookahead needed to decide.
    /// When the sync point before the target was already forwarded by the
    /// previous range, the queue is left untouched and the search reports
    /// [`Located::Consumed`].
    pub fn locate_sync_start(&mut self, target: StartTarget, round: XRound) -> Located {
        let (goal, by_frame) = match target {
            StartTarget::Time(t) => (t, false),
            StartTarget::Frame(n) => (n as i64, true),
        };
        let key = |q: &Queued| if by_frame { q.frame as i64 } else { q.media };

        let carried = self
            .last_sync_emitted
            .filter(|_| round != XRound::After)
            .map(|(frame, media)| (if by_frame { frame as i64 } else { media }, media))
            .filter(|&(k, _)| k <= goal);

        match self
            .fifo
            .iter()
            .rposition(|q| self.is_sync(q) && key(q) <= goal)
        {
            Some(pos) => {
                self.fifo.drain(..pos);
            }
            None if carried.is_some() => {}
            None => {
                while self.fifo.front().is_some_and(|q| !self.is_sync(q)) {
                    self.fifo.pop_front();
                }
            }
        }

        let reached = self.fifo.back().is_some_and(|q| key(q) >= goal);
        let before = self
            .fifo
            .front()
            .filter(|q| self.is_sync(q) && key(q) <= goal)
            .map(|q| (key(q), q.media, false))
            .or(carried.map(|(k, media)| (k, media, true)));
        let after = self
            .fifo
            .iter()
            .find(|q| self.is_sync(q) && key(q) >= goal)
            .map(|q| (key(q), q.media, false));

        let chosen = match round {
            XRound::Before | XRound::Seek => {
                if reached || self.eos {
                    before.or(after)
                } else {
                    return Located::Pending;
                }
            }
            XRound::After => after,
            XRound::Closest => match (before, after) {
                (Some(b), Some(a)) => {
                    if goal - b.0 <= a.0 - goal {
                        Some(b)
                    } else {
                        Some(a)
                    }
                }
                (None, Some(a)) => Some(a),
                (Some(b), None) if self.eos => Some(b),
                _ => None,
            },
        };

        match chosen {
            Some((_, media, true)) => Located::Consumed(media),
            Some((_, media, false)) => {
                while self.fifo.front().is_some_and(|q| q.media < media) {
                    self.fifo.pop_front();
                }
                Located::At(media)
            }
            None if self.eos => Located::EndOfStream,
            None => Located::Pending,
        }
    }
}
