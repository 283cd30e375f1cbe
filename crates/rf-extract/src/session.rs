//! Range bookkeeping for one extraction session: which range is active, how
//! far input has been consumed, and the running output offset.

use rf_core::config::ReframerConfig;
use rf_core::Rational;

use crate::plan::{ExtractMode, Plan, Range, RangePoint};

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoRange,
    /// Lanes are searching for the start of the active range.
    Locating,
    /// The start is known on every lane; packets flow.
    Active,
    /// Every lane reached the end of the active range.
    Exhausted,
    Done,
}

/// End of the active range as currently known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEnd {
    Open,
    /// Exclusive end in session time.
    At(Rational),
    /// The end is not known yet; it lies at or after `horizon`.
    Pending { horizon: Rational },
}

/// The range currently being extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRange {
    /// Position in the range list (zero-based).
    pub index: usize,
    /// One-based chunk number reported downstream.
    pub chunk: u32,
    pub start: RangePoint,
    pub end: Option<RangePoint>,
    /// Requested start in session time, once it has been resolved.
    pub start_time: Option<Rational>,
    /// Time that maps to the first output timestamp of the range.
    pub origin: Option<Rational>,
    pub stop: RangeEnd,
    pub label: String,
    pub props: Vec<(String, String)>,
    /// Output timestamps restart with this range.
    pub file_boundary: bool,
    /// Video frames emitted before the range.
    pub frame_offset: u64,
    /// Furthest packet end forwarded so far.
    pub media_end: Option<Rational>,
}

impl ActiveRange {
    pub fn note_forwarded_end(&mut self, end: Rational) {
        self.media_end = Some(self.media_end.map_or(end, |e| e.max(end)));
    }

    /// Where the range actually stopped.
    fn actual_end(&self) -> Option<Rational> {
        match self.stop {
            RangeEnd::At(e) => Some(e),
            _ => self.media_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumed {
    Nothing,
    Until(RangePoint),
    All,
}

/// Ordered ranges and the state carried from one range to the next.
#[derive(Debug)]
pub struct Session {
    mode: ExtractMode,
    ranges: Vec<Range>,
    next: usize,
    pub phase: Phase,
    active: Option<ActiveRange>,
    chunks: u32,
    consumed: Consumed,
    output_offset: Rational,
    /// Video frames emitted by the session.
    pub video_frames: u64,
    /// Bytes forwarded in the active chunk.
    pub chunk_bytes: u64,
    next_chunk_start: Rational,
    split_done: bool,
    splitrange: bool,
}

impl Session {
    pub fn new(plan: &Plan, cfg: &ReframerConfig) -> Self {
        Self {
            mode: plan.mode,
            ranges: plan.ranges.clone(),
            next: 0,
            phase: Phase::NoRange,
            active: None,
            chunks: 0,
            consumed: Consumed::Nothing,
            output_offset: Rational::ZERO,
            video_frames: 0,
            chunk_bytes: 0,
            next_chunk_start: Rational::ZERO,
            split_done: false,
            splitrange: cfg.splitrange,
        }
    }

    pub fn mode(&self) -> ExtractMode {
        self.mode
    }

    pub fn active(&self) -> Option<&ActiveRange> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveRange> {
        self.active.as_mut()
    }

    /// Offset added to output timestamps of the active range.
    pub fn output_offset(&self) -> Rational {
        self.output_offset
    }

    /// Activate the next range, or the next implicit chunk in split modes.
    /// Returns `None` once nothing is left.
    pub fn load_next_range(&mut self) -> Option<&ActiveRange> {
        let (index, start, end, label, props) = if self.mode.is_split() {
            if self.split_done {
                return None;
            }
            let start = self.next_chunk_start;
            let label = format!("{:.3}", start.as_secs_f64());
            (self.chunks as usize, RangePoint::Time(start), None, label, Vec::new())
        } else {
            let range = self.ranges.get(self.next)?;
            let index = self.next;
            (
                index,
                range.start,
                range.end,
                range.label.clone(),
                range.props.clone(),
            )
        };

        self.next += 1;
        self.chunks += 1;
        self.chunk_bytes = 0;
        if self.splitrange {
            self.output_offset = Rational::ZERO;
        }

        self.active = Some(ActiveRange {
            index,
            chunk: self.chunks,
            start,
            end,
            start_time: None,
            origin: None,
            stop: RangeEnd::Open,
            label,
            props,
            file_boundary: self.splitrange,
            frame_offset: self.video_frames,
            media_end: None,
        });
        self.phase = Phase::Locating;
        self.active.as_ref()
    }

    /// Starting at `start` needs input that has already gone by.
    pub fn needs_rewind(&self, start: &RangePoint) -> bool {
        match self.consumed {
            Consumed::Nothing => false,
            Consumed::All => true,
            Consumed::Until(done) => start.is_before(&done) == Some(true),
        }
    }

    /// Input was repositioned; nothing is consumed any more.
    pub fn note_rewound(&mut self) {
        self.consumed = Consumed::Nothing;
    }

    /// Close the active range and carry its end into the session state.
    pub fn finish_range(&mut self) -> Option<ActiveRange> {
        let range = self.active.take()?;
        let origin = range.origin.or(range.start_time).unwrap_or(Rational::ZERO);
        let actual = range.actual_end();

        if !self.splitrange {
            if let Some(end) = actual.filter(|&e| e > origin) {
                self.output_offset = self.output_offset + (end - origin);
            }
        }

        self.consumed = match (range.stop, range.end) {
            (RangeEnd::At(e), Some(RangePoint::Time(_)) | None) => {
                Consumed::Until(RangePoint::Time(e))
            }
            (RangeEnd::At(_), Some(point)) => Consumed::Until(point),
            _ => Consumed::All,
        };

        if self.mode.is_split() {
            match range.stop {
                RangeEnd::At(cut) => self.next_chunk_start = cut,
                _ => self.split_done = true,
            }
        }

        self.phase = Phase::NoRange;
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;

    fn session(xs: &[&str], xe: &[&str]) -> Session {
        let cfg = ReframerConfig {
            xs: xs.iter().map(|s| s.to_string()).collect(),
            xe: xe.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Session::new(&plan(&cfg), &cfg)
    }

    fn close(s: &mut Session, origin: i64, end: i64) {
        let range = s.active_mut().unwrap();
        range.origin = Some(Rational::from_secs(origin));
        range.stop = RangeEnd::At(Rational::from_secs(end));
        s.finish_range();
    }

    #[test]
    fn ranges_advance_in_order() {
        let mut s = session(&["0", "10"], &["5", "20"]);
        assert_eq!(s.phase, Phase::NoRange);

        let first = s.load_next_range().unwrap();
        assert_eq!(first.chunk, 1);
        assert_eq!(first.start, RangePoint::Time(Rational::ZERO));
        assert_eq!(s.phase, Phase::Locating);
        close(&mut s, 0, 5);
        assert_eq!(s.output_offset(), Rational::from_secs(5));

        let second = s.load_next_range().unwrap();
        assert_eq!(second.chunk, 2);
        assert_eq!(second.index, 1);
        close(&mut s, 10, 20);
        assert_eq!(s.output_offset(), Rational::from_secs(15));

        assert!(s.load_next_range().is_none());
    }

    #[test]
    fn rewind_detection() {
        let mut s = session(&["10", "5"], &["20", "8"]);
        assert!(!s.needs_rewind(&RangePoint::Time(Rational::from_secs(10))));
        s.load_next_range();
        close(&mut s, 10, 20);
        assert!(s.needs_rewind(&RangePoint::Time(Rational::from_secs(5))));
        assert!(!s.needs_rewind(&RangePoint::Time(Rational::from_secs(20))));
        s.note_rewound();
        assert!(!s.needs_rewind(&RangePoint::Time(Rational::from_secs(5))));
    }

    #[test]
    fn open_range_consumes_everything() {
        let mut s = session(&["20", "5"], &[]);
        s.load_next_range();
        let range = s.active_mut().unwrap();
        range.origin = Some(Rational::from_secs(20));
        range.note_forwarded_end(Rational::from_secs(30));
        s.finish_range();
        assert_eq!(s.output_offset(), Rational::from_secs(10));
        assert!(s.needs_rewind(&RangePoint::Time(Rational::from_secs(5))));
    }

    #[test]
    fn split_chunks_follow_cuts() {
        let mut s = session(&["D10"], &[]);
        let first = s.load_next_range().unwrap();
        assert_eq!(first.start, RangePoint::Time(Rational::ZERO));
        close(&mut s, 0, 10);

        let second = s.load_next_range().unwrap();
        assert_eq!(second.start, RangePoint::Time(Rational::from_secs(10)));
        assert_eq!(second.chunk, 2);
        assert_eq!(second.label, "10.000");

        // Input ended inside the chunk.
        let range = s.active_mut().unwrap();
        range.origin = Some(Rational::from_secs(10));
        range.stop = RangeEnd::Open;
        s.finish_range();
        assert!(s.load_next_range().is_none());
    }

    #[test]
    fn splitrange_restarts_offset() {
        let cfg = ReframerConfig {
            xs: vec!["0".into(), "10".into()],
            splitrange: true,
            ..Default::default()
        };
        let mut s = Session::new(&plan(&cfg), &cfg);
        let first = s.load_next_range().unwrap();
        assert!(first.file_boundary);
        close(&mut s, 0, 10);
        assert_eq!(s.output_offset(), Rational::ZERO);
    }

    #[test]
    fn frame_offset_snapshots_video_count() {
        let mut s = session(&["0", "10"], &[]);
        s.load_next_range();
        s.video_frames = 250;
        close(&mut s, 0, 10);
        assert_eq!(s.load_next_range().unwrap().frame_offset, 250);
    }
}
