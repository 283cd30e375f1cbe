//! Cut-point selection for the duration, size and sync-point split modes.
//!
//! The resolver only looks at summaries of what the lanes currently hold. It
//! either commits to a cut, declares the chunk final (input ended before a
//! cut was found), or reports how far packets can already be released
//! without knowing the cut.

use rf_core::config::XRound;
use rf_core::Rational;

/// Timing, size and sync flag of one queued packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub time: Rational,
    pub end: Rational,
    pub size: u64,
    pub sync: bool,
}

/// What the resolver needs to know about a lane.
#[derive(Debug, Clone, Default)]
pub struct LaneView {
    pub samples: Vec<Sample>,
    /// No more input will arrive.
    pub eos: bool,
    /// The lane has real sync-point structure (not every packet is a sync
    /// point).
    pub boundary: bool,
    /// The lane may go long without packets and never holds a cut back.
    pub sparse: bool,
}

impl LaneView {
    fn tail(&self) -> Option<Rational> {
        self.samples.last().map(|s| s.end)
    }

    /// Every packet of this lane before `t` is known.
    fn covers(&self, t: Rational) -> bool {
        self.eos || self.sparse || self.tail().is_some_and(|tail| tail >= t)
    }
}

/// How a size-split boundary is chosen between the last sync point under the
/// target and the first one at or over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    Previous,
    Current,
    Closest,
}

impl From<XRound> for SizePolicy {
    fn from(round: XRound) -> Self {
        match round {
            XRound::Before => SizePolicy::Previous,
            XRound::After => SizePolicy::Current,
            XRound::Closest | XRound::Seek => SizePolicy::Closest,
        }
    }
}

/// Split rule of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRule {
    Duration(Rational),
    Size { target: u64, policy: SizePolicy },
    Sap,
}

/// Outcome of one resolver pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The chunk ends at this time.
    Cut(Rational),
    /// Input ended; the chunk runs to the end.
    Final,
    /// Not enough data. Packets ending at or before `safe_until` belong to the
    /// current chunk whatever the cut turns out to be.
    Pending { safe_until: Option<Rational> },
}

/// Find the end of the chunk starting at `chunk_start`.
///
/// `flushed_bytes` is what the chunk already released (size split only).
pub fn resolve(
    rule: SplitRule,
    chunk_start: Rational,
    flushed_bytes: u64,
    lanes: &[LaneView],
) -> Resolution {
    let boundary: Vec<&LaneView> = {
        let structured: Vec<&LaneView> = lanes.iter().filter(|l| l.boundary).collect();
        if structured.is_empty() {
            lanes.iter().filter(|l| !l.sparse).collect()
        } else {
            structured
        }
    };
    if boundary.is_empty() {
        return Resolution::Final;
    }

    match rule {
        SplitRule::Duration(d) => first_sync_cut(&boundary, chunk_start, chunk_start + d),
        SplitRule::Sap => first_sync_cut(&boundary, chunk_start, chunk_start),
        SplitRule::Size { target, policy } => {
            size_cut(boundary[0], lanes, chunk_start, flushed_bytes, target, policy)
        }
    }
}

/// Earliest sync point past `chunk_start` and at or after `not_before`,
/// taken as the minimum across boundary lanes.
fn first_sync_cut(
    boundary: &[&LaneView],
    chunk_start: Rational,
    not_before: Rational,
) -> Resolution {
    let mut cut: Option<Rational> = None;
    let mut undecided: Option<Rational> = None;

    for lane in boundary {
        let candidate = lane
            .samples
            .iter()
            .find(|s| s.sync && s.time > chunk_start && s.time >= not_before)
            .map(|s| s.time);

        match candidate {
            Some(t) => cut = Some(cut.map_or(t, |c| c.min(t))),
            None if lane.eos => {}
            None => {
                // The cut on this lane can only come after what it holds now.
                let floor = lane.tail().unwrap_or(chunk_start).max(not_before);
                undecided = Some(undecided.map_or(floor, |u| u.min(floor)));
            }
        }
    }

    match (cut, undecided) {
        (_, Some(floor)) => Resolution::Pending {
            safe_until: Some(cut.map_or(floor, |c| c.min(floor))),
        },
        (Some(c), None) => Resolution::Cut(c),
        (None, None) => Resolution::Final,
    }
}

fn size_cut(
    primary: &LaneView,
    lanes: &[LaneView],
    chunk_start: Rational,
    flushed_bytes: u64,
    target: u64,
    policy: SizePolicy,
) -> Resolution {
    let bytes_before = |t: Rational| -> u64 {
        flushed_bytes
            + lanes
                .iter()
                .flat_map(|l| l.samples.iter())
                .filter(|s| s.time < t)
                .map(|s| s.size)
                .sum::<u64>()
    };

    let mut previous: Option<(Rational, u64)> = None;
    let mut current: Option<(Rational, u64)> = None;
    let mut complete = true;

    for sample in primary
        .samples
        .iter()
        .filter(|s| s.sync && s.time > chunk_start)
    {
        if !lanes.iter().all(|l| l.covers(sample.time)) {
            complete = false;
            break;
        }
        let bytes = bytes_before(sample.time);
        if bytes >= target {
            current = Some((sample.time, bytes));
            break;
        }
        previous = Some((sample.time, bytes));
    }

    let Some(cur) = current else {
        return if complete && lanes.iter().all(|l| l.eos || l.sparse) {
            Resolution::Final
        } else {
            Resolution::Pending {
                safe_until: previous.map(|p| p.0),
            }
        };
    };

    let chosen = match (policy, previous) {
        (SizePolicy::Current, _) | (_, None) => cur,
        (SizePolicy::Previous, Some(prev)) => prev,
        (SizePolicy::Closest, Some(prev)) => {
            if target - prev.1 <= cur.1 - target {
                prev
            } else {
                cur
            }
        }
    };
    Resolution::Cut(chosen.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Packets of `size` bytes every `step` seconds, sync every `gop` packets.
    fn lane(count: u64, step: i64, gop: u64, size: u64, eos: bool) -> LaneView {
        let samples = (0..count)
            .map(|i| Sample {
                time: Rational::from_secs(i as i64 * step),
                end: Rational::from_secs((i as i64 + 1) * step),
                size,
                sync: i % gop == 0,
            })
            .collect();
        LaneView {
            samples,
            eos,
            boundary: gop > 1,
            sparse: false,
        }
    }

    #[test]
    fn duration_cut_on_first_sync_after_target() {
        // Sync every 2 s.
        let video = lane(30, 1, 2, 100, false);
        let res = resolve(
            SplitRule::Duration(Rational::from_secs(10)),
            Rational::ZERO,
            0,
            &[video],
        );
        assert_eq!(res, Resolution::Cut(Rational::from_secs(10)));
    }

    #[test]
    fn duration_cut_rounds_up_to_next_sync() {
        // Sync every 3 s: 0, 3, 6, 9, 12.
        let video = lane(30, 1, 3, 100, false);
        let res = resolve(
            SplitRule::Duration(Rational::from_secs(10)),
            Rational::ZERO,
            0,
            &[video],
        );
        assert_eq!(res, Resolution::Cut(Rational::from_secs(12)));
    }

    #[test]
    fn duration_pending_reports_safe_point() {
        let video = lane(6, 1, 2, 100, false);
        let res = resolve(
            SplitRule::Duration(Rational::from_secs(10)),
            Rational::ZERO,
            0,
            &[video],
        );
        assert_eq!(
            res,
            Resolution::Pending {
                safe_until: Some(Rational::from_secs(10))
            }
        );
    }

    #[test]
    fn duration_final_at_end_of_stream() {
        let video = lane(5, 1, 2, 100, true);
        let res = resolve(
            SplitRule::Duration(Rational::from_secs(10)),
            Rational::ZERO,
            0,
            &[video],
        );
        assert_eq!(res, Resolution::Final);
    }

    #[test]
    fn audio_only_uses_every_packet() {
        let audio = lane(30, 1, 1, 100, false);
        let res = resolve(SplitRule::Sap, Rational::from_secs(4), 0, &[audio]);
        assert_eq!(res, Resolution::Cut(Rational::from_secs(5)));
    }

    #[test]
    fn sap_split_takes_minimum_across_lanes() {
        let a = lane(30, 1, 4, 100, false);
        let b = lane(30, 1, 3, 100, false);
        let res = resolve(SplitRule::Sap, Rational::ZERO, 0, &[a, b]);
        assert_eq!(res, Resolution::Cut(Rational::from_secs(3)));
    }

    #[test]
    fn size_split_policies() {
        // 100 bytes per second, sync every 4 s: bytes before 4 s = 400, 8 s = 800.
        let video = || lane(40, 1, 4, 100, false);
        let rule = |policy| SplitRule::Size {
            target: 700,
            policy,
        };

        let prev = resolve(rule(SizePolicy::Previous), Rational::ZERO, 0, &[video()]);
        assert_eq!(prev, Resolution::Cut(Rational::from_secs(4)));

        let cur = resolve(rule(SizePolicy::Current), Rational::ZERO, 0, &[video()]);
        assert_eq!(cur, Resolution::Cut(Rational::from_secs(8)));

        // |700-400| = 300 > |800-700| = 100.
        let closest = resolve(rule(SizePolicy::Closest), Rational::ZERO, 0, &[video()]);
        assert_eq!(closest, Resolution::Cut(Rational::from_secs(8)));
    }

    #[test]
    fn size_tie_favors_earlier_boundary() {
        let video = lane(40, 1, 4, 100, false);
        let res = resolve(
            SplitRule::Size {
                target: 600,
                policy: SizePolicy::Closest,
            },
            Rational::ZERO,
            0,
            &[video],
        );
        assert_eq!(res, Resolution::Cut(Rational::from_secs(4)));
    }

    #[test]
    fn size_counts_flushed_bytes_and_other_lanes() {
        let video = lane(40, 1, 4, 100, false);
        let audio = lane(40, 1, 1, 100, false);
        // Flushed 100 + 400 video + 400 audio before 4 s.
        let res = resolve(
            SplitRule::Size {
                target: 850,
                policy: SizePolicy::Current,
            },
            Rational::ZERO,
            100,
            &[video, audio],
        );
        assert_eq!(res, Resolution::Cut(Rational::from_secs(4)));
    }

    #[test]
    fn size_waits_for_lagging_lane() {
        let video = lane(40, 1, 4, 100, false);
        let audio = lane(2, 1, 1, 100, false);
        let res = resolve(
            SplitRule::Size {
                target: 850,
                policy: SizePolicy::Current,
            },
            Rational::ZERO,
            0,
            &[video, audio],
        );
        assert_eq!(res, Resolution::Pending { safe_until: None });
    }

    #[test]
    fn size_policy_from_rounding() {
        assert_eq!(SizePolicy::from(XRound::Before), SizePolicy::Previous);
        assert_eq!(SizePolicy::from(XRound::After), SizePolicy::Current);
        assert_eq!(SizePolicy::from(XRound::Closest), SizePolicy::Closest);
    }
}
