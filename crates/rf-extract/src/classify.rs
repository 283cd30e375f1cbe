//! Packet placement relative to a range window.
//!
//! All values are lane ticks on the presentation timeline (composition time
//! plus lane delay). The function is pure so every lane can classify its
//! queue independently.

/// How a lane's packets are matched against a range start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// A packet belongs to the range only if it starts inside it.
    Gop,
    /// A packet belongs to the range if any part of it overlaps.
    Sample,
}

/// Range bounds in lane ticks. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: Option<i64>,
}

/// Where a packet falls relative to a [`Window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    /// Inside the range. `discard` ticks overlap the start, `keep` (when set)
    /// is how many ticks from the packet start lie before the end.
    In { discard: u64, keep: Option<u64> },
    After,
}

/// Place a packet of `duration` ticks starting at `time` against `window`.
///
/// Ends are always matched on the packet start, so a packet that is `After`
/// one window is never `Before` a window starting where the first one ended.
pub fn classify(time: i64, duration: u64, window: Window, rounding: Rounding) -> Placement {
    let end = time.saturating_add(duration as i64);

    let before = match rounding {
        Rounding::Gop => time < window.start,
        Rounding::Sample if duration == 0 => time < window.start,
        Rounding::Sample => end <= window.start,
    };
    if before {
        return Placement::Before;
    }

    if let Some(stop) = window.end {
        if time >= stop {
            return Placement::After;
        }
    }

    let discard = match rounding {
        Rounding::Sample if time < window.start => (window.start - time) as u64,
        _ => 0,
    };
    let keep = window
        .end
        .filter(|&stop| end > stop)
        .map(|stop| (stop - time) as u64);

    Placement::In { discard, keep }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Window = Window {
        start: 100,
        end: Some(200),
    };

    #[test]
    fn gop_rounding_drops_straddling_start() {
        assert_eq!(classify(90, 20, W, Rounding::Gop), Placement::Before);
        assert_eq!(
            classify(100, 20, W, Rounding::Gop),
            Placement::In {
                discard: 0,
                keep: None
            }
        );
    }

    #[test]
    fn sample_rounding_keeps_overlap() {
        assert_eq!(classify(80, 20, W, Rounding::Sample), Placement::Before);
        assert_eq!(
            classify(90, 20, W, Rounding::Sample),
            Placement::In {
                discard: 10,
                keep: None
            }
        );
    }

    #[test]
    fn end_is_exclusive_and_keeps_partial() {
        assert_eq!(classify(200, 10, W, Rounding::Sample), Placement::After);
        assert_eq!(classify(200, 10, W, Rounding::Gop), Placement::After);
        assert_eq!(
            classify(190, 20, W, Rounding::Sample),
            Placement::In {
                discard: 0,
                keep: Some(10)
            }
        );
        assert_eq!(
            classify(190, 10, W, Rounding::Gop),
            Placement::In {
                discard: 0,
                keep: None
            }
        );
    }

    #[test]
    fn packet_covering_whole_window() {
        assert_eq!(
            classify(50, 200, W, Rounding::Sample),
            Placement::In {
                discard: 50,
                keep: Some(150)
            }
        );
    }

    #[test]
    fn zero_duration_packets() {
        assert_eq!(classify(99, 0, W, Rounding::Sample), Placement::Before);
        assert!(matches!(
            classify(100, 0, W, Rounding::Sample),
            Placement::In { .. }
        ));
    }

    #[test]
    fn open_window() {
        let open = Window {
            start: 0,
            end: None,
        };
        assert!(matches!(
            classify(1_000_000, 10, open, Rounding::Gop),
            Placement::In { .. }
        ));
    }

    #[test]
    fn consecutive_windows_partition_packets() {
        let first = Window {
            start: 0,
            end: Some(100),
        };
        let second = Window {
            start: 100,
            end: Some(200),
        };
        for t in (0..200).step_by(7) {
            let a = matches!(classify(t, 7, first, Rounding::Gop), Placement::In { .. });
            let b = matches!(classify(t, 7, second, Rounding::Gop), Placement::In { .. });
            assert!(a ^ b, "packet at {t} must land in exactly one window");
        }
    }
}
