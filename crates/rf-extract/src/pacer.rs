//! Real-time pacing of forwarded packets.
//!
//! The pacer anchors the first released packet to the current wall-clock
//! time and holds later packets until the wall clock has caught up with
//! their media time, scaled by the playback speed. It never drops anything;
//! it only tells the caller how long to wait.

use rf_core::config::RealTime;
use rf_core::LaneId;
use std::collections::HashMap;
use std::time::Duration;

/// Packets due within this window are released immediately.
pub const TOLERANCE: Duration = Duration::from_millis(1);

/// Shortest wait ever requested from the host.
pub const GRANULARITY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    media_us: i64,
    wall_us: u64,
}

/// Pacing decision for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Release,
    Wait(Duration),
}

/// Wall-clock pacer with either one shared anchor or one anchor per lane.
#[derive(Debug)]
pub struct Pacer {
    mode: RealTime,
    speed: f64,
    shared: Option<Anchor>,
    lanes: HashMap<LaneId, Option<Anchor>>,
}

impl Pacer {
    pub fn new(mode: RealTime, speed: f64) -> Self {
        Self {
            mode,
            speed: if speed == 0.0 || !speed.is_finite() {
                1.0
            } else {
                speed
            },
            shared: None,
            lanes: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != RealTime::Off
    }

    /// Decide whether a packet at `media_us` may go out at `now_us`.
    pub fn check(&mut self, lane: LaneId, media_us: i64, now_us: u64) -> Pace {
        if !self.is_active() {
            return Pace::Release;
        }

        let slot = match self.mode {
            RealTime::Sync => &mut self.shared,
            _ => self.lanes.entry(lane).or_default(),
        };

        let Some(anchor) = *slot else {
            *slot = Some(Anchor {
                media_us,
                wall_us: now_us,
            });
            return Pace::Release;
        };

        let media_elapsed = if self.speed < 0.0 {
            anchor.media_us - media_us
        } else {
            media_us - anchor.media_us
        };
        let due = media_elapsed as f64 / self.speed.abs();
        let wall_elapsed = now_us.saturating_sub(anchor.wall_us) as f64;
        let wait = due - wall_elapsed;

        if wait <= TOLERANCE.as_micros() as f64 {
            Pace::Release
        } else {
            Pace::Wait(Duration::from_micros(wait as u64).max(GRANULARITY))
        }
    }

    /// Forget every anchor; the next packet re-anchors.
    pub fn reset(&mut self) {
        self.shared = None;
        self.lanes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_always_releases() {
        let mut pacer = Pacer::new(RealTime::Off, 1.0);
        assert_eq!(pacer.check(LaneId(0), 10_000_000, 0), Pace::Release);
    }

    #[test]
    fn first_packet_anchors() {
        let mut pacer = Pacer::new(RealTime::On, 1.0);
        assert_eq!(pacer.check(LaneId(0), 5_000_000, 100), Pace::Release);
        assert_eq!(
            pacer.check(LaneId(0), 5_040_000, 100),
            Pace::Wait(Duration::from_millis(40))
        );
        assert_eq!(pacer.check(LaneId(0), 5_040_000, 40_100), Pace::Release);
    }

    #[test]
    fn speed_scales_wait() {
        let mut pacer = Pacer::new(RealTime::On, 2.0);
        pacer.check(LaneId(0), 0, 0);
        assert_eq!(
            pacer.check(LaneId(0), 1_000_000, 0),
            Pace::Wait(Duration::from_millis(500))
        );
    }

    #[test]
    fn negative_speed_uses_magnitude() {
        let mut pacer = Pacer::new(RealTime::On, -1.0);
        pacer.check(LaneId(0), 10_000_000, 0);
        assert_eq!(
            pacer.check(LaneId(0), 9_000_000, 0),
            Pace::Wait(Duration::from_secs(1))
        );
    }

    #[test]
    fn small_waits_use_granularity() {
        let mut pacer = Pacer::new(RealTime::On, 1.0);
        pacer.check(LaneId(0), 0, 0);
        assert_eq!(pacer.check(LaneId(0), 1_500, 0), Pace::Wait(GRANULARITY));
        assert_eq!(pacer.check(LaneId(0), 900, 0), Pace::Release);
    }

    #[test]
    fn per_lane_versus_shared_anchor() {
        let mut per_lane = Pacer::new(RealTime::On, 1.0);
        per_lane.check(LaneId(0), 0, 0);
        // Lane 1 anchors on its own first packet.
        assert_eq!(per_lane.check(LaneId(1), 3_000_000, 0), Pace::Release);

        let mut shared = Pacer::new(RealTime::Sync, 1.0);
        shared.check(LaneId(0), 0, 0);
        assert_eq!(
            shared.check(LaneId(1), 3_000_000, 0),
            Pace::Wait(Duration::from_secs(3))
        );
    }

    #[test]
    fn reset_reanchors() {
        let mut pacer = Pacer::new(RealTime::Sync, 1.0);
        pacer.check(LaneId(0), 0, 0);
        pacer.reset();
        assert_eq!(pacer.check(LaneId(0), 60_000_000, 0), Pace::Release);
    }
}
