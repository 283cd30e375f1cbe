//! Mapping between media time and UTC for UTC-referenced ranges.
//!
//! A mapping is taken from the sender UTC carried by packets when present.
//! Depending on [`UtcReference`], the probe falls back to the local wall
//! clock (sampled when the first packet was seen) once the probe window
//! expires, or gives up.

use rf_core::config::UtcReference;
use std::time::Duration;

/// A media time known to correspond to a UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcAnchor {
    pub media_us: i64,
    pub utc_ms: i64,
}

impl UtcAnchor {
    /// UTC instant of a media time, extrapolated from the anchor.
    pub fn utc_at(&self, media_us: i64) -> i64 {
        self.utc_ms + (media_us - self.media_us).div_euclid(1000)
    }
}

/// State of the UTC probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtcStatus {
    Mapped(UtcAnchor),
    /// Ask again later; `None` means no packet has been seen yet.
    Deferred(Option<Duration>),
    TimedOut,
}

/// Collects UTC evidence from incoming packets.
#[derive(Debug)]
pub struct UtcProbe {
    reference: UtcReference,
    timeout: Duration,
    sender: Option<UtcAnchor>,
    local: Option<UtcAnchor>,
    first_seen_us: Option<u64>,
}

impl UtcProbe {
    pub fn new(reference: UtcReference, timeout_ms: u64) -> Self {
        Self {
            reference,
            timeout: Duration::from_millis(timeout_ms),
            sender: None,
            local: None,
            first_seen_us: None,
        }
    }

    /// Record a packet. `now_us` and `local_utc_ms` are read from the stage
    /// clock when the packet is taken.
    pub fn observe(
        &mut self,
        media_us: i64,
        packet_utc_ms: Option<u64>,
        now_us: u64,
        local_utc_ms: i64,
    ) {
        if self.first_seen_us.is_none() {
            self.first_seen_us = Some(now_us);
            self.local = Some(UtcAnchor {
                media_us,
                utc_ms: local_utc_ms,
            });
        }
        if let Some(utc_ms) = packet_utc_ms {
            if self.sender.is_none() {
                tracing::debug!("UTC reference found: {utc_ms} ms at media {media_us} us");
            }
            self.sender = Some(UtcAnchor {
                media_us,
                utc_ms: utc_ms as i64,
            });
        }
    }

    /// UTC instant of a packet. With the local reference it follows the
    /// wall clock; otherwise it is the packet's own sender UTC, else
    /// extrapolated from the last sender UTC seen. Sender clocks may jump, so
    /// every packet keeps the instant derived when it was taken.
    pub fn derive(&self, media_us: i64, packet_utc_ms: Option<u64>) -> Option<i64> {
        match self.reference {
            UtcReference::Local => self.local.map(|a| a.utc_at(media_us)),
            _ => packet_utc_ms
                .map(|utc| utc as i64)
                .or_else(|| self.sender.map(|a| a.utc_at(media_us))),
        }
    }

    /// The anchor used for packets that carry no derived instant.
    pub fn anchor(&self) -> Option<UtcAnchor> {
        match self.reference {
            UtcReference::Local => self.local,
            UtcReference::Media => self.sender,
            UtcReference::Any => self.sender.or(self.local),
        }
    }

    pub fn status(&self, now_us: u64) -> UtcStatus {
        if self.reference == UtcReference::Local {
            return match self.local {
                Some(anchor) => UtcStatus::Mapped(anchor),
                None => UtcStatus::Deferred(None),
            };
        }

        if let Some(anchor) = self.sender {
            return UtcStatus::Mapped(anchor);
        }

        let Some(first) = self.first_seen_us else {
            return UtcStatus::Deferred(None);
        };
        let waited = Duration::from_micros(now_us.saturating_sub(first));
        if waited < self.timeout {
            return UtcStatus::Deferred(Some(self.timeout - waited));
        }

        match (self.reference, self.local) {
            (UtcReference::Any, Some(anchor)) => {
                tracing::warn!(
                    "No sender UTC after {} ms; using the local clock",
                    self.timeout.as_millis()
                );
                UtcStatus::Mapped(anchor)
            }
            _ => UtcStatus::TimedOut,
        }
    }
}
