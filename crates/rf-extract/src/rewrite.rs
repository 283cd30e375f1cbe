//! Output rewriting: partial-packet trimming, timestamp rebasing and the
//! timecode counter update.

use bytes::BytesMut;
use rf_core::{Error, LaneInfo, Packet, Result};

use crate::lane::PartialPolicy;

/// Ticks to remove from the front of a packet and, when the packet crosses
/// the range end, how many ticks from its start to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cut {
    pub discard: u64,
    pub keep: Option<u64>,
}

/// A rewritten packet and the part of it that lies past the range end, still
/// on the input timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub packet: Packet,
    pub remainder: Option<Packet>,
}

/// Apply `cut` according to the lane's partial policy, then move the packet
/// onto the output timeline by subtracting `shift` ticks.
pub fn rewrite(
    info: &LaneInfo,
    policy: PartialPolicy,
    packet: Packet,
    cut: Cut,
    shift: i64,
) -> Result<Rewritten> {
    let (mut packet, advanced) = trim_front(info, policy, packet, cut.discard)?;
    let remainder = match cut.keep {
        Some(keep) => trim_back(info, policy, &mut packet, keep.saturating_sub(advanced))?,
        None => None,
    };
    rebase(&mut packet, shift)?;
    Ok(Rewritten { packet, remainder })
}

/// Sample count and byte offset covering `ticks` of an interleaved payload.
fn payload_offset(info: &LaneInfo, ticks: u64, round_up: bool) -> (u64, usize) {
    let rate = if info.sample_rate == 0 {
        info.timescale as u128
    } else {
        info.sample_rate as u128
    };
    let ts = info.timescale.max(1) as u128;
    let scaled = ticks as u128 * rate;
    let samples = if round_up {
        scaled.div_ceil(ts)
    } else {
        scaled / ts
    };
    let aligned = (samples * ts / rate) as u64;
    (aligned, (samples * info.bytes_per_frame as u128) as usize)
}

fn trim_front(
    info: &LaneInfo,
    policy: PartialPolicy,
    mut packet: Packet,
    discard: u64,
) -> Result<(Packet, u64)> {
    if discard == 0 {
        return Ok((packet, 0));
    }

    let advance = match policy {
        PartialPolicy::Hint => {
            packet.skip_begin = u32::try_from(discard)
                .map_err(|_| Error::stage("trim", format!("skip of {discard} ticks")))?;
            packet.seek = true;
            return Ok((packet, 0));
        }
        PartialPolicy::Retime => discard,
        PartialPolicy::SplitPayload => {
            let (ticks, bytes) = payload_offset(info, discard, true);
            if bytes > packet.payload.len() {
                return Err(Error::stage(
                    "trim",
                    format!(
                        "start cut at byte {bytes} past a {} byte payload",
                        packet.payload.len()
                    ),
                ));
            }
            packet.payload = packet.payload.slice(bytes..);
            ticks
        }
    };

    let duration = (packet.duration as u64)
        .checked_sub(advance)
        .ok_or_else(|| Error::stage("trim", format!("cut of {advance} ticks exceeds duration")))?;
    packet.cts += advance;
    packet.dts += advance;
    packet.duration = duration as u32;
    Ok((packet, advance))
}

fn trim_back(
    info: &LaneInfo,
    policy: PartialPolicy,
    packet: &mut Packet,
    keep: u64,
) -> Result<Option<Packet>> {
    packet.split = true;
    if keep >= packet.duration as u64 {
        return Ok(None);
    }

    match policy {
        PartialPolicy::Hint => {
            packet.duration = keep as u32;
            Ok(None)
        }
        PartialPolicy::Retime => {
            let mut rest = packet.clone();
            rest.cts += keep;
            rest.dts += keep;
            rest.duration -= keep as u32;
            rest.split = false;
            packet.duration = keep as u32;
            Ok(Some(rest))
        }
        PartialPolicy::SplitPayload => {
            let (ticks, bytes) = payload_offset(info, keep, false);
            if bytes > packet.payload.len() {
                return Err(Error::stage(
                    "split",
                    format!(
                        "end cut at byte {bytes} past a {} byte payload",
                        packet.payload.len()
                    ),
                ));
            }
            let mut rest = packet.clone();
            rest.payload = packet.payload.slice(bytes..);
            rest.cts += ticks;
            rest.dts += ticks;
            rest.duration -= ticks as u32;
            rest.split = false;
            packet.payload = packet.payload.slice(..bytes);
            packet.duration = ticks as u32;
            Ok(Some(rest))
        }
    }
}

/// Subtract `shift` from both timestamps. A negative presentation time is
/// clamped to zero; decode-only packets are expected to go negative.
fn rebase(packet: &mut Packet, shift: i64) -> Result<()> {
    let shifted = |ts: u64| {
        (ts as i64)
            .checked_sub(shift)
            .ok_or_else(|| Error::stage("rebase", format!("{ts} - {shift} overflows")))
    };

    let cts = shifted(packet.cts)?;
    let dts = shifted(packet.dts)?;
    if cts < 0 && !packet.seek {
        tracing::warn!("Output timestamp {cts} is negative; clamping to 0");
    }
    packet.cts = cts.max(0) as u64;
    packet.dts = dts.max(0) as u64;
    Ok(())
}

/// Add `frames` to the 4-byte big-endian frame counter at the head of a
/// timecode packet.
pub fn advance_timecode(packet: &mut Packet, frames: u64) -> Result<()> {
    if frames == 0 {
        return Ok(());
    }
    let Some(head) = packet.payload.get(..4) else {
        tracing::warn!(
            "Timecode packet of {} bytes has no frame counter",
            packet.payload.len()
        );
        return Ok(());
    };

    let counter = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let updated = u32::try_from(counter as u64 + frames)
        .map_err(|_| Error::stage("timecode", format!("counter {counter} + {frames} overflows")))?;

    let mut buf = BytesMut::from(&packet.payload[..]);
    buf[..4].copy_from_slice(&updated.to_be_bytes());
    packet.payload = buf.freeze();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm() -> LaneInfo {
        LaneInfo::uncompressed_audio(48000, 4)
    }

    #[test]
    fn split_payload_front() {
        let pkt = Packet::new(1000, 1024, vec![0u8; 4096]);
        let out = rewrite(
            &pcm(),
            PartialPolicy::SplitPayload,
            pkt,
            Cut {
                discard: 24,
                keep: None,
            },
            1024,
        )
        .unwrap();
        assert_eq!(out.packet.cts, 0);
        assert_eq!(out.packet.duration, 1000);
        assert_eq!(out.packet.payload.len(), 4000);
        assert_eq!(out.packet.skip_begin, 0);
        assert!(!out.packet.seek);
        assert!(out.remainder.is_none());
    }

    #[test]
    fn split_payload_back_requeues_rest() {
        let pkt = Packet::new(23552, 1024, vec![7u8; 4096]);
        let out = rewrite(
            &pcm(),
            PartialPolicy::SplitPayload,
            pkt,
            Cut {
                discard: 0,
                keep: Some(448),
            },
            0,
        )
        .unwrap();
        assert_eq!(out.packet.duration, 448);
        assert_eq!(out.packet.payload.len(), 1792);
        assert!(out.packet.split);

        let rest = out.remainder.unwrap();
        assert_eq!(rest.cts, 24000);
        assert_eq!(rest.duration, 576);
        assert_eq!(rest.payload.len(), 2304);
        assert!(!rest.split);
    }

    #[test]
    fn hint_policy_sets_skip_and_clips() {
        let info = LaneInfo::compressed_audio(48000);
        let pkt = Packet::new(100, 1024, vec![0u8; 300]);
        let out = rewrite(
            &info,
            PartialPolicy::Hint,
            pkt,
            Cut {
                discard: 20,
                keep: Some(500),
            },
            100,
        )
        .unwrap();
        assert_eq!(out.packet.skip_begin, 20);
        assert!(out.packet.seek, "a partly shown packet is a seek point");
        assert_eq!(out.packet.duration, 500);
        assert_eq!(out.packet.payload.len(), 300);
        assert!(out.packet.split);
        assert!(out.remainder.is_none());
    }

    #[test]
    fn retime_keeps_payload_whole() {
        let info = LaneInfo::text(1000);
        let pkt = Packet::new(500, 2000, &b"hello"[..]);
        let out = rewrite(
            &info,
            PartialPolicy::Retime,
            pkt,
            Cut {
                discard: 500,
                keep: Some(1000),
            },
            1000,
        )
        .unwrap();
        assert_eq!(out.packet.cts, 0);
        assert_eq!(out.packet.duration, 500);
        let rest = out.remainder.unwrap();
        assert_eq!(rest.cts, 1500);
        assert_eq!(rest.duration, 1000);
        assert_eq!(&rest.payload[..], b"hello");
    }

    #[test]
    fn negative_timestamps_clamp_to_zero() {
        let info = LaneInfo::video(25);
        let pkt = Packet::new(5, 1, vec![]).with_dts(3);
        let out = rewrite(&info, PartialPolicy::Hint, pkt, Cut::default(), 10).unwrap();
        assert_eq!(out.packet.cts, 0);
        assert_eq!(out.packet.dts, 0);
    }

    #[test]
    fn oversized_cut_is_an_error() {
        let pkt = Packet::new(0, 1024, vec![0u8; 16]);
        let err = rewrite(
            &pcm(),
            PartialPolicy::SplitPayload,
            pkt,
            Cut {
                discard: 512,
                keep: None,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Stage { .. }));
    }

    #[test]
    fn timecode_counter_advances() {
        let mut pkt = Packet::new(0, 1, vec![0, 0, 1, 0, 0xAA]);
        advance_timecode(&mut pkt, 250).unwrap();
        assert_eq!(&pkt.payload[..], &[0, 0, 1, 250, 0xAA]);

        let mut short = Packet::new(0, 1, vec![1, 2]);
        advance_timecode(&mut short, 10).unwrap();
        assert_eq!(&short.payload[..], &[1, 2]);

        let mut full = Packet::new(0, 1, vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(advance_timecode(&mut full, 1).is_err());
    }
}
