//! Media-domain value types: rational time, SAP types, stream categories and
//! the static description of an input lane.
//!
//! Enums serialize in snake_case and implement `Display` manually for a
//! consistent string representation in logs.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

// ---------------------------------------------------------------------------
// Rational
// ---------------------------------------------------------------------------

/// An exact time value in seconds, stored as a reduced fraction.
///
/// Lanes run on independent timescales, so boundaries shared between lanes
/// are kept as rationals and only converted to ticks when compared against a
/// specific lane.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rational {
    num: i64,
    den: u64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Build `num / den`. A zero denominator is treated as one.
    pub fn new(num: i64, den: u64) -> Self {
        reduce(num as i128, den.max(1) as i128)
    }

    /// Whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        Self { num: secs, den: 1 }
    }

    /// Milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        Self::new(ms, 1000)
    }

    /// Microsecond precision approximation of a floating-point second count.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new((secs * 1_000_000.0).round() as i64, 1_000_000)
    }

    /// A tick count expressed in `timescale` ticks per second.
    pub fn from_ticks(ticks: i64, timescale: u32) -> Self {
        Self::new(ticks, timescale.max(1) as u64)
    }

    pub fn numer(&self) -> i64 {
        self.num
    }

    pub fn denom(&self) -> u64 {
        self.den
    }

    /// Convert to ticks of `timescale`, rounding toward negative infinity.
    pub fn to_ticks(&self, timescale: u32) -> i64 {
        let scaled = self.num as i128 * timescale.max(1) as i128;
        clamp_i64(scaled.div_euclid(self.den as i128))
    }

    /// Convert to ticks of `timescale`, rounding toward positive infinity.
    /// Exclusive bounds use this so a tick that starts before the bound
    /// stays inside it.
    pub fn to_ticks_ceil(&self, timescale: u32) -> i64 {
        let scaled = self.num as i128 * timescale.max(1) as i128;
        clamp_i64(-(-scaled).div_euclid(self.den as i128))
    }

    /// Convert to whole microseconds, rounding toward negative infinity.
    pub fn to_micros(&self) -> i64 {
        self.to_ticks(1_000_000)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn reduce(num: i128, den: i128) -> Rational {
    let g = gcd(num, den).max(1);
    let (mut num, mut den) = (num / g, den / g);
    // Keep the value representable; precision loss only happens far outside
    // any realistic media timeline.
    while num > i64::MAX as i128 || num < i64::MIN as i128 || den > u64::MAX as i128 {
        num /= 2;
        den = (den / 2).max(1);
    }
    Rational {
        num: num as i64,
        den: den as u64,
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        let den = self.den as i128 * rhs.den as i128;
        let num = self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128;
        reduce(num, den)
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Rational {
        let den = self.den as i128 * rhs.den as i128;
        let num = self.num as i128 * rhs.den as i128 - rhs.num as i128 * self.den as i128;
        reduce(num, den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

// ---------------------------------------------------------------------------
// SapType
// ---------------------------------------------------------------------------

/// Stream access point type carried by a packet. `None` marks a packet that
/// cannot start decoding on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SapType {
    #[default]
    None,
    Type1,
    Type2,
    Type3,
    Type4,
}

impl SapType {
    /// Whether decoding may start at this packet.
    pub fn is_sync(&self) -> bool {
        !matches!(self, SapType::None)
    }
}

impl From<SapType> for u8 {
    fn from(sap: SapType) -> u8 {
        match sap {
            SapType::None => 0,
            SapType::Type1 => 1,
            SapType::Type2 => 2,
            SapType::Type3 => 3,
            SapType::Type4 => 4,
        }
    }
}

impl TryFrom<u8> for SapType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SapType::None),
            1 => Ok(SapType::Type1),
            2 => Ok(SapType::Type2),
            3 => Ok(SapType::Type3),
            4 => Ok(SapType::Type4),
            other => Err(format!("invalid SAP type {other}")),
        }
    }
}

impl fmt::Display for SapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            other => write!(f, "sap{}", u8::from(*other)),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamCategory
// ---------------------------------------------------------------------------

/// Broad kind of elementary stream carried by a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCategory {
    Video,
    CompressedAudio,
    UncompressedAudio,
    Text,
    #[default]
    Generic,
}

impl StreamCategory {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::CompressedAudio | Self::UncompressedAudio)
    }

    /// Sparse lanes may go a long time without a packet.
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Text | Self::Generic)
    }
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::CompressedAudio => write!(f, "compressed_audio"),
            Self::UncompressedAudio => write!(f, "uncompressed_audio"),
            Self::Text => write!(f, "text"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

// ---------------------------------------------------------------------------
// LaneId
// ---------------------------------------------------------------------------

/// Identifier of an input lane and of the output lane it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneId(pub usize);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LaneInfo
// ---------------------------------------------------------------------------

/// Static properties of a lane, provided by the host when the lane attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneInfo {
    pub name: String,
    pub category: StreamCategory,
    /// Ticks per second of packet timestamps.
    pub timescale: u32,
    /// Offset added to composition timestamps to get presentation time.
    pub delay: i64,
    /// Every packet is a sync point (intra-only video, most audio).
    pub all_sap: bool,
    /// Audio sample rate, zero when not applicable.
    pub sample_rate: u32,
    /// Bytes per sample frame (all channels) of uncompressed audio.
    pub bytes_per_frame: u32,
    /// Packets carry a 4-byte big-endian frame counter.
    pub timecode: bool,
}

impl Default for LaneInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            category: StreamCategory::Generic,
            timescale: 1000,
            delay: 0,
            all_sap: true,
            sample_rate: 0,
            bytes_per_frame: 0,
            timecode: false,
        }
    }
}

impl LaneInfo {
    pub fn video(timescale: u32) -> Self {
        Self {
            name: "video".into(),
            category: StreamCategory::Video,
            timescale,
            all_sap: false,
            ..Self::default()
        }
    }

    pub fn compressed_audio(sample_rate: u32) -> Self {
        Self {
            name: "audio".into(),
            category: StreamCategory::CompressedAudio,
            timescale: sample_rate,
            sample_rate,
            ..Self::default()
        }
    }

    pub fn uncompressed_audio(sample_rate: u32, bytes_per_frame: u32) -> Self {
        Self {
            name: "pcm".into(),
            category: StreamCategory::UncompressedAudio,
            timescale: sample_rate,
            sample_rate,
            bytes_per_frame,
            ..Self::default()
        }
    }

    pub fn text(timescale: u32) -> Self {
        Self {
            name: "text".into(),
            category: StreamCategory::Text,
            timescale,
            ..Self::default()
        }
    }

    pub fn generic(timescale: u32) -> Self {
        Self {
            name: "data".into(),
            timescale,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_delay(mut self, delay: i64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timecode(mut self) -> Self {
        self.timecode = true;
        self
    }

    pub fn intra_only(mut self) -> Self {
        self.all_sap = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_reduces_and_compares() {
        let half = Rational::new(2, 4);
        assert_eq!(half.numer(), 1);
        assert_eq!(half.denom(), 2);
        assert_eq!(half, Rational::from_millis(500));
        assert!(Rational::new(1, 3) < half);
        assert_eq!(half.to_string(), "1/2");
        assert_eq!(Rational::from_secs(10).to_string(), "10");
    }

    #[test]
    fn rational_zero_denominator_is_one() {
        assert_eq!(Rational::new(7, 0), Rational::from_secs(7));
    }

    #[test]
    fn rational_ticks_floor() {
        let t = Rational::new(10, 3);
        assert_eq!(t.to_ticks(1000), 3333);
        assert_eq!(Rational::new(-1, 3).to_ticks(1000), -334);
        assert_eq!(Rational::from_ticks(250, 25), Rational::from_secs(10));
        assert_eq!(Rational::from_secs(2).to_micros(), 2_000_000);
    }

    #[test]
    fn rational_ticks_ceil() {
        // 5.1 s at 25 Hz is 127.5 ticks.
        let t = Rational::new(51, 10);
        assert_eq!(t.to_ticks(25), 127);
        assert_eq!(t.to_ticks_ceil(25), 128);
        assert_eq!(Rational::from_secs(5).to_ticks_ceil(25), 125);
        assert_eq!(Rational::new(-1, 3).to_ticks_ceil(1000), -333);
    }

    #[test]
    fn rational_arithmetic() {
        let a = Rational::new(1, 25);
        let b = Rational::new(1, 48000);
        let sum = a + b;
        assert_eq!(sum, Rational::new(1921, 48000));
        assert_eq!(sum - b, a);
        assert!(Rational::from_secs(3) - Rational::from_secs(5) < Rational::ZERO);
    }

    #[test]
    fn rational_from_f64() {
        assert_eq!(Rational::from_secs_f64(10.0), Rational::from_secs(10));
        assert_eq!(Rational::from_secs_f64(0.25), Rational::new(1, 4));
    }

    #[test]
    fn sap_type_serde_as_number() {
        let json = serde_json::to_string(&SapType::Type1).unwrap();
        assert_eq!(json, "1");
        let back: SapType = serde_json::from_str("3").unwrap();
        assert_eq!(back, SapType::Type3);
        assert!(serde_json::from_str::<SapType>("9").is_err());
        assert!(!SapType::None.is_sync());
        assert_eq!(SapType::Type2.to_string(), "sap2");
    }

    #[test]
    fn category_display_and_serde() {
        assert_eq!(StreamCategory::UncompressedAudio.to_string(), "uncompressed_audio");
        let back: StreamCategory = serde_json::from_str(r#""compressed_audio""#).unwrap();
        assert_eq!(back, StreamCategory::CompressedAudio);
        assert!(StreamCategory::Text.is_sparse());
        assert!(!StreamCategory::Video.is_sparse());
    }

    #[test]
    fn lane_info_constructors() {
        let v = LaneInfo::video(25);
        assert_eq!(v.category, StreamCategory::Video);
        assert!(!v.all_sap);
        let pcm = LaneInfo::uncompressed_audio(48000, 4);
        assert_eq!(pcm.timescale, 48000);
        assert!(pcm.all_sap);
        let parsed: LaneInfo = serde_json::from_str(r#"{"category":"text"}"#).unwrap();
        assert_eq!(parsed.timescale, 1000);
    }
}
