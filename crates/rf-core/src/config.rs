//! Stage configuration.
//!
//! [`ReframerConfig`] carries every option of the reframing stage. All fields
//! default sensibly so an empty `{}` (or an empty TOML file) is a valid
//! pass-through configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::media::{SapType, StreamCategory};
use crate::Error;

// ---------------------------------------------------------------------------
// Option enums
// ---------------------------------------------------------------------------

/// Real-time pacing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealTime {
    /// Forward as fast as possible.
    #[default]
    Off,
    /// Pace every lane against its own wall-clock anchor.
    On,
    /// Pace all lanes against one shared anchor.
    Sync,
}

impl fmt::Display for RealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Which stream kinds the host should deliver decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForcedDecode {
    #[default]
    No,
    Av,
    A,
    V,
}

impl ForcedDecode {
    pub fn applies_to(&self, category: StreamCategory) -> bool {
        match self {
            Self::No => false,
            Self::Av => category.is_audio() || category == StreamCategory::Video,
            Self::A => category.is_audio(),
            Self::V => category == StreamCategory::Video,
        }
    }
}

/// Rounding applied to the start of an extracted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XRound {
    /// Start at the last sync point at or before the requested time.
    #[default]
    Before,
    /// Start exactly at the requested time; earlier packets are decode-only.
    Seek,
    /// Start at the first sync point at or after the requested time.
    After,
    /// Start at whichever sync point is nearer.
    Closest,
}

impl fmt::Display for XRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::Seek => write!(f, "seek"),
            Self::After => write!(f, "after"),
            Self::Closest => write!(f, "closest"),
        }
    }
}

/// Where UTC instants for UTC-referenced ranges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtcReference {
    /// Local wall clock at the time the first packet is seen.
    Local,
    /// Sender UTC when present, local clock once the probe expires.
    #[default]
    Any,
    /// Sender UTC only; the session aborts when the probe expires.
    Media,
}

// ---------------------------------------------------------------------------
// ReframerConfig
// ---------------------------------------------------------------------------

/// Options of the reframing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReframerConfig {
    pub rt: RealTime,
    /// Only forward packets with these SAP types (`0` admits non-sync
    /// packets). Empty admits everything.
    pub saps: Vec<SapType>,
    /// Only forward packets other packets depend on.
    pub refs: bool,
    pub speed: f64,
    pub raw: ForcedDecode,
    /// One-based frame indices to keep; empty keeps all.
    pub frames: Vec<u64>,
    /// Range start descriptors.
    pub xs: Vec<String>,
    /// Range end descriptors.
    pub xe: Vec<String>,
    pub xround: XRound,
    /// Snap range ends to the last video sync point before them.
    pub xadjust: bool,
    /// Keep original timestamps instead of rebasing.
    pub xots: bool,
    /// Cut exactly at the requested time, ignoring sync points.
    pub nosap: bool,
    /// Every range starts a new output file.
    pub splitrange: bool,
    /// Seconds to seek before a range start.
    pub seeksafe: f64,
    /// Rewrite timecode counters when splitting.
    pub tcmdrw: bool,
    /// Extra properties per range, `name=value[,name=value]`.
    pub props: Vec<String>,
    /// Never mark audio packets with a skip hint in seek mode.
    pub no_audio_seek: bool,
    /// Keep reference frames decoded before a range end.
    pub probe_ref: bool,
    pub utc_ref: UtcReference,
    /// Milliseconds to wait for a sender UTC reference.
    pub utc_probe: u64,
}

impl Default for ReframerConfig {
    fn default() -> Self {
        Self {
            rt: RealTime::Off,
            saps: Vec::new(),
            refs: false,
            speed: default_speed(),
            raw: ForcedDecode::No,
            frames: Vec::new(),
            xs: Vec::new(),
            xe: Vec::new(),
            xround: XRound::Before,
            xadjust: false,
            xots: false,
            nosap: false,
            splitrange: false,
            seeksafe: default_seeksafe(),
            tcmdrw: true,
            props: Vec::new(),
            no_audio_seek: false,
            probe_ref: false,
            utc_ref: UtcReference::Any,
            utc_probe: default_utc_probe(),
        }
    }
}

fn default_speed() -> f64 {
    1.0
}

fn default_seeksafe() -> f64 {
    10.0
}

fn default_utc_probe() -> u64 {
    5000
}

impl ReframerConfig {
    /// Deserialize from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Deserialize from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Parse file contents, picking the format from the file extension.
    pub fn from_file_contents(path: &Path, contents: &str) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(contents),
            _ => Self::from_json(contents),
        }
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_file_contents(path, &contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Whether any real-time pacing is requested.
    pub fn realtime(&self) -> bool {
        self.rt != RealTime::Off
    }

    /// Pacing speed with the unusable zero value replaced by normal speed.
    pub fn effective_speed(&self) -> f64 {
        if self.speed == 0.0 || !self.speed.is_finite() {
            1.0
        } else {
            self.speed
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.speed == 0.0 || !self.speed.is_finite() {
            warnings.push(format!("speed {} is unusable; pacing at normal speed", self.speed));
        }

        if self.seeksafe < 0.0 {
            warnings.push("seeksafe is negative; seeks will land on the range start".into());
        }

        if self.xs.is_empty() && !self.xe.is_empty() {
            warnings.push("xe is set without xs; ranges are ignored".into());
        }

        if self.xe.len() > self.xs.len() {
            warnings.push(format!(
                "{} end bounds for {} start bounds; extra ends are ignored",
                self.xe.len(),
                self.xs.len()
            ));
        }

        if self.xround == XRound::Seek && self.xs.len() > 1 {
            warnings.push("xround=seek only supports a single range".into());
        }

        if self.frames.contains(&0) {
            warnings.push("frames are one-based; index 0 never matches".into());
        }

        if self.frames.windows(2).any(|w| w[0] >= w[1]) {
            warnings.push("frames list is not strictly increasing".into());
        }

        if self.props.len() > self.xs.len() && !self.xs.is_empty() {
            warnings.push("more props entries than ranges; extra entries are ignored".into());
        }

        if self.rt != RealTime::Off && self.speed < 0.0 {
            warnings.push("negative speed paces on the absolute value".into());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_from_empty_json() {
        let cfg = ReframerConfig::from_json("{}").unwrap();
        assert_eq!(cfg, ReframerConfig::default());
        assert_eq!(cfg.speed, 1.0);
        assert_eq!(cfg.seeksafe, 10.0);
        assert!(cfg.tcmdrw);
        assert_eq!(cfg.utc_ref, UtcReference::Any);
        assert_eq!(cfg.utc_probe, 5000);
        assert!(!cfg.realtime());
    }

    #[test]
    fn parse_full_json() {
        let json = r#"{
            "rt": "sync",
            "saps": [1, 2],
            "speed": 2.0,
            "xs": ["T00:00:10", "30"],
            "xe": ["D5"],
            "xround": "closest",
            "utc_ref": "media",
            "raw": "av"
        }"#;
        let cfg = ReframerConfig::from_json(json).unwrap();
        assert_eq!(cfg.rt, RealTime::Sync);
        assert_eq!(cfg.saps, vec![SapType::Type1, SapType::Type2]);
        assert_eq!(cfg.xs.len(), 2);
        assert_eq!(cfg.xround, XRound::Closest);
        assert_eq!(cfg.utc_ref, UtcReference::Media);
        assert!(cfg.raw.applies_to(StreamCategory::Video));
        assert!(!cfg.raw.applies_to(StreamCategory::Text));
    }

    #[test]
    fn parse_toml() {
        let cfg = ReframerConfig::from_toml("rt = \"on\"\nxs = [\"D10\"]\nsplitrange = true\n")
            .unwrap();
        assert_eq!(cfg.rt, RealTime::On);
        assert_eq!(cfg.xs, vec!["D10".to_string()]);
        assert!(cfg.splitrange);
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = ReframerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_missing_file() {
        let cfg = ReframerConfig::load_or_default(Some(Path::new("/nonexistent/reframer.json")));
        assert_eq!(cfg, ReframerConfig::default());
        assert_eq!(ReframerConfig::load_or_default(None), ReframerConfig::default());
    }

    #[test]
    fn load_or_default_reads_toml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "speed = 4.0").unwrap();
        let cfg = ReframerConfig::load_or_default(Some(file.path()));
        assert_eq!(cfg.speed, 4.0);
    }

    #[test]
    fn effective_speed_replaces_zero() {
        let cfg = ReframerConfig {
            speed: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_speed(), 1.0);
    }

    #[test]
    fn validate_default_has_no_warnings() {
        assert!(ReframerConfig::default().validate().is_empty());
    }

    #[test]
    fn validate_reports_issues() {
        let cfg = ReframerConfig {
            speed: 0.0,
            xe: vec!["20".into()],
            frames: vec![3, 1],
            ..Default::default()
        };
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("speed")));
        assert!(warnings.iter().any(|w| w.contains("xe is set without xs")));
        assert!(warnings.iter().any(|w| w.contains("strictly increasing")));
    }

    #[test]
    fn validate_seek_with_several_ranges() {
        let cfg = ReframerConfig {
            xs: vec!["1".into(), "5".into()],
            xround: XRound::Seek,
            ..Default::default()
        };
        assert!(cfg.validate().iter().any(|w| w.contains("single range")));
    }
}
