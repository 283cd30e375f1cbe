//! Turn the `xs` / `xe` / `props` options into an extraction mode and an
//! ordered list of ranges.

use chrono::{DateTime, Duration, Utc};
use rf_core::config::{ReframerConfig, XRound};
use rf_core::{Error, Rational};
use std::fmt;

use crate::descriptor::{self, ParseError, RangeBound};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the session cuts the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Forward everything (filters and pacing still apply).
    None,
    /// Explicit ranges from `xs` / `xe`.
    Range,
    /// Chunks of at least the given duration, cut on sync points.
    DurationSplit(Rational),
    /// Chunks close to the given byte size, cut on sync points.
    SizeSplit(u64),
    /// One chunk per sync point.
    SapSplit,
}

impl ExtractMode {
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            Self::DurationSplit(_) | Self::SizeSplit(_) | Self::SapSplit
        )
    }
}

impl fmt::Display for ExtractMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Range => write!(f, "range"),
            Self::DurationSplit(d) => write!(f, "duration split ({d}s)"),
            Self::SizeSplit(s) => write!(f, "size split ({s} bytes)"),
            Self::SapSplit => write!(f, "sap split"),
        }
    }
}

/// A position on the session timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePoint {
    Time(Rational),
    Frame(u64),
    Utc(DateTime<Utc>),
}

impl RangePoint {
    pub(crate) fn family(&self) -> &'static str {
        match self {
            Self::Time(_) => "time",
            Self::Frame(_) => "frame",
            Self::Utc(_) => "utc",
        }
    }

    /// Strict ordering between points of the same family.
    pub(crate) fn is_before(&self, other: &RangePoint) -> Option<bool> {
        match (self, other) {
            (Self::Time(a), Self::Time(b)) => Some(a < b),
            (Self::Frame(a), Self::Frame(b)) => Some(a < b),
            (Self::Utc(a), Self::Utc(b)) => Some(a < b),
            _ => None,
        }
    }
}

impl fmt::Display for RangePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(t) => write!(f, "{t}"),
            Self::Frame(n) => write!(f, "F{n}"),
            Self::Utc(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

/// One range to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub start: RangePoint,
    /// `None` leaves the range open.
    pub end: Option<RangePoint>,
    /// Filename-friendly label.
    pub label: String,
    pub props: Vec<(String, String)>,
}

/// Result of planning a session from its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub mode: ExtractMode,
    pub ranges: Vec<Range>,
    /// Non-fatal issues found while planning.
    pub warnings: Vec<String>,
    /// A descriptor failed to parse and extraction fell back to pass-through.
    pub parse_error: Option<ParseError>,
    /// The configuration cannot be run.
    pub fatal: Option<Error>,
}

impl Plan {
    fn pass_through() -> Self {
        Self {
            mode: ExtractMode::None,
            ranges: Vec::new(),
            warnings: Vec::new(),
            parse_error: None,
            fatal: None,
        }
    }

    fn degraded(err: ParseError, descriptor: &str) -> Self {
        tracing::error!("Invalid range descriptor '{descriptor}': {err}; forwarding without extraction");
        Self {
            parse_error: Some(err),
            ..Self::pass_through()
        }
    }

    fn failed(err: Error) -> Self {
        Self {
            fatal: Some(err),
            ..Self::pass_through()
        }
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Build the extraction plan for a configuration.
pub fn plan(cfg: &ReframerConfig) -> Plan {
    if cfg.xs.is_empty() {
        return Plan::pass_through();
    }

    let mut starts = Vec::with_capacity(cfg.xs.len());
    for raw in &cfg.xs {
        match descriptor::parse(raw) {
            Ok(bound) => starts.push(bound),
            Err(e) => return Plan::degraded(e, raw),
        }
    }

    let mut ends = Vec::with_capacity(cfg.xe.len());
    for raw in &cfg.xe {
        match descriptor::parse(raw) {
            Ok(bound) => ends.push(bound),
            Err(e) => return Plan::degraded(e, raw),
        }
    }

    if let Some(mode) = split_mode(&starts[0]) {
        return plan_split(mode, &starts, &ends);
    }

    match plan_ranges(cfg, &starts, &ends) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!("{err}");
            Plan::failed(err)
        }
    }
}

fn split_mode(first: &RangeBound) -> Option<ExtractMode> {
    match first {
        RangeBound::Duration(d) => Some(ExtractMode::DurationSplit(*d)),
        RangeBound::Size(s) => Some(ExtractMode::SizeSplit(*s)),
        RangeBound::Sap => Some(ExtractMode::SapSplit),
        _ => None,
    }
}

fn plan_split(mode: ExtractMode, starts: &[RangeBound], ends: &[RangeBound]) -> Plan {
    if let ExtractMode::DurationSplit(d) = mode {
        if d <= Rational::ZERO {
            return Plan::degraded(ParseError::Time(d.to_string()), "D0");
        }
    }

    let mut warnings = Vec::new();
    if starts.len() > 1 {
        warnings.push(format!("{mode}: extra start bounds are ignored"));
    }
    if !ends.is_empty() {
        warnings.push(format!("{mode}: end bounds are ignored"));
    }
    for w in &warnings {
        tracing::warn!("{w}");
    }

    Plan {
        mode,
        warnings,
        ..Plan::pass_through()
    }
}

fn plan_ranges(
    cfg: &ReframerConfig,
    starts: &[RangeBound],
    ends: &[RangeBound],
) -> Result<Plan, Error> {
    let mut warnings = Vec::new();

    let points = starts
        .iter()
        .map(|bound| match bound {
            RangeBound::Time(t) => Ok(RangePoint::Time(*t)),
            RangeBound::Frame(n) => Ok(RangePoint::Frame(*n)),
            RangeBound::Utc(at) => Ok(RangePoint::Utc(*at)),
            other => Err(Error::config(format!(
                "'{other}' is only valid as the first start bound"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let family = points[0].family();
    if let Some(mixed) = points.iter().find(|p| p.family() != family) {
        return Err(Error::config(format!(
            "cannot mix {family} and {} range bounds",
            mixed.family()
        )));
    }

    if cfg.xround == XRound::Seek && points.len() > 1 {
        return Err(Error::config("xround=seek supports a single range only"));
    }

    if ends.len() > points.len() {
        warnings.push(format!(
            "{} end bounds for {} ranges; extra ends are ignored",
            ends.len(),
            points.len()
        ));
    }

    let mut ranges = Vec::with_capacity(points.len());
    for (i, start) in points.iter().enumerate() {
        let end = match ends.get(i) {
            Some(bound) => Some(end_point(start, bound)?),
            None => points
                .get(i + 1)
                .filter(|next| start.is_before(next) == Some(true))
                .copied(),
        };

        let end = match end {
            Some(e) if start.is_before(&e) != Some(true) => {
                warnings.push(format!(
                    "range {i} ends at {e}, not after its start {start}; leaving it open"
                ));
                None
            }
            other => other,
        };

        let label = range_label(&cfg.xs[i], cfg.xe.get(i).map(String::as_str));
        let props = cfg
            .props
            .get(i)
            .map(|raw| parse_props(raw, &mut warnings))
            .unwrap_or_default();

        ranges.push(Range {
            start: *start,
            end,
            label,
            props,
        });
    }

    for w in &warnings {
        tracing::warn!("{w}");
    }

    Ok(Plan {
        mode: ExtractMode::Range,
        ranges,
        warnings,
        ..Plan::pass_through()
    })
}

fn end_point(start: &RangePoint, bound: &RangeBound) -> Result<RangePoint, Error> {
    let point = match (start, bound) {
        (_, RangeBound::Time(t)) => RangePoint::Time(*t),
        (_, RangeBound::Frame(n)) => RangePoint::Frame(*n),
        (_, RangeBound::Utc(at)) => RangePoint::Utc(*at),
        (RangePoint::Time(s), RangeBound::Duration(d)) => RangePoint::Time(*s + *d),
        (RangePoint::Utc(s), RangeBound::Duration(d)) => {
            RangePoint::Utc(*s + Duration::microseconds(d.to_micros()))
        }
        (RangePoint::Frame(_), RangeBound::Duration(_)) => {
            return Err(Error::config("a duration end cannot follow a frame start"))
        }
        (_, other) => {
            return Err(Error::config(format!("'{other}' is not a valid end bound")))
        }
    };

    if point.family() != start.family() {
        return Err(Error::config(format!(
            "cannot mix {} and {} range bounds",
            start.family(),
            point.family()
        )));
    }
    Ok(point)
}

/// Label used in chunk metadata, safe to embed in a filename.
fn range_label(start: &str, end: Option<&str>) -> String {
    let clean = |s: &str| s.trim().replace([':', '/'], "_");
    match end {
        Some(e) => format!("{}-{}", clean(start), clean(e)),
        None => clean(start),
    }
}

fn parse_props(raw: &str, warnings: &mut Vec<String>) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
            None => {
                warnings.push(format!("ignoring malformed property '{pair}'"));
                None
            }
        })
        .collect()
}
