use clap::{Args, Parser, Subcommand, ValueEnum};
use rf_core::config::{RealTime, ReframerConfig, XRound};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reframer")]
#[command(author, version, about = "Packet reframing and time-range extraction")]
pub struct Cli {
    /// Path to config file (JSON or TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a packet trace through the stage and print forwarded packets
    Run {
        /// JSON packet trace
        #[arg(required = true)]
        trace: PathBuf,

        /// Write output records here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Parse range descriptors and show the resulting plan
    Parse {
        /// Range starts
        #[arg(long, value_delimiter = ',')]
        xs: Vec<String>,

        /// Range ends
        #[arg(long, value_delimiter = ',')]
        xe: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Stage options that override the config file.
#[derive(Args, Default)]
pub struct Overrides {
    /// Range starts
    #[arg(long, value_delimiter = ',')]
    pub xs: Vec<String>,

    /// Range ends
    #[arg(long, value_delimiter = ',')]
    pub xe: Vec<String>,

    /// Per-range properties (`name=value,...`), repeat once per range
    #[arg(long)]
    pub props: Vec<String>,

    /// Start rounding
    #[arg(long, value_enum)]
    pub xround: Option<RoundArg>,

    /// Real-time pacing
    #[arg(long, value_enum)]
    pub rt: Option<RtArg>,

    /// Pacing speed
    #[arg(long)]
    pub speed: Option<f64>,

    /// Snap range ends to the previous sync point
    #[arg(long)]
    pub xadjust: bool,

    /// Keep original timestamps
    #[arg(long)]
    pub xots: bool,

    /// Ignore sync points when locating starts
    #[arg(long)]
    pub nosap: bool,

    /// Restart timestamps for every range
    #[arg(long)]
    pub splitrange: bool,
}

impl Overrides {
    pub fn apply(self, cfg: &mut ReframerConfig) {
        if !self.xs.is_empty() {
            cfg.xs = self.xs;
            cfg.xe = self.xe;
        } else if !self.xe.is_empty() {
            cfg.xe = self.xe;
        }
        if !self.props.is_empty() {
            cfg.props = self.props;
        }
        if let Some(round) = self.xround {
            cfg.xround = round.into();
        }
        if let Some(rt) = self.rt {
            cfg.rt = rt.into();
        }
        if let Some(speed) = self.speed {
            cfg.speed = speed;
        }
        cfg.xadjust |= self.xadjust;
        cfg.xots |= self.xots;
        cfg.nosap |= self.nosap;
        cfg.splitrange |= self.splitrange;
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RoundArg {
    Before,
    Seek,
    After,
    Closest,
}

impl From<RoundArg> for XRound {
    fn from(arg: RoundArg) -> Self {
        match arg {
            RoundArg::Before => XRound::Before,
            RoundArg::Seek => XRound::Seek,
            RoundArg::After => XRound::After,
            RoundArg::Closest => XRound::Closest,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RtArg {
    Off,
    On,
    Sync,
}

impl From<RtArg> for RealTime {
    fn from(arg: RtArg) -> Self {
        match arg {
            RtArg::Off => RealTime::Off,
            RtArg::On => RealTime::On,
            RtArg::Sync => RealTime::Sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_ranges() {
        let mut cfg = ReframerConfig {
            xs: vec!["1".into()],
            xe: vec!["2".into()],
            ..Default::default()
        };
        Overrides {
            xs: vec!["5".into()],
            xround: Some(RoundArg::After),
            xots: true,
            ..Default::default()
        }
        .apply(&mut cfg);

        assert_eq!(cfg.xs, vec!["5".to_string()]);
        assert!(cfg.xe.is_empty());
        assert_eq!(cfg.xround, XRound::After);
        assert!(cfg.xots);
    }

    #[test]
    fn empty_overrides_keep_file_values() {
        let mut cfg = ReframerConfig {
            xs: vec!["1".into()],
            speed: 2.0,
            ..Default::default()
        };
        Overrides::default().apply(&mut cfg);
        assert_eq!(cfg.xs, vec!["1".to_string()]);
        assert_eq!(cfg.speed, 2.0);
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from([
            "reframer", "run", "trace.json", "--xs", "10,20", "--xe", "15,25", "--rt", "on",
        ]);
        let Commands::Run { trace, overrides, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(trace, PathBuf::from("trace.json"));
        assert_eq!(overrides.xs, vec!["10".to_string(), "20".to_string()]);
        assert!(matches!(overrides.rt, Some(RtArg::On)));
    }
}
