mod cli;

use reframer::{runner, trace::Trace};
use rf_core::config::ReframerConfig;
use rf_extract::Plan;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, Overrides};
use std::io::Write;
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reframer=debug,rf_extract=debug,rf_core=debug".to_string()
        } else {
            "reframer=info,rf_extract=warn,rf_core=warn".to_string()
        }
    });

    // Logs go to stderr; stdout carries output records.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            trace,
            output,
            overrides,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_trace(
                &trace,
                output.as_deref(),
                cli.config.as_deref(),
                overrides,
            ))
        }
        Commands::Parse { xs, xe, json } => parse_ranges(cli.config.as_deref(), xs, xe, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reframer {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_trace(
    trace_path: &Path,
    output: Option<&Path>,
    config_path: Option<&Path>,
    overrides: Overrides,
) -> Result<()> {
    let mut config = ReframerConfig::load_or_default(config_path);
    overrides.apply(&mut config);

    if !trace_path.exists() {
        anyhow::bail!("Trace file does not exist: {:?}", trace_path);
    }
    let trace = Trace::load(trace_path)?;
    tracing::info!(
        "Replaying {} packets on {} lanes",
        trace.packet_count(),
        trace.lanes.len()
    );

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    let report = runner::run(config, trace, sink.as_mut()).await?;
    for lane in &report.lanes {
        tracing::info!(
            "Lane {}: {} packets in {} chunk(s){}",
            lane.lane,
            lane.packets,
            lane.chunks,
            if lane.ended { "" } else { ", not ended" }
        );
    }

    match report.failure {
        Some(err) => Err(err).context(format!(
            "stage failed after {} forwarded packets",
            report.records
        )),
        None => Ok(()),
    }
}

fn parse_ranges(
    config_path: Option<&Path>,
    xs: Vec<String>,
    xe: Vec<String>,
    json: bool,
) -> Result<()> {
    let mut config = ReframerConfig::load_or_default(config_path);
    if !xs.is_empty() {
        config.xs = xs;
        config.xe = xe;
    }
    let plan = rf_extract::plan(&config);

    if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
        return Ok(());
    }

    println!("Mode: {}", plan.mode);
    if let Some(ref err) = plan.parse_error {
        println!("Parse error: {err} (ranges disabled)");
    }
    if let Some(ref err) = plan.fatal {
        println!("Fatal: {err}");
    }
    for (i, range) in plan.ranges.iter().enumerate() {
        match range.end {
            Some(end) => println!("  [{}] {} -> {} ({})", i + 1, range.start, end, range.label),
            None => println!("  [{}] {} -> open ({})", i + 1, range.start, range.label),
        }
        for (name, value) in &range.props {
            println!("      {name} = {value}");
        }
    }
    for warning in &plan.warnings {
        println!("Warning: {warning}");
    }

    if let Some(err) = plan.fatal {
        return Err(err.into());
    }
    Ok(())
}

fn plan_json(plan: &Plan) -> serde_json::Value {
    serde_json::json!({
        "mode": plan.mode.to_string(),
        "ranges": plan.ranges.iter().map(|r| serde_json::json!({
            "start": r.start.to_string(),
            "end": r.end.map(|e| e.to_string()),
            "label": r.label,
            "props": r.props,
        })).collect::<Vec<_>>(),
        "warnings": plan.warnings,
        "parse_error": plan.parse_error.as_ref().map(|e| e.to_string()),
        "fatal": plan.fatal.as_ref().map(|e| e.to_string()),
    })
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("cannot read {}", p.display()))?;
            let config = ReframerConfig::from_file_contents(p, &contents)?;
            println!("✓ Configuration is valid");
            print_config(&config);
            for warning in config.validate() {
                println!("  Warning: {warning}");
            }
            let plan = rf_extract::plan(&config);
            if let Some(err) = plan.fatal {
                return Err(err.into());
            }
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&ReframerConfig::default());
        }
    }

    Ok(())
}

fn print_config(config: &ReframerConfig) {
    println!("  Real-time: {} (speed {})", config.rt, config.speed);
    println!("  Ranges: {} start(s), {} end(s)", config.xs.len(), config.xe.len());
    println!("  Start rounding: {}", config.xround);
    println!("  Seek safety: {}s", config.seeksafe);
}
