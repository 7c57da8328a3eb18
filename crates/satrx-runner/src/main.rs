//! # satrx
//!
//! CLI runner for satrx receive-path simulations.

use satrx_runner::metrics_export;
use satrx_runner::{EventLoop, ProgressInfo, RunnerError, SimTime, SimulationStats};

use clap::{Parser, Subcommand, ValueEnum};
use satrx_model::{build_simulation, load_model};
use satrx_phy::metric_defs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string with units into seconds.
///
/// Accepts a plain number of seconds or unit suffixes `s`, `m`, `h`, `d`,
/// possibly combined (`1h30m`).
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }

    let mut total_seconds: f64 = 0.0;
    let mut current_number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            current_number.push(c);
            continue;
        }
        if current_number.is_empty() {
            return Err(format!("Invalid duration format: unexpected '{}' in '{}'", c, s));
        }
        let value: f64 = current_number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", current_number, s))?;
        let multiplier = match c {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            'd' => 86400.0,
            _ => return Err(format!("Unknown duration unit '{}' in '{}'. Use s, m, h, or d.", c, s)),
        };
        total_seconds += value * multiplier;
        current_number.clear();
    }
    if !current_number.is_empty() {
        let value: f64 = current_number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", current_number, s))?;
        total_seconds += value;
    }
    if total_seconds == 0.0 {
        return Err(format!("Invalid duration format: '{}'", s));
    }
    Ok(total_seconds)
}

/// Format a wall-clock duration as fixed-width "1h23m45s".
fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    format!(
        "{:2}h{:02}m{:02}s",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// Output format for metrics at end of simulation.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// satrx - satellite receive-path simulator
#[derive(Parser, Debug)]
#[command(name = "satrx")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation from a YAML scenario file
    Run(RunnerConfig),
    /// List all available metrics with descriptions
    Metrics,
}

/// Configuration for running a simulation
#[derive(Parser, Debug)]
pub struct RunnerConfig {
    /// Path to the YAML scenario file.
    pub model: PathBuf,

    /// Simulation duration; overrides the scenario.
    /// Accepts plain seconds or units: 60, 60s, 10m, 2h, 1d, 1h30m
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Random seed; overrides the scenario (default: random)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output trace file path (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verify carrier invariants after every event
    #[arg(long)]
    pub check_invariants: bool,

    /// Print progress and a per-carrier summary to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format for metrics at end of simulation.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,

    /// File path to write metrics (stdout if not specified).
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

// ============================================================================
// Simulation Runner
// ============================================================================

fn run_simulation(config: RunnerConfig) -> Result<SimulationStats, RunnerError> {
    let model = load_model(&config.model)?;

    let seed = config.seed.or(model.seed()).unwrap_or_else(rand::random);
    let duration = match config.duration {
        Some(secs) => SimTime::from_secs(secs),
        None => model.duration().ok_or_else(|| {
            RunnerError::ConfigError("no duration given on the command line or in the scenario".into())
        })?,
    };
    if duration == SimTime::ZERO {
        return Err(RunnerError::ConfigError("duration must be positive".into()));
    }

    let metrics_recorder = if config.metrics_output.is_some() {
        let recorder = metrics_export::InMemoryRecorder::new();
        if let Err(e) = metrics::set_global_recorder(recorder.clone()) {
            eprintln!("Warning: Failed to set metrics recorder: {}", e);
            None
        } else {
            metric_defs::describe_metrics();
            Some(recorder)
        }
    } else {
        None
    };

    let simulation = build_simulation(&model)?;
    info!(
        "Running {} for {} with seed {}",
        config.model.display(),
        duration,
        seed
    );

    let trace_output: Option<Box<dyn Write>> = match &config.output {
        Some(path) => Some(Box::new(std::io::BufWriter::new(std::fs::File::create(path)?))),
        None => None,
    };
    let mut event_loop = EventLoop::new(simulation, seed, trace_output);
    event_loop.set_check_invariants(config.check_invariants);

    let verbose = config.verbose;
    let stats = event_loop.run_with_progress(duration, |progress: &ProgressInfo, is_final| {
        if verbose && !is_final {
            eprintln!(
                "[{}] {:5.1}%  sim {}  events {}",
                format_duration(progress.wall_elapsed),
                progress.progress_percent,
                progress.sim_time,
                progress.events_processed
            );
        }
    })?;

    if verbose {
        print_summary_table(&stats);
        if let Some(ref path) = config.output {
            eprintln!("Trace written to: {}", path.display());
        }
    }

    if let (Some(format), Some(recorder)) = (config.metrics_output, metrics_recorder) {
        let mut writer: Box<dyn Write> = match &config.metrics_file {
            Some(path) => Box::new(std::fs::File::create(path)?),
            None => Box::new(std::io::stdout()),
        };
        let snapshot = recorder.snapshot();
        match format {
            MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut writer)?,
            MetricsOutputFormat::Prometheus => metrics_export::export_prometheus(&snapshot, &mut writer)?,
        }
    }

    Ok(stats)
}

fn print_summary_table(stats: &SimulationStats) {
    eprintln!();
    eprintln!(
        "{:<16} {:>9} {:>9} {:>11} {:>9} {:>9} {:>9} {:>7}",
        "Carrier", "Arrivals", "OK", "Bytes", "Low SNR", "ChanErr", "Collision", "Clears"
    );
    eprintln!("{}", "-".repeat(86));
    for (name, c) in &stats.carriers {
        eprintln!(
            "{:<16} {:>9} {:>9} {:>11} {:>9} {:>9} {:>9} {:>7}",
            name,
            c.arrivals,
            c.delivered,
            c.delivered_bytes,
            c.snr_below_threshold,
            c.channel_error,
            c.collision,
            c.clears
        );
    }
    eprintln!();
}

/// Print information about all available metrics
fn print_metrics_info() {
    println!("satrx Available Metrics");
    println!("=======================\n");
    println!("All metrics carry a `carrier` label.\n");
    for def in metric_defs::ALL {
        let kind = match def.kind {
            metric_defs::MetricKind::Counter => "counter",
            metric_defs::MetricKind::Gauge => "gauge",
            metric_defs::MetricKind::Histogram => "histogram",
        };
        println!("  {:<36} {:<10} {}", def.name, kind, def.description);
    }
}

fn main() -> Result<(), RunnerError> {
    // Default to "warn" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(config) => {
            let metrics_to_stdout = config.metrics_output.is_some() && config.metrics_file.is_none();
            let stats = run_simulation(config)?;
            if !metrics_to_stdout {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Commands::Metrics => print_metrics_info(),
    }
    Ok(())
}
