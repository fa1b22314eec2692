//! Focus CLI - Command-line interface for Focus Flux
//!
//! Commands:
//! - replay: Replay recorded frames as one session and emit its aggregate
//! - validate: Check session aggregates against the storage contract
//! - config: Print the default configuration or check a configuration file

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use focus_flux::adapter::ObservationFrame;
use focus_flux::pipeline::{parse_frames, parse_records, FocusProcessor, TickOutcome};
use focus_flux::store::validate_aggregate;
use focus_flux::types::SessionAggregate;
use focus_flux::{EngagementConfig, FocusError, AGGREGATE_SCHEMA_VERSION, FLUX_VERSION};

/// Focus - on-device engagement monitoring engine
#[derive(Parser)]
#[command(name = "focus")]
#[command(version = FLUX_VERSION)]
#[command(about = "Classify attention frames into engagement sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded frames (NDJSON or JSON array) as one session
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Owner of the replayed session
        #[arg(long, default_value = "local")]
        user_id: String,

        /// Engagement configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format (defaults to json-pretty on a terminal, ndjson otherwise)
        #[arg(long)]
        output_format: Option<OutputFormat>,

        /// Also emit the per-tick outcomes
        #[arg(long)]
        ticks: bool,

        /// Input holds raw detector observations; flags are derived with the
        /// configured thresholds
        #[arg(long)]
        observations: bool,
    },

    /// Validate session aggregates against the storage contract
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check (use - for stdin)
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one tick per line, aggregate last)
    Ndjson,
    /// Compact JSON document
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FocusCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            user_id,
            config,
            output_format,
            ticks,
            observations,
        } => cmd_replay(
            &input,
            &output,
            &user_id,
            config.as_deref(),
            output_format,
            ReplayOptions {
                ticks,
                observations,
            },
        ),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Config { check } => cmd_config(check.as_deref()),
    }
}

fn read_input(path: &Path) -> Result<String, FocusCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngagementConfig, FocusCliError> {
    match path {
        Some(path) => Ok(EngagementConfig::from_json(&read_input(path)?)?),
        None => Ok(EngagementConfig::default()),
    }
}

struct ReplayOptions {
    ticks: bool,
    observations: bool,
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    user_id: &str,
    config: Option<&Path>,
    output_format: Option<OutputFormat>,
    options: ReplayOptions,
) -> Result<(), FocusCliError> {
    let config = load_config(config)?;
    let input_data = read_input(input)?;

    let mut processor = FocusProcessor::with_config(config)?;
    processor.start_session(user_id)?;

    let outcomes = if options.observations {
        let frames: Vec<ObservationFrame> = parse_records(&input_data)?;
        replay_ticks(&frames, |f| f.timestamp_ms, |f| processor.tick_observations(f))?
    } else {
        let frames = parse_frames(&input_data)?;
        replay_ticks(&frames, |f| f.timestamp_ms, |f| {
            processor.tick(&f.sample, f.timestamp_ms)
        })?
    };

    let summary = processor.stop_session()?;
    let aggregate = processor.encoder().encode(&summary);
    info!(
        "replayed {} frames into session {}",
        outcomes.len(),
        aggregate.record.session_id
    );

    let to_stdout = output.to_string_lossy() == "-";
    let format = output_format.unwrap_or(if to_stdout && atty::is(atty::Stream::Stdout) {
        OutputFormat::JsonPretty
    } else {
        OutputFormat::Ndjson
    });

    let ticks = options.ticks.then_some(outcomes.as_slice());
    let output_data = format_replay(&aggregate, ticks, format)?;

    if to_stdout {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn replay_ticks<T>(
    frames: &[T],
    timestamp: impl Fn(&T) -> u64,
    mut tick: impl FnMut(&T) -> Result<TickOutcome, FocusError>,
) -> Result<Vec<TickOutcome>, FocusCliError> {
    if frames.is_empty() {
        return Err(FocusCliError::NoFrames);
    }

    let mut outcomes = Vec::with_capacity(frames.len());
    let mut last_ts = None;
    for frame in frames {
        let ts = timestamp(frame);
        if last_ts.is_some_and(|last| ts < last) {
            warn!("frame timestamp {ts}ms goes backwards");
        }
        last_ts = Some(ts);
        outcomes.push(tick(frame)?);
    }
    Ok(outcomes)
}

fn format_replay(
    aggregate: &SessionAggregate,
    ticks: Option<&[TickOutcome]>,
    format: OutputFormat,
) -> Result<String, FocusCliError> {
    #[derive(serde::Serialize)]
    struct ReplayDocument<'a> {
        ticks: &'a [TickOutcome],
        aggregate: &'a SessionAggregate,
    }

    let output = match (format, ticks) {
        (OutputFormat::Ndjson, ticks) => {
            let mut lines = Vec::new();
            for outcome in ticks.unwrap_or_default() {
                lines.push(serde_json::to_string(outcome)?);
            }
            lines.push(serde_json::to_string(aggregate)?);
            lines.join("\n") + "\n"
        }
        (OutputFormat::Json, None) => serde_json::to_string(aggregate)? + "\n",
        (OutputFormat::JsonPretty, None) => serde_json::to_string_pretty(aggregate)? + "\n",
        (OutputFormat::Json, Some(ticks)) => {
            serde_json::to_string(&ReplayDocument { ticks, aggregate })? + "\n"
        }
        (OutputFormat::JsonPretty, Some(ticks)) => {
            serde_json::to_string_pretty(&ReplayDocument { ticks, aggregate })? + "\n"
        }
    };
    Ok(output)
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), FocusCliError> {
    let input_data = read_input(input)?;

    // Accepts one aggregate, a stream of them, or a JSON array
    let aggregates: Vec<SessionAggregate> = if input_data.trim_start().starts_with('[') {
        serde_json::from_str(&input_data)?
    } else {
        serde_json::Deserializer::from_str(&input_data)
            .into_iter::<SessionAggregate>()
            .collect::<Result<_, _>>()?
    };

    if aggregates.is_empty() {
        return Err(FocusCliError::NoFrames);
    }

    let errors: Vec<ValidationErrorDetail> = aggregates
        .iter()
        .enumerate()
        .filter_map(|(index, aggregate)| {
            validate_aggregate(aggregate).err().map(|e| ValidationErrorDetail {
                index,
                session_id: aggregate.record.session_id.clone(),
                error: e.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        schema_version: AGGREGATE_SCHEMA_VERSION.to_string(),
        total_aggregates: aggregates.len(),
        valid_aggregates: aggregates.len() - errors.len(),
        invalid_aggregates: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report ({})", report.schema_version);
        println!("=================");
        println!("Total aggregates:   {}", report.total_aggregates);
        println!("Valid aggregates:   {}", report.valid_aggregates);
        println!("Invalid aggregates: {}", report.invalid_aggregates);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Session {} (index {}): {}",
                    err.session_id, err.index, err.error
                );
            }
        }
    }

    if report.invalid_aggregates > 0 {
        Err(FocusCliError::ValidationFailed(report.invalid_aggregates))
    } else {
        Ok(())
    }
}

fn cmd_config(check: Option<&Path>) -> Result<(), FocusCliError> {
    let config = load_config(check)?;
    if check.is_some() {
        info!("configuration is valid");
    }
    println!("{}", config.to_json()?);
    Ok(())
}

#[derive(Debug)]
enum FocusCliError {
    Io(io::Error),
    Focus(FocusError),
    Json(serde_json::Error),
    NoFrames,
    ValidationFailed(usize),
}

impl From<io::Error> for FocusCliError {
    fn from(e: io::Error) -> Self {
        FocusCliError::Io(e)
    }
}

impl From<FocusError> for FocusCliError {
    fn from(e: FocusError) -> Self {
        FocusCliError::Focus(e)
    }
}

impl From<serde_json::Error> for FocusCliError {
    fn from(e: serde_json::Error) -> Self {
        FocusCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FocusCliError> for CliError {
    fn from(e: FocusCliError) -> Self {
        match e {
            FocusCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FocusCliError::Focus(e @ FocusError::InvalidConfig(_)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: e.to_string(),
                hint: Some("Run 'focus config' to see the defaults".to_string()),
            },
            FocusCliError::Focus(e @ (FocusError::ParseError(_) | FocusError::JsonError(_))) => {
                CliError {
                    code: "PARSE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(
                        "Input must be NDJSON or a JSON array of timestamped frames".to_string(),
                    ),
                }
            }
            FocusCliError::Focus(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FocusCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FocusCliError::NoFrames => CliError {
                code: "EMPTY_INPUT".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FocusCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} aggregates failed validation", count),
                hint: Some("Re-encode the sessions and retry".to_string()),
            },
        }
    }
}

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_aggregates: usize,
    valid_aggregates: usize,
    invalid_aggregates: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session_id: String,
    error: String,
}
