mod config;
mod matching;

use cellmatch_core::{distance_correlation_components, DcorError, METRIC_ID};
use cellmatch_engine::{config_hash, ConfigError, ExportError, MatchError, RunTrace};
use clap::{error::ErrorKind, ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "cellmatch",
    version,
    about = "Match sample groups across modalities by centroid distance correlation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short = 'j', global = true)]
    json: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file; overrides CELLMATCH_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score every Left x Right sample pair and report the best match
    Match(matching::MatchArgs),
    /// Distance correlation of two comma-separated vectors
    Score {
        #[arg(allow_hyphen_values = true)]
        a: String,
        #[arg(allow_hyphen_values = true)]
        b: String,
    },
    /// Print the resolved configuration, its source and hash
    Config,
}

#[derive(Clone, Copy, Debug)]
enum AppErrorKind {
    Usage,
    Input,
    Data,
    Internal,
}

#[derive(Clone, Debug)]
struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    details: Box<Value>,
    run_trace: Option<Box<RunTrace>>,
}

impl AppError {
    fn new(kind: AppErrorKind, code: &'static str, message: String) -> Self {
        Self {
            kind,
            code,
            message,
            details: Box::new(Value::Null),
            run_trace: None,
        }
    }

    fn usage(message: String) -> Self {
        Self::new(AppErrorKind::Usage, "CLI_USAGE", message)
    }

    fn input(message: String) -> Self {
        Self::new(AppErrorKind::Input, "INPUT_UNREADABLE", message)
    }

    fn config(err: ConfigError) -> Self {
        Self::new(AppErrorKind::Input, "CONFIG_INVALID", err.to_string())
    }

    fn export(err: ExportError) -> Self {
        Self::new(AppErrorKind::Input, "EXPORT_FAILED", err.to_string())
    }

    fn internal(message: String) -> Self {
        Self::new(AppErrorKind::Internal, "INTERNAL_ERROR", message)
    }

    fn exit_code(&self) -> i32 {
        match self.kind {
            AppErrorKind::Usage => 1,
            AppErrorKind::Input | AppErrorKind::Data | AppErrorKind::Internal => 2,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Box::new(details);
        self
    }

    fn with_run_trace(mut self, trace: RunTrace) -> Self {
        self.run_trace = Some(Box::new(trace));
        self
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        let details = match &err {
            MatchError::InsufficientData {
                side,
                left_n,
                right_n,
            } => json!({ "empty_side": side, "left_n": left_n, "right_n": right_n }),
            MatchError::NoValidComparisons {
                rows,
                cols,
                missing_cells,
                total_cells,
            } => json!({
                "rows": rows,
                "cols": cols,
                "missing_cells": missing_cells,
                "total_cells": total_cells,
            }),
            MatchError::Cancelled { stage } => json!({ "stage": stage }),
            MatchError::InvalidInput(_) | MatchError::WorkerPool(_) => Value::Null,
        };
        let kind = match err {
            MatchError::WorkerPool(_) => AppErrorKind::Internal,
            _ => AppErrorKind::Data,
        };
        Self::new(kind, err.code(), err.to_string()).with_details(details)
    }
}

#[derive(Serialize)]
struct JsonEnvelope {
    status: String,
    error: Option<ErrorEnvelope>,
    run_trace: Option<RunTrace>,
    data: Option<Value>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
    details: Value,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let wants_json = args.iter().any(|arg| arg == "--json" || arg == "-j");

    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            let json = cli.json || wants_json;
            match run(cli, json) {
                Ok(envelope) => {
                    if json {
                        print_json(&envelope);
                    }
                    std::process::exit(0);
                }
                Err(err) => {
                    let exit_code = err.exit_code();
                    if json {
                        print_json(&error_envelope(&err));
                    } else {
                        eprintln!("error[{}]: {}", err.code, err.message);
                    }
                    std::process::exit(exit_code);
                }
            }
        }
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                std::process::exit(0);
            }
            _ => {
                if wants_json {
                    print_json(&error_envelope(&AppError::usage(err.to_string())));
                } else {
                    let _ = err.print();
                }
                std::process::exit(1);
            }
        },
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, json: bool) -> Result<JsonEnvelope, AppError> {
    let resolved = config::resolve(cli.config.as_deref())?;
    match cli.command {
        Commands::Match(args) => matching::run(args, resolved, json),
        Commands::Score { a, b } => score(&a, &b, json),
        Commands::Config => show_config(resolved, json),
    }
}

fn score(a: &str, b: &str, json: bool) -> Result<JsonEnvelope, AppError> {
    let x = parse_vector("a", a)?;
    let y = parse_vector("b", b)?;
    let components = distance_correlation_components(&x, &y).map_err(map_dcor_error)?;

    if !json {
        println!("{}", components.dcor);
    }
    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        run_trace: None,
        data: Some(json!({
            "metric_id": METRIC_ID,
            "n": x.len(),
            "dcor": components.dcor,
            "dcov2_xy": components.dcov2_xy,
            "dvar2_x": components.dvar2_x,
            "dvar2_y": components.dvar2_y,
        })),
    })
}

fn parse_vector(name: &str, raw: &str) -> Result<Vec<f64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(idx, part)| {
            part.parse::<f64>().map_err(|_| {
                AppError::usage(format!(
                    "vector {} element {} is not a number: {:?}",
                    name, idx, part
                ))
            })
        })
        .collect()
}

fn map_dcor_error(err: DcorError) -> AppError {
    let usage = matches!(
        err,
        DcorError::LengthMismatch { .. } | DcorError::TooShort { .. } | DcorError::NonFinite { .. }
    );
    let message = format!("distance correlation failed: {}", err);
    if usage {
        AppError::usage(message)
    } else {
        AppError::new(AppErrorKind::Data, "METRIC_DEGENERATE", message)
    }
}

fn show_config(resolved: config::ResolvedConfig, json: bool) -> Result<JsonEnvelope, AppError> {
    let hash = config_hash(&resolved.config)
        .map_err(|err| AppError::internal(format!("failed to hash config: {}", err)))?;
    let source = resolved.source_label();
    if !json {
        let pretty = serde_json::to_string_pretty(&resolved.config)
            .map_err(|err| AppError::internal(format!("failed to render config: {}", err)))?;
        println!("source: {}", source);
        println!("config_hash: {}", hash);
        println!("{pretty}");
    }
    let trace = resolved.run_trace(None)?;
    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        run_trace: Some(trace),
        data: Some(json!({
            "source": source,
            "config_hash": hash,
            "config": resolved.config,
        })),
    })
}

fn error_envelope(err: &AppError) -> JsonEnvelope {
    JsonEnvelope {
        status: "ERROR".to_string(),
        error: Some(ErrorEnvelope {
            code: err.code.to_string(),
            message: err.message.clone(),
            details: (*err.details).clone(),
        }),
        run_trace: err.run_trace.as_deref().cloned(),
        data: None,
    }
}

fn print_json(envelope: &JsonEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialize json output: {}", err),
    }
}

