//! quarry-cli - Offline pipeline compiler
//!
//! Compiles filter schemas and single conditions into aggregation stage
//! fragments without contacting a database.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use quarry::pipeline::filter::builtin_tags;
use quarry::pipeline::{
    apply_filters, parse_condition, AggregationBuilder, BuilderConfig, Condition, Detached,
    FilterOptions, FilterSchema, GroupSpec, LogFormat, PipelineError,
};
use serde_json::Value;
use tracing::{debug, error};

/// quarry-cli - Offline aggregation pipeline compiler
#[derive(Parser, Debug)]
#[command(name = "quarry-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        env = "QUARRY_LOG_LEVEL",
        global = true
    )]
    log_level: Option<String>,

    /// Pretty-print JSON output
    #[arg(long = "pretty", action = ArgAction::SetTrue, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a filter schema to a data bag and print the compiled pipeline
    Compile {
        /// Target collection
        #[arg(long = "collection", default_value = "documents")]
        collection: String,

        /// JSON file holding the filter schema
        #[arg(long = "rules", value_name = "FILE")]
        rules: PathBuf,

        /// JSON file holding the input data bag
        #[arg(long = "data", value_name = "FILE")]
        data: PathBuf,

        /// chrono format string for date rules
        #[arg(long = "date-format", value_name = "FORMAT")]
        date_format: Option<String>,

        /// Fail on unknown rule types instead of skipping them
        #[arg(long = "strict", action = ArgAction::SetTrue)]
        strict: bool,

        /// JSON file holding a `$group` body appended after the filters
        #[arg(long = "group", value_name = "FILE")]
        group: Option<PathBuf>,
    },

    /// Print the match fragment for a single condition
    Condition {
        /// Field path
        field: String,

        /// Operator symbol (=, !=, >, like, between, ...)
        operator: String,

        /// Operand as JSON (bare words are taken as strings)
        value: String,
    },

    /// List the built-in filter rule types
    Tags,

    /// Print the effective configuration as TOML
    Config,
}

fn init_logging(config: &BuilderConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn load_config(cli: &Cli) -> Result<BuilderConfig, PipelineError> {
    let mut config = match &cli.config {
        Some(path) => BuilderConfig::from_file(path)?,
        None => BuilderConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn read_json(path: &Path) -> Result<Value, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PipelineError::InvalidArgument(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        PipelineError::InvalidArgument(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn print_json(value: &Value, pretty: bool) -> Result<(), PipelineError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| PipelineError::InvalidArgument(format!("Failed to render output: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

fn cmd_compile(
    cli: &Cli,
    config: BuilderConfig,
    collection: &str,
    rules: &Path,
    data: &Path,
    group: Option<&Path>,
    options: FilterOptions,
) -> Result<(), PipelineError> {
    let schema = FilterSchema::from_json(&read_json(rules)?)?;
    let bag = match read_json(data)? {
        Value::Object(bag) => bag,
        other => {
            return Err(PipelineError::InvalidArgument(format!(
                "data bag must be a JSON object, got {}",
                other
            )))
        }
    };
    debug!(rules = schema.len(), keys = bag.len(), collection, "compiling filters");

    let mut query = AggregationBuilder::with_config(Arc::new(Detached), collection, Arc::new(config));
    apply_filters(&mut query, &schema, &bag, &options)?;
    if let Some(path) = group {
        query.group_by(GroupSpec::from_json(&read_json(path)?)?);
    }
    print_json(&Value::Array(query.to_pipeline()), cli.pretty)
}

fn cmd_condition(
    cli: &Cli,
    config: &BuilderConfig,
    field: &str,
    operator: &str,
    value: &str,
) -> Result<(), PipelineError> {
    let operand =
        serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    let fragment = parse_condition(
        Condition::Compare {
            field: field.to_string(),
            operator: operator.to_string(),
            value: operand,
        },
        &config.pattern_policy(),
    )?;
    print_json(&fragment.into_value(), cli.pretty)
}

fn cmd_config(config: &BuilderConfig) -> Result<(), PipelineError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| PipelineError::Config(format!("Failed to render config: {}", e)))?;
    print!("{}", rendered);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let result = match &cli.command {
        Commands::Compile {
            collection,
            rules,
            data,
            date_format,
            strict,
            group,
        } => {
            let options = FilterOptions {
                date_format: date_format.clone(),
                strict: *strict,
            };
            cmd_compile(&cli, config, collection, rules, data, group.as_deref(), options)
        }
        Commands::Condition {
            field,
            operator,
            value,
        } => cmd_condition(&cli, &config, field, operator, value),
        Commands::Tags => {
            for tag in builtin_tags() {
                println!("{}", tag);
            }
            Ok(())
        }
        Commands::Config => cmd_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
