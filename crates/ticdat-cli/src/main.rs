mod logging;
mod report;
mod settings;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use ticdat_core::{
    check_spec, remove_foreign_key_failures, replace_data_type_failures, schema_spec_json_schema,
    Error as CoreError, ExceptionHandling, Keep, Schema, SchemaSpec, TicDat, Verbosity,
};
use ticdat_io::IoError;

use logging::init_logging;
use report::{DataReport, ReportOptions};
use settings::{load_settings, DataFormat, Settings};

#[derive(Debug, Error)]
enum CliError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("data error: {0}")]
    Data(#[from] IoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("{0} failing rows")]
    Failures(usize),
    #[error("schema description has {0} errors")]
    InvalidSpec(usize),
}

#[derive(Parser, Debug)]
#[command(name = "ticdat", version, about = "Validate and repair schema-driven tabular data")]
struct Cli {
    /// TOML file with option defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report every failure in a dataset.
    Validate(ValidateArgs),
    /// Remove foreign key failures and write the repaired dataset.
    Repair(RepairArgs),
    /// Print tables parents first, or the foreign key graph.
    Order(OrderArgs),
    /// Print the JSON Schema of schema files, or check one.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Schema description (JSON).
    #[arg(long)]
    schema: PathBuf,
    /// CSV directory or JSON file.
    #[arg(long)]
    data: PathBuf,
    #[arg(long, value_enum)]
    format: Option<DataFormat>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Cap on failures reported per check.
    #[arg(long)]
    max_failures: Option<usize>,
    /// Leave unmatched values out of foreign key failures.
    #[arg(long, default_value_t = false)]
    low_verbosity: bool,
    /// Report every row of a duplicated group, not just the extra ones.
    #[arg(long, default_value_t = false)]
    all_duplicates: bool,
}

#[derive(Args, Debug)]
struct RepairArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Where to write the repaired dataset, in the same format.
    #[arg(long)]
    out: PathBuf,
    /// Repeat until removals stop cascading.
    #[arg(long, default_value_t = false)]
    propagate: bool,
    /// Also reset values that fail their data type to the field default.
    #[arg(long, default_value_t = false)]
    reset_bad_values: bool,
}

#[derive(Args, Debug)]
struct OrderArgs {
    #[arg(long)]
    schema: PathBuf,
    /// Print the full foreign key graph report as JSON.
    #[arg(long, default_value_t = false)]
    graph: bool,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Check this schema description instead of printing the JSON Schema.
    #[arg(long)]
    check: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "command_failed", error = %err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    init_logging(&settings.log_level, cli.log_json || settings.log_json)?;

    let timer = Instant::now();
    let result = match cli.command {
        Command::Validate(args) => run_validate(args, &settings),
        Command::Repair(args) => run_repair(args, &settings),
        Command::Order(args) => run_order(args),
        Command::Schema(args) => run_schema(args),
    };
    tracing::debug!(
        event = "command_finished",
        ok = result.is_ok(),
        duration_ms = timer.elapsed().as_millis() as u64
    );
    result
}

fn load_schema(path: &Path) -> Result<Arc<Schema>, CliError> {
    let text = std::fs::read_to_string(path)?;
    let schema = SchemaSpec::from_json_str(&text)?.build()?;
    tracing::info!(
        event = "schema_loaded",
        path = %path.display(),
        tables = schema.table_names().count()
    );
    Ok(schema)
}

fn data_format(args: &DataArgs, settings: &Settings) -> DataFormat {
    args.format
        .or(settings.format)
        .unwrap_or_else(|| DataFormat::detect(&args.data))
}

fn load_data(args: &DataArgs, settings: &Settings) -> Result<(TicDat, DataFormat), CliError> {
    let schema = load_schema(&args.schema)?;
    let format = data_format(args, settings);
    let dat = match format {
        DataFormat::Csv => ticdat_io::csv::read_directory(&schema, &args.data)?,
        DataFormat::Json => ticdat_io::json::read_file(&schema, &args.data)?,
    };
    tracing::info!(event = "data_loaded", path = %args.data.display(), format = ?format);
    Ok((dat, format))
}

fn run_validate(args: ValidateArgs, settings: &Settings) -> Result<(), CliError> {
    let (dat, _) = load_data(&args.data, settings)?;
    let options = ReportOptions {
        max_failures: args.max_failures.or(settings.max_failures),
        verbosity: if args.low_verbosity {
            Verbosity::Low
        } else {
            settings.verbosity
        },
        exception_handling: settings.exception_handling,
        keep: if args.all_duplicates {
            Keep::None
        } else {
            settings.keep
        },
    };

    let report = DataReport::collect(&dat, &options)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::Failures(report.failure_count()))
    }
}

fn run_repair(args: RepairArgs, settings: &Settings) -> Result<(), CliError> {
    let (mut dat, format) = load_data(&args.data, settings)?;

    let replaced = if args.reset_bad_values {
        replace_data_type_failures(&mut dat, &BTreeMap::new())?
    } else {
        0
    };
    let removed = remove_foreign_key_failures(&mut dat, args.propagate || settings.propagate)?;

    match format {
        DataFormat::Csv => ticdat_io::csv::write_directory(&dat, &args.out)?,
        DataFormat::Json => ticdat_io::json::write_file(&dat, &args.out)?,
    }
    tracing::info!(event = "repair_written", path = %args.out.display(), removed, replaced);

    let remaining = DataReport::collect(
        &dat,
        &ReportOptions {
            max_failures: None,
            verbosity: Verbosity::Low,
            exception_handling: ExceptionHandling::TreatAsFailure,
            keep: settings.keep,
        },
    )?;
    println!(
        "{}",
        serde_json::json!({
            "removed": removed,
            "replaced": replaced,
            "remaining_failures": remaining.failure_count(),
        })
    );
    Ok(())
}

fn run_order(args: OrderArgs) -> Result<(), CliError> {
    let schema = load_schema(&args.schema)?;
    if args.graph {
        println!("{}", serde_json::to_string_pretty(&schema.fk_graph_report())?);
        return Ok(());
    }
    for table in schema.table_order()? {
        println!("{table}");
    }
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<(), CliError> {
    let Some(path) = args.check else {
        println!("{}", serde_json::to_string_pretty(&schema_spec_json_schema())?);
        return Ok(());
    };

    let document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let report = check_spec(&document)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    for warning in &report.warnings {
        tracing::warn!(event = "schema_warning", code = %warning.code, path = %warning.path);
    }
    if report.is_ok() {
        Ok(())
    } else {
        Err(CliError::InvalidSpec(report.errors.len()))
    }
}
