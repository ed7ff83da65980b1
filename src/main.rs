use clap::{Parser, Subcommand};
use dbcalc::cli;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dbcalc")]
#[command(about = "Formula, lookup and rollup columns for user-defined tables.")]
#[command(long_about = "dbcalc - derived columns for user-defined tables

Formula columns compute from the row's own values; lookup and rollup
columns read and aggregate values across relations. Cycles are rejected
when a workbook is loaded, never discovered while computing.

COMMANDS:
  evaluate   - Evaluate one expression against a JSON row
  check      - Validate workbooks (relations, cycles, formulas)
  compute    - Recompute derived columns and print them
  audit      - Show a column's dependency chain
  functions  - List the function catalogue

EXAMPLES:
  dbcalc evaluate \"upper({name})\" --row '{\"name\": \"bob\"}'
  dbcalc evaluate \"{qty} * {price}\" --row '{\"qty\": 2, \"price\": 9.5}' --type text
  dbcalc check shop.yaml
  dbcalc compute shop.yaml --table customers --timeout-ms 500
  dbcalc audit shop.yaml customers spent")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one expression against a JSON row
    Evaluate {
        /// Expression, with column references written as {name}
        expression: String,

        /// Row values as a JSON object keyed by column name
        #[arg(short, long)]
        row: Option<String>,

        /// Coerce the result to this column type
        #[arg(short = 't', long = "type")]
        return_type: Option<String>,

        /// Evaluation time bound in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    #[command(long_about = "Validate workbooks without computing.

Loads each workbook, checks relation, lookup and rollup configuration,
rejects dependency cycles (printing the cycle path), and lints every
formula: syntax, unknown functions, argument counts, and declared
dependencies that do not match the references used.

BATCH VALIDATION:
  dbcalc check a.yaml b.yaml c.yaml
  Checks every file, reporting all failures.")]
    /// Validate workbooks (relations, cycles, formulas)
    Check {
        /// Workbook files (YAML or JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Recompute derived columns and print them
    Compute {
        /// Workbook file (YAML or JSON)
        file: PathBuf,

        /// Only this table
        #[arg(long)]
        table: Option<String>,

        /// Per-cell time bound in milliseconds
        #[arg(long, env = "DBCALC_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Engine configuration file (YAML)
        #[arg(short, long, env = "DBCALC_CONFIG")]
        config: Option<PathBuf>,

        /// Compute rows one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Show the dependency chain of a column
    Audit {
        /// Workbook file (YAML or JSON)
        file: PathBuf,

        /// Table id
        table: String,

        /// Column id or name
        column: String,
    },

    /// List the function catalogue
    Functions,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dbcalc=warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            expression,
            row,
            return_type,
            timeout_ms,
        } => cli::evaluate(expression, row, return_type, timeout_ms)?,

        Commands::Check { files } => cli::check(files)?,

        Commands::Compute {
            file,
            table,
            timeout_ms,
            config,
            sequential,
        } => cli::compute(file, table, timeout_ms, config, sequential)?,

        Commands::Audit {
            file,
            table,
            column,
        } => cli::audit(file, table, column)?,

        Commands::Functions => cli::functions()?,
    }
    Ok(())
}
