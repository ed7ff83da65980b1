//! dbcalc API Server binary
//!
//! HTTP REST API for expression evaluation, workbook validation,
//! recompute and cycle checks.

use clap::Parser;
use dbcalc::api::{run_api_server, server::ApiConfig};
use dbcalc::EngineConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dbcalc-server")]
#[command(version)]
#[command(about = "dbcalc API Server - HTTP REST API for derived-column evaluation")]
#[command(long_about = r#"
dbcalc API Server - HTTP REST API

Provides RESTful endpoints:
  - POST /api/v1/evaluate           - Evaluate an expression against a row
  - POST /api/v1/validate           - Validate an inline workbook
  - POST /api/v1/compute            - Recompute derived columns of a workbook
  - POST /api/v1/would-create-cycle - Check a new dependency edge
  - GET  /api/v1/functions          - Function catalogue

Additional endpoints:
  - GET  /health                    - Health check
  - GET  /version                   - Server version info
  - GET  /                          - API documentation

Features:
  - CORS enabled for cross-origin requests
  - Graceful shutdown on SIGINT/SIGTERM
  - JSON response format with request IDs
  - Tracing and structured logging (RUST_LOG)

Example usage:
  dbcalc-server                           # Start on localhost:8080
  dbcalc-server --host 0.0.0.0 --port 3000 --timeout-ms 500

  curl -X POST http://localhost:8080/api/v1/evaluate \
    -H "Content-Type: application/json" \
    -d '{"expression": "{a} * 2", "row_data": {"a": 5}}'
"#)]
struct Args {
    /// Host address to bind to (use 0.0.0.0 for all interfaces)
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "DBCALC_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "DBCALC_PORT")]
    port: u16,

    /// Engine configuration file (YAML)
    #[arg(short, long, env = "DBCALC_CONFIG")]
    config: Option<PathBuf>,

    /// Per-cell time bound in milliseconds (overrides the config file)
    #[arg(long, env = "DBCALC_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut engine = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };
    if args.timeout_ms.is_some() {
        engine = engine.with_timeout_ms(args.timeout_ms);
    }

    let config = ApiConfig {
        host: args.host,
        port: args.port,
        engine,
    };

    run_api_server(config).await
}
