//! Cellforge API Server binary
//!
//! HTTP REST API for the networked spreadsheet engine.

use std::time::Duration;

use cellforge::api::{run_api_server, ApiConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cellforge-server")]
#[command(version)]
#[command(author = "RoyalBit Inc. <admin@royalbit.ca>")]
#[command(about = "Cellforge API Server - spreadsheet cells with live formulas over HTTP")]
#[command(long_about = r#"
Cellforge API Server - spreadsheet cells with live formulas over HTTP

Cells hold literals or formulas ("=var1 + SUM(var2, 3)"). Writes are
validated against every dependent formula before they are stored.

Endpoints:
  - GET  /api/v1/:sheet_id                      - All cells of a sheet
  - GET  /api/v1/:sheet_id/:cell_id             - One cell
  - POST /api/v1/:sheet_id/:cell_id             - Write a cell {"value": "..."}
  - POST /api/v1/:sheet_id/:cell_id/subscribe   - Subscribe to a cell
  - GET  /api/v1/sub/:subscription_id           - Change feed (NDJSON)
  - GET  /health                                - Health check

Example usage:
  cellforge-server                           # Start on localhost:8080
  cellforge-server --host 0.0.0.0 --port 3000

  curl -X POST http://localhost:8080/api/v1/sheet1/var1 \
    -H "Content-Type: application/json" \
    -d '{"value": "=1+2"}'
"#)]
struct Args {
    /// Host address to bind to (use 0.0.0.0 for all interfaces)
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "CELLFORGE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "CELLFORGE_PORT")]
    port: u16,

    /// Timeout for EXTERNAL_REF fetches, in milliseconds
    #[arg(long, default_value = "1000", env = "CELLFORGE_EXTERNAL_TIMEOUT_MS")]
    external_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ApiConfig {
        host: args.host,
        port: args.port,
        external_timeout: Duration::from_millis(args.external_timeout_ms),
    };

    run_api_server(config).await
}
