//! MapsApp terminal client.
//!
//! Logs in (or restores the saved session), opens the live map and accepts
//! commands at the prompt. Position fixes are typed with `fix <lat> <lng>` or
//! replayed from a route file.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin mapsapp-client -- --dni 12345678 --password secret
//! cargo run --bin mapsapp-client -- --route demos/lima.route --fix-interval-ms 3000
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use mapsapp_client::{
    config::{ClientConfig, DEFAULT_BASE_URL},
    runner::{RunOptions, run_client},
};
use mapsapp_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "mapsapp-client")]
#[command(about = "Real-time location sharing and proximity notification client", long_about = None)]
struct Args {
    /// Backend base URL (REST and real-time channel)
    #[arg(short = 'u', long, env = "MAPSAPP_URL", default_value = DEFAULT_BASE_URL)]
    url: String,

    /// DNI to log in with; the saved session is used when omitted
    #[arg(long, requires = "password")]
    dni: Option<String>,

    #[arg(long, requires = "dni")]
    password: Option<String>,

    /// Directory holding the saved session
    #[arg(long, env = "MAPSAPP_SESSION_DIR", default_value = ".mapsapp")]
    session_dir: PathBuf,

    /// File of `lat,lng` lines replayed as position fixes
    #[arg(short = 'r', long)]
    route: Option<PathBuf>,

    /// Interval between position fixes (milliseconds)
    #[arg(long, default_value_t = 6000)]
    fix_interval_ms: u64,

    /// Minimum interval between forwarded fixes (milliseconds)
    #[arg(long, default_value_t = 5000)]
    throttle_ms: u64,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let mut config = ClientConfig {
        base_url: args.url,
        session_dir: args.session_dir,
        throttle_window: Duration::from_millis(args.throttle_ms),
        ..ClientConfig::default()
    };
    config.watch_options.interval = Duration::from_millis(args.fix_interval_ms);

    let options = RunOptions {
        dni: args.dni,
        password: args.password,
        route: args.route,
        route_interval: Duration::from_millis(args.fix_interval_ms),
    };

    if let Err(e) = run_client(config, options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
