//! # Auction Server
//!
//! Runs one auction round over TCP.
//!
//! ## Features
//! - Loads the auction from a JSON file, overridable from the command line.
//! - Waits for the operator to type `Y` (start) or `N` (cancel) on stdin,
//!   unless `--auto-start` is given.
//! - Ctrl+C runs the same shutdown cascade as the end of the round.
//!
//! ## Command-line Options
//! - `--config` / `-c`: JSON auction config (default `auction_config.json`).
//! - `--item`, `--price`, `--duration`, `--desc`: override config values.
//! - `--host`, `--port` / `-p`: listen address (default `0.0.0.0:9999`).
//! - `--idle-timeout`: drop silent clients after N seconds (`0` = never).
//! - `--auto-start`: start the round without waiting for the operator.
//! - `--log-level` / `-l`: log level (`error`, `warn`, `info`, `debug`, `trace`).

use auction_server::config::{
    AuctionConfig, AuctionOverrides, ServerConfig, idle_timeout_from_secs,
};
use auction_server::context::AuctionContext;
use auction_server::errors::CliError;
use auction_server::shutdown::ShutdownReason;
use auction_server::tcp_server::AuctionServer;
use auction_server::timer::TimerSettings;

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use structopt::StructOpt;

/// Command-line options for the Auction Server
#[derive(Debug, StructOpt)]
#[structopt(name = "auction_server", about = "Single-round English auction over TCP")]
struct Opt {
    /// Path to the JSON auction configuration
    #[structopt(short, long, default_value = "auction_config.json")]
    config: String,

    /// Item name (overrides the config file)
    #[structopt(long)]
    item: Option<String>,

    /// Starting price (overrides the config file)
    #[structopt(long)]
    price: Option<f64>,

    /// Round duration in seconds (overrides the config file)
    #[structopt(long)]
    duration: Option<u64>,

    /// Item description (overrides the config file)
    #[structopt(long)]
    desc: Option<String>,

    /// Listen host
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[structopt(short, long, default_value = "9999")]
    port: u16,

    /// Disconnect clients silent for this many seconds (0 = never)
    #[structopt(long, default_value = "0")]
    idle_timeout: u64,

    /// Start the round immediately
    #[structopt(long)]
    auto_start: bool,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

/// Initializes the logger using env_logger with the given level
fn init_logger(level: &str) -> Result<(), CliError> {
    let mut builder = env_logger::Builder::new();

    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder
        .try_init()
        .map_err(|e| CliError::GeneralError(e.to_string()))
}

/// Reads operator commands from stdin until the round starts or is cancelled.
fn spawn_operator_console(context: Arc<AuctionContext>) -> io::Result<()> {
    thread::Builder::new()
        .name("operator".into())
        .spawn(move || {
            println!("Type 'Y' and Enter to START the auction, 'N' to cancel and exit.");
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim().to_uppercase().as_str() {
                    "Y" => {
                        if context.timer.start_round() {
                            println!("Auction started!");
                        }
                        break;
                    }
                    "N" => {
                        log::info!("Operator cancelled the round");
                        context.shutdown.trigger(ShutdownReason::Cancelled);
                        break;
                    }
                    "" => {}
                    _ => println!("Type 'Y' to start or 'N' to cancel."),
                }
                if context.shutdown.is_triggered() {
                    break;
                }
            }
        })
        .map(|_| ())
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    init_logger(&opt.log_level)?;

    log::info!("Starting Auction Server");
    log::debug!("Command line options: {:?}", opt);

    let mut auction = AuctionConfig::from_file_or_default(&opt.config)?;
    auction.apply_overrides(AuctionOverrides {
        item_name: opt.item.clone(),
        description: opt.desc.clone(),
        starting_price: opt.price,
        auction_duration: opt.duration,
    });
    auction.validate()?;
    auction.log_banner();

    let server_config = ServerConfig {
        host: opt.host.clone(),
        port: opt.port,
        idle_timeout: idle_timeout_from_secs(opt.idle_timeout),
        auto_start: opt.auto_start,
        ..ServerConfig::default()
    };

    let context = AuctionContext::new(&auction, &server_config, TimerSettings::default());
    let server = AuctionServer::new(&server_config.bind_addr(), context.clone())?;

    {
        let signal = context.shutdown.clone();
        ctrlc::set_handler(move || {
            signal.trigger(ShutdownReason::Interrupt);
        })
        .map_err(|e| CliError::GeneralError(format!("Failed to install Ctrl+C handler: {}", e)))?;
    }

    if server_config.auto_start {
        // The countdown is spawned by `run`; the request waits for it.
        context.timer.start_round();
    } else {
        spawn_operator_console(context.clone())?;
    }

    log::info!(
        "Listening on {}, {} second round",
        server.local_addr(),
        auction.auction_duration
    );
    server.run()?;

    log::info!("Server shutdown complete");
    Ok(())
}
