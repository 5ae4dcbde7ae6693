mod config;
mod context;
mod monitor;
mod server;
mod utils;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const APP_NAME: &str = "rds-pulse";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:9042";
const DEFAULT_CONFIG_FILE: &str = "config.yml";
const DEFAULT_LOG_LEVEL: &str = "info";

const BANNER: &str = r#"
╔═══════════════════════════════════════════════════════════════════╗
║                                                                   ║
║                         RDS-PULSE                                 ║
║        Enhanced monitoring metrics for Amazon RDS                 ║
║                                                                   ║
╚═══════════════════════════════════════════════════════════════════╝
"#;

#[derive(Parser, Debug)]
#[command(
    name = APP_NAME,
    version = VERSION,
    about = "Enhanced monitoring metrics for Amazon RDS",
    long_about = "RdsPulse: polls RDS enhanced monitoring documents from CloudWatch Logs and serves them in Prometheus text format"
)]
struct Args {
    /// The address to listen on for HTTP requests
    #[arg(
        long,
        env = "RDS_PULSE_LISTEN",
        default_value = DEFAULT_LISTEN_ADDRESS,
        help = "The address to listen on for HTTP requests"
    )]
    listen_address: String,

    /// Path to the YAML configuration file
    #[arg(
        long,
        env = "RDS_PULSE_CONFIG",
        default_value = DEFAULT_CONFIG_FILE,
        help = "Path to the YAML configuration file"
    )]
    config_file: String,

    /// Log level
    #[arg(
        long,
        env = "RUST_LOG",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log level (trace/debug/info/warn/error)"
    )]
    log_level: String,

    /// Path under which enhanced metrics are exposed
    #[arg(
        long,
        default_value = config::DEFAULT_ENHANCED_PATH,
        help = "Path under which enhanced metrics are exposed"
    )]
    enhanced_path: String,

    /// Log group holding enhanced monitoring documents
    #[arg(
        long,
        default_value = config::DEFAULT_LOG_GROUP,
        help = "CloudWatch Logs group holding enhanced monitoring documents"
    )]
    log_group: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        return;
    }

    // Print banner
    println!("{}", BANNER);

    // Log startup information
    info!(
        app = APP_NAME,
        version = VERSION,
        listen_address = %args.listen_address,
        config_file = %args.config_file,
        log_level = %args.log_level,
        enhanced_path = %args.enhanced_path,
        log_group = %args.log_group,
        "announcement"
    );

    if let Err(e) = config::validate_enhanced_path(&args.enhanced_path) {
        eprintln!("Invalid --enhanced-path: {}", e);
        return;
    }

    let config = match config::Config::load(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return;
        }
    };

    // Create application context with all singletons
    let app_context = match context::AppContext::new(config, args.log_group) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to initialize application context: {}", e);
            return;
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        shutdown.cancel();
    });

    if let Err(e) = app_context.start(cancel.clone()) {
        eprintln!("Failed to start application: {}", e);
        return;
    }

    // Start HTTP server
    tracing::debug!(listen_address = %args.listen_address, "Starting HTTP server");
    if let Err(e) = server::start_server(
        &args.listen_address,
        &args.enhanced_path,
        app_context,
        cancel.clone(),
    )
    .await
    {
        tracing::error!(error = %e, "Server error");
    }
    cancel.cancel();
}

/// Initialize the logging system
fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = match log_level {
        "trace" | "debug" | "info" | "warn" | "error" => EnvFilter::new(log_level),
        directives => match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("info"),
        },
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
