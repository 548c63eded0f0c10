use anyhow::Result;
use clap::Parser;
use kanyo::logging::{init_logging, LogFormat, LoggingOptions};
use kanyo::{KanyoConfig, LoggingNotifier, Monitor, StubDetector};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kanyo")]
#[command(about = "24/7 video surveillance daemon with animal-presence detection and clip extraction")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "kanyo.toml")]
    config: String,

    /// Enable debug level logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace level logging
    #[arg(short, long)]
    verbose: bool,

    /// Log errors and warnings only
    #[arg(short, long)]
    quiet: bool,

    /// Validate configuration file and exit
    #[arg(long)]
    validate_config: bool,

    /// Print default configuration in TOML format and exit
    #[arg(long)]
    print_config: bool,

    /// Log output format: json, pretty, or compact
    #[arg(long, value_name = "FORMAT", default_value = "compact")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    let config = match KanyoConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("configuration is invalid: {e}");
        std::process::exit(1);
    }

    if args.validate_config {
        println!("configuration is valid");
        return Ok(());
    }

    let log_format = match args.log_format.as_str() {
        "json" => LogFormat::Json,
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Compact,
    };
    let logs_dir = config.logs_dir_path();
    let _guard = init_logging(&LoggingOptions {
        debug: args.debug,
        verbose: args.verbose,
        quiet: args.quiet,
        format: log_format,
        logs_dir: &logs_dir,
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting kanyo monitor");
    info!(stream_id = %config.stream.stream_id, "configuration loaded");

    let detector = Arc::new(StubDetector);
    let notifier = Arc::new(LoggingNotifier);

    let mut monitor = Monitor::new(config, detector, notifier).await.map_err(|e| {
        error!(error = %e, "failed to construct monitor");
        e
    })?;

    monitor.initialize().await.map_err(|e| {
        error!(error = %e, "failed to initialize monitor");
        e
    })?;

    monitor.start().await.map_err(|e| {
        error!(error = %e, "failed to start monitor");
        e
    })?;

    let exit_code = monitor.run().await.map_err(|e| {
        error!(error = %e, "monitor exited with an error");
        e
    })?;

    info!(exit_code, "kanyo monitor exited");
    std::process::exit(exit_code);
}

fn print_default_config() {
    println!("# kanyo configuration file");
    println!("# these are the built-in defaults; override in TOML or KANYO_* env vars");
    println!();

    let default_config = KanyoConfig::default();
    match toml::to_string_pretty(&default_config) {
        Ok(toml_str) => println!("{toml_str}"),
        Err(e) => eprintln!("failed to render default config: {e}"),
    }
}
