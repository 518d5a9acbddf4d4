//! Deployer - Entry Point
//!
//! Receives deployment triggers over HTTP and rolls the requested container
//! images out to their targets.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tracing::{error, info};

use deployer::app::options::AppOptions;
use deployer::app::run::run;
use deployer::config::Config;
use deployer::filesys::file::File;
use deployer::logs::{init_logging, LogOptions};
use deployer::utils::version_info;

const DEFAULT_CONFIG_PATH: &str = "/etc/deployer/config.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Unable to print version: {}", e),
        }
        return;
    }

    let config_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path).await {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    // Validate the config and exit
    if cli_args.contains_key("check-config") {
        print_config_summary(&config_path, &config);
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: config.log_level,
        log_dir: config.log_dir.clone(),
        json_format: config.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the deployer
    let options = AppOptions::from_config(&config);
    info!(
        "Running deployer {} ({} target(s), {} worker(s))",
        version.version,
        config.targets().count(),
        options.worker_count
    );
    if let Err(e) = run(config, options, await_shutdown_signal()).await {
        error!("Failed to run the deployer: {e}");
        std::process::exit(1);
    }
}

async fn load_config(path: &str) -> anyhow::Result<Config> {
    let file = File::new(path);
    Config::load(&file)
        .await
        .with_context(|| format!("unable to load config from {}", path))
}

fn print_config_summary(path: &str, config: &Config) {
    println!("{} {}", "Config OK:".green().bold(), path);
    println!(
        "  server {}:{}, {} worker(s), lease expiry {:?}",
        config.server.host, config.server.port, config.worker_count, config.lease_expiry
    );
    for target in config.targets() {
        println!(
            "  {} {} (container {}, max {} attempt(s))",
            target.name.cyan().bold(),
            target.image_pattern,
            target.container_name,
            target.retry.max_attempts
        );
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
