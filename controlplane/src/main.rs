//! Berth control plane - Entry Point
//!
//! Serves the container API, runs builds and rollouts, and keeps deployment
//! and health state in step with the orchestration backend.

use std::collections::HashMap;
use std::env;

use berth::app::options::AppOptions;
use berth::app::run::run;
use berth::logs::init_logging;
use berth::storage::settings::{Settings, DEFAULT_SETTINGS_PATH};
use berth::version::build_info;

use tracing::{error, info};

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
    let build = build_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&build) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Unable to encode version: {e}"),
        }
        return;
    }

    // Retrieve the settings file; a missing file means defaults
    let settings_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let settings = match Settings::load(&settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path, e);
            return;
        }
    };

    // Initialize logging
    let _log_guard = match init_logging(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the control plane
    let options = AppOptions::from(&settings);
    info!(
        "Running Berth control plane {} ({}) with options: {:?}",
        build.version, build.commit, options
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the control plane: {e}");
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
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
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
