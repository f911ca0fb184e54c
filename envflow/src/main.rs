//! envflow - Entry Point
//!
//! Network environment API with SDN flow orchestration.

use std::collections::HashMap;
use std::env;

use anyhow::Context;
use envflow::app::options::AppOptions;
use envflow::app::run::run;
use envflow::filesys::file::File;
use envflow::logs::{init_logging, LogOptions};
use envflow::storage::layout::StorageLayout;
use envflow::storage::settings::Settings;
use envflow::utils::version_info;

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
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {}", e),
        }
        return;
    }

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => StorageLayout::default().settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {:#}", e);
            std::process::exit(1);
        }
    };

    if cli_args.contains_key("check-config") {
        println!("Settings in {:?} are valid", settings_file.path());
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log.dir.clone(),
        json_format: settings.log.json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the service
    let options = AppOptions::from_settings(&settings);
    info!(
        "Running envflow {} ({}) on {}:{} with {:?} controller at {}",
        version.version,
        version.git_hash,
        options.server.host,
        options.server.port,
        options.controller.kind,
        options.controller.base_url
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run envflow: {e}");
        std::process::exit(1);
    }
}

async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    if !file.exists().await {
        anyhow::bail!("settings file {:?} does not exist", file.path());
    }
    let settings = file
        .read_json::<Settings>()
        .await
        .with_context(|| format!("failed to parse {:?}", file.path()))?;
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
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
