//! arrstack orchestrator - Entry Point
//!
//! Validates, previews and applies the desired state of a self-hosted media
//! stack, streaming per-run progress over HTTP.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use arrstack::app::options::AppOptions;
use arrstack::app::run::run;
use arrstack::app::state::load_engine;
use arrstack::filesys::file::File;
use arrstack::logs::{init_logging, LogOptions};
use arrstack::storage::settings::Settings;
use arrstack::utils::version_info;
use arrstack::validation::{ValidateOptions, ValidationReport};

use colored::Colorize;
use tracing::{error, info};

const DEFAULT_SETTINGS_FILE: &str = "/etc/arrstack/settings.json";

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
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("settings")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path.display(), e);
            std::process::exit(1);
        }
    };
    let options = AppOptions::from(&settings);

    // Offline validation of a configuration document
    if let Some(config_path) = cli_args.get("validate") {
        let ok = validate_file(&options, config_path).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("Running arrstack {} with options: {:?}", version.version, options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the orchestrator: {e}");
        std::process::exit(1);
    }
}

/// Validate a configuration file without calling any service API
async fn validate_file(options: &AppOptions, config_path: &str) -> bool {
    let engine = match load_engine(options).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return false;
        }
    };
    let config: serde_json::Value = match File::new(config_path).read_json().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} unable to read {}: {}", "error:".red().bold(), config_path, e);
            return false;
        }
    };

    let options = ValidateOptions {
        partial: false,
        skip_service_checks: true,
    };
    let report = engine.validate(&config, None, options).await;
    print_report(&report);
    report.success
}

fn print_report(report: &ValidationReport) {
    for (check, verdict) in &report.checks {
        if verdict == "ok" {
            println!("  {} {}", "✓".green(), check);
        } else {
            println!("  {} {}: {}", "✗".red(), check, verdict.red());
        }
    }
    for error in &report.errors {
        for suggestion in &error.suggestions {
            println!("    {} {}: {}", "hint".cyan(), error.field, suggestion);
        }
    }
    for warning in &report.warnings {
        println!("  {} {}: {}", "!".yellow(), warning.field, warning.message.yellow());
    }

    let summary = format!(
        "{} error(s), {} warning(s) in {}ms",
        report.errors.len(),
        report.warnings.len(),
        report.duration_ms
    );
    if report.success {
        println!("{} {}", "valid".green().bold(), summary);
    } else {
        println!("{} {}", "invalid".red().bold(), summary);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) =
            (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        else {
            error!("Failed to install signal handlers, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
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
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
