//! depconf - Dependency confusion scanner for package manifests.
//!
//! CLI entry point.

use clap::Parser;
use depconf::exfil::{
    run_listener, ConfirmationSink, ConfirmationStore, JsonLinesStore, MemoryStore,
};
use depconf::notify::{ConsoleOutput, TelegramNotifier};
use depconf::{Commands, Config, ConfirmationsConfig, FileConfig, ListenConfig, ScanConfig, Scanner};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Set up logging
    let filter = if config.verbose {
        EnvFilter::new("depconf=debug,info")
    } else {
        EnvFilter::new("depconf=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let file_config = match FileConfig::load_or_default(config.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match config.command.clone() {
        Commands::Scan(scan_config) => run_scan(scan_config, &config, &file_config).await,
        Commands::Listen(listen_config) => run_listen(listen_config, &config, &file_config).await,
        Commands::Confirmations(list_config) => run_confirmations(list_config, &file_config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn run_scan(
    scan_config: ScanConfig,
    global_config: &Config,
    file_config: &FileConfig,
) -> Result<(), ExitCode> {
    let manifests = match scan_config.load_manifests() {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to load manifest list: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if manifests.is_empty() {
        error!("No manifests specified. Use positional arguments or -f <file>.");
        return Err(ExitCode::FAILURE);
    }

    let scanner = match Scanner::new(
        scan_config.clone(),
        file_config.registries.clone(),
        global_config.verbose,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create scanner: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    // Print banner unless JSON mode
    if !scan_config.json && !scan_config.quiet {
        print_banner();
    }

    scanner
        .console()
        .print_info(&format!("Checking {} manifests against public registries", manifests.len()));
    let results = scanner.scan_multiple(manifests).await;

    // Output results
    if scan_config.json {
        let flagged: Vec<_> = results.iter().flat_map(|r| r.flagged.iter()).collect();
        let json = serde_json::to_string_pretty(&flagged).unwrap_or_default();
        if let Some(ref output_path) = scan_config.output {
            if let Err(e) = fs::write(output_path, &json) {
                error!("Failed to write output file: {}", e);
                return Err(ExitCode::FAILURE);
            }
        } else {
            println!("{}", json);
        }
    } else {
        for result in &results {
            scanner.console().print_result(result);
            for e in &result.errors {
                warn!("{}: {}", result.file, e);
            }
        }
        scanner.console().print_summary(&results);

        if let Some(ref output_path) = scan_config.output {
            // Write JSON to file even in non-JSON mode
            let json = serde_json::to_string_pretty(&results).unwrap_or_default();
            if let Err(e) = fs::write(output_path, &json) {
                error!("Failed to write output file: {}", e);
                return Err(ExitCode::FAILURE);
            }
            info!("Results written to: {:?}", output_path);
        }
    }

    let total_flagged: usize = results.iter().map(|r| r.flagged.len()).sum();
    if total_flagged > 0 && !scan_config.json {
        eprintln!("\n{} potential dependency confusion candidates found!", total_flagged);
    }

    Ok(())
}

async fn run_listen(
    listen_config: ListenConfig,
    global_config: &Config,
    file_config: &FileConfig,
) -> Result<(), ExitCode> {
    let dns = file_config.dns().map_err(|e| {
        error!("{}", e);
        ExitCode::FAILURE
    })?;
    let mut settings = dns.settings().map_err(|e| {
        error!("{}", e);
        ExitCode::FAILURE
    })?;
    if let Some(listen) = listen_config.listen {
        settings.listen = listen;
    }

    let store: Arc<dyn ConfirmationStore> = match &dns.store {
        Some(path) => {
            let store = JsonLinesStore::new(path);
            info!("Persisting confirmations to {}", store.path().display());
            Arc::new(store)
        }
        None => {
            warn!("No store configured in [dns]; confirmations are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let mut sink = ConfirmationSink::new(store, ConsoleOutput::new(global_config.verbose, false, false));

    // Configure Telegram if requested
    if listen_config.telegram {
        if let (Some(ref token), Some(ref chat_id)) =
            (&global_config.telegram_token, &global_config.telegram_chat_id)
        {
            sink = match TelegramNotifier::new(token, chat_id) {
                Ok(notifier) => sink.with_telegram(notifier),
                Err(e) => {
                    error!("Failed to configure Telegram: {}", e);
                    return Err(ExitCode::FAILURE);
                }
            };
        } else {
            error!(
                "Telegram notifications requested but DEPCONF_TELEGRAM_TOKEN and/or DEPCONF_TELEGRAM_CHAT_ID not set"
            );
            return Err(ExitCode::FAILURE);
        }
    }

    print_banner();

    tokio::select! {
        result = run_listener(&settings, sink) => {
            if let Err(e) = result {
                error!("Listener failed: {}", e);
                return Err(ExitCode::FAILURE);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nSignal received, stopping listener...");
            return Err(ExitCode::from(130));
        }
    }

    Ok(())
}

async fn run_confirmations(
    list_config: ConfirmationsConfig,
    file_config: &FileConfig,
) -> Result<(), ExitCode> {
    let Some(path) = file_config.dns.as_ref().and_then(|dns| dns.store.as_ref()) else {
        error!("No confirmation store configured; set `store` in the [dns] section");
        return Err(ExitCode::FAILURE);
    };

    let confirmations = match JsonLinesStore::new(path).all().await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return Err(ExitCode::FAILURE);
        }
    };

    ConsoleOutput::new(false, list_config.json, false).print_confirmations(&confirmations);
    Ok(())
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                     DEPCONF v0.1.0                           ║\x1b[0m");
    println!("\x1b[36m║           Dependency Confusion Scanner                       ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
