use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use session_guard::config::{load_config, ConfigError, CoreConfig};
use session_guard::observability::init_logging;

#[derive(Parser)]
#[command(name = "session-guard")]
#[command(about = "Inspect and validate session-guard configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a config file, run every semantic check and print a summary
    Validate {
        path: PathBuf,
    },
    /// Print the default configuration as TOML
    Defaults,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => match load_config(&path) {
            Ok(config) => {
                init_logging(&config.observability);
                tracing::info!(path = %path.display(), "Configuration valid");
                print_summary(&config);
                ExitCode::SUCCESS
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("{}: {} problem(s)", path.display(), errors.len());
                for error in errors {
                    eprintln!("  - {}", error);
                }
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        },
        Commands::Defaults => match toml::to_string_pretty(&CoreConfig::default()) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: cannot render defaults: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn print_summary(config: &CoreConfig) {
    let session = &config.session;
    println!("vault:        expiry buffer {}s", config.vault.expiry_buffer_secs);
    println!(
        "anti-forgery: renew {}s early, endpoint {}",
        config.anti_forgery.renewal_buffer_secs,
        config.anti_forgery.endpoint.as_deref().unwrap_or("(host supplied)")
    );
    println!(
        "session:      idle {}s, warning {}s, throttle {}ms",
        session.idle_timeout_secs, session.warning_secs, session.activity_throttle_ms
    );
    if config.breakers.is_empty() {
        println!("breakers:     none");
    }
    for (target, b) in &config.breakers {
        println!(
            "breaker {}: open after {} failures for {}ms, close after {} successes, call timeout {}ms",
            target, b.failure_threshold, b.reset_timeout_ms, b.success_threshold, b.call_timeout_ms
        );
    }
}
