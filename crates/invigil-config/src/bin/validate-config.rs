//! Config validation CLI tool
//!
//! Validates an invigil configuration file and reports any errors.

use invigil_config::{StartGuard, StoreSettings};
use invigil_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates an invigil configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match invigil_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", invigil_config::CURRENT_CONFIG_VERSION);
            match &settings.store {
                StoreSettings::Memory => println!("  Store: memory"),
                StoreSettings::Sqlite { path } => println!("  Store: sqlite ({})", path.display()),
            }
            let guard = match settings.admin.start_guard {
                StartGuard::Leased => "leased",
                StartGuard::Unguarded => "unguarded (concurrent starts are not prevented)",
            };
            println!("  Start guard: {}", guard);
            println!("  Code retries: {}", settings.admin.code_retry_limit);
            println!("  Questions per exam: {}", settings.admin.question_count);
            println!(
                "  Enrollment ids: {}YYYY{}",
                settings.admin.enrollment_prefix,
                "N".repeat(settings.admin.enrollment_width)
            );
            println!(
                "  Client: poll every {}ms, {}s countdown, display tick {}ms",
                settings.client.poll_interval.as_millis(),
                settings.client.countdown_seconds,
                settings.client.tick_interval.as_millis()
            );

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                invigil_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                invigil_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                invigil_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                invigil_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        invigil_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
