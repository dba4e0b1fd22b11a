//! Config validation CLI tool
//!
//! Validates a snapschedd configuration file and reports any errors.

use snapsched_config::ConfigError;
use snapsched_util::default_config_path;
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
            eprintln!("Validates a snapschedd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match snapsched_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", snapsched_config::CURRENT_CONFIG_VERSION);
            println!("  Socket: {}", settings.daemon.socket_path.display());
            println!("  Snapshot directory: {}", settings.scheduler.snapshot_dir);
            match settings.scheduler.max_consecutive_failures {
                0 => println!("  Missing paths: never deactivated"),
                n => println!("  Missing paths: deactivated after {} failures", n),
            }
            if let Some(default_fs) = &settings.default_fs {
                println!("  Default filesystem: {}", default_fs);
            }

            println!();
            println!("Filesystems:");
            for fs in &settings.filesystems {
                println!(
                    "  - {}: {} (metadata in {})",
                    fs.name,
                    fs.root.display(),
                    fs.metadata_dir.display()
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        snapsched_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
