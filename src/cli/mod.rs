//! Command-line interface for the batch drivers.
//!
//! Three subcommands, each driven by a configuration file: `embed-batch`,
//! `extract`, and `remove-batch`. Exit codes are part of the contract:
//!
//! | code | meaning                                         |
//! |------|-------------------------------------------------|
//! | 0    | full success                                    |
//! | 1    | at least one per-image failure (batch finished) |
//! | 2    | unusable configuration                          |
//! | 3    | ledger corruption                               |

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::batch::{self, BatchReport, ExtractReport};
use crate::config::BatchConfig;
use crate::error::RevmarkError;

#[derive(Parser)]
#[command(name = "revmark")]
#[command(version = "0.1.0")]
#[command(about = "Reversible image watermarking with a hash-chained transaction ledger")]
#[command(after_help = "Examples:
    # Watermark every image listed by the configuration
    revmark embed-batch batch.json

    # Recover watermarks without touching the images
    revmark extract batch.json

    # Restore the exact originals and record the removal
    revmark remove-batch batch.json")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Embed a fresh watermark into every image in the configured directory
    EmbedBatch {
        /// Batch configuration file
        config: PathBuf,
    },
    /// Extract watermarks and match them against the ledger
    Extract {
        /// Batch configuration file
        config: PathBuf,
    },
    /// Remove watermarks, restoring and authenticating the originals
    RemoveBatch {
        /// Batch configuration file
        config: PathBuf,
    },
}

impl Cli {
    /// Runs the selected subcommand and returns the process exit code.
    pub fn run(&self) -> i32 {
        match &self.command {
            Command::EmbedBatch { config } => run_embed_batch(config),
            Command::Extract { config } => run_extract(config),
            Command::RemoveBatch { config } => run_remove_batch(config),
        }
    }
}

/// Exit code for an error that aborted a whole batch.
///
/// Per-image failures never abort, so anything else is either ledger
/// corruption or a configuration the drivers cannot run with.
fn abort_code(err: &RevmarkError) -> i32 {
    match err {
        RevmarkError::LedgerCorrupt { .. } => 3,
        _ => 2,
    }
}

fn load_config(path: &Path) -> Result<BatchConfig, i32> {
    BatchConfig::load(path).map_err(|err| {
        eprintln!("[{}] {err}", err.kind());
        2
    })
}

fn batch_exit(report: &BatchReport) -> i32 {
    for failure in &report.failed_images {
        eprintln!("failed: {failure}");
    }
    println!(
        "block {}: {}/{} images processed",
        report.block_number, report.processed_images, report.total_images
    );
    if report.is_full_success() { 0 } else { 1 }
}

fn run_embed_batch(config_path: &Path) -> i32 {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match batch::embed_batch(&config) {
        Ok(report) => batch_exit(&report),
        Err(err) => {
            eprintln!("[{}] {err}", err.kind());
            abort_code(&err)
        }
    }
}

fn run_remove_batch(config_path: &Path) -> i32 {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match batch::remove_batch(&config) {
        Ok(report) => batch_exit(&report),
        Err(err) => {
            eprintln!("[{}] {err}", err.kind());
            abort_code(&err)
        }
    }
}

fn extract_exit(report: &ExtractReport) -> i32 {
    for failure in &report.failed_images {
        eprintln!("failed: {failure}");
    }
    for record in &report.records {
        println!(
            "{}: watermark {} (block {}, ber {:.4})",
            record.path.display(),
            record.watermark,
            record.block_number,
            record.ber
        );
    }
    if report.is_full_success() { 0 } else { 1 }
}

fn run_extract(config_path: &Path) -> i32 {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match batch::extract_batch(&config) {
        Ok(report) => extract_exit(&report),
        Err(err) => {
            eprintln!("[{}] {err}", err.kind());
            abort_code(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unusable_configuration_exits_two() {
        assert_eq!(run_embed_batch(Path::new("nope/missing.json")), 2);
        assert_eq!(run_remove_batch(Path::new("nope/missing.json")), 2);
        assert_eq!(run_extract(Path::new("nope/missing.json")), 2);
    }

    #[test]
    fn abort_codes_map_error_kinds() {
        let corrupt = RevmarkError::LedgerCorrupt {
            path: PathBuf::from("chain.json"),
            block_number: 1,
            message: "previous_hash mismatch".to_string(),
        };
        assert_eq!(abort_code(&corrupt), 3);

        let config = RevmarkError::ConfigurationInvalid {
            path: PathBuf::from("batch.json"),
            message: "bad".to_string(),
        };
        assert_eq!(abort_code(&config), 2);
    }
}
