//! Music Keeper - a music library synchronization tool.
//!
//! Scans a filesystem tree of audio files, extracts embedded metadata,
//! and reconciles the result against a persisted catalog of artists,
//! albums, and songs.

pub mod art;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("music_keeper=info".parse()?))
        .init();

    cli::run_command(&args)
}
