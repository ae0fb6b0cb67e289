//! Command-line interface for music-keeper.
//!
//! This module provides CLI commands for synchronizing the catalog with
//! the library filesystem and for browsing what the catalog holds.

mod commands;

pub use commands::{Cli, Commands, run_command};
