//! # Tessel
//!
//! The `tessel` command-line tool over a redb-backed property graph.
//!
//! - `cli`: argument parsing and command implementations
//! - `config`: optional TOML configuration merged under the flags

pub mod cli;
pub mod config;
