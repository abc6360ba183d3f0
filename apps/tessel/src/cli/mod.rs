//! # Tessel CLI Module
//!
//! This module implements the CLI interface for Tessel.
//!
//! ## Available Commands
//!
//! - `init` - Create a new database
//! - `status` - Show graph status
//! - `add-node` / `add-edge` / `del-node` - Edit the graph
//! - `props` / `set-prop` - Read and write node properties
//! - `descendants` / `ancestors` - Traverse the graph
//! - `register-group` / `group-node` - Allocate grouped node ids
//! - `export` / `import` - Move data through binary snapshots
//! - `hash` - Compute the BLAKE3 digest of the graph snapshot

mod commands;

use crate::config::{FileConfig, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessel_core::TesselError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessel - embeddable property-graph storage
///
/// Every command opens the redb database, runs, and exits.
#[derive(Parser, Debug)]
#[command(name = "tessel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the graph database [default: tessel.redb]
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Graph name used for edge types and grouped ids [default: main]
    #[arg(short = 'G', long, global = true)]
    pub graph: Option<String>,

    /// Configuration file [default: tessel.toml when present]
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Merge flags with the configuration file and defaults.
    pub fn settings(&self) -> Result<Settings, TesselError> {
        let file = FileConfig::discover(self.config.as_deref())?;
        Settings::resolve(self.database.clone(), self.graph.clone(), file)
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show graph status
    Status,

    /// Create a node
    AddNode {
        /// Node id
        id: String,

        /// Initial property as name=value (repeatable)
        #[arg(short, long = "prop")]
        props: Vec<String>,
    },

    /// Create an edge between two existing nodes
    AddEdge {
        /// Source node id
        from: String,

        /// Destination node id
        to: String,

        /// Edge type (untyped when omitted)
        #[arg(short = 't', long)]
        edge_type: Option<String>,
    },

    /// Delete a node and its edges
    DelNode {
        /// Node id
        id: String,
    },

    /// Show the properties of a node
    Props {
        /// Node id
        id: String,
    },

    /// Set or remove a node property
    SetProp {
        /// Node id
        id: String,

        /// Property name
        name: String,

        /// New value; the property is removed when omitted
        value: Option<String>,
    },

    /// List every node reachable over outgoing edges
    Descendants {
        /// Start node id
        id: String,

        /// Only follow edges of this type
        #[arg(short = 't', long)]
        edge_type: Option<String>,
    },

    /// List every node that reaches the given one
    Ancestors {
        /// Start node id
        id: String,

        /// Only follow edges of this type
        #[arg(short = 't', long)]
        edge_type: Option<String>,
    },

    /// Register a node group
    RegisterGroup {
        /// Group name
        group: String,
    },

    /// Create a node in a registered group
    GroupNode {
        /// Group name
        group: String,

        /// Explicit suffix; the next counter value is used when omitted
        #[arg(short, long)]
        suffix: Option<String>,
    },

    /// Export the graph as a binary snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a binary snapshot into the graph
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 cryptographic hash of the graph snapshot
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and resolved settings.
pub fn execute(cli: Cli, settings: Settings) -> Result<(), TesselError> {
    let ctx = Context {
        database: settings.database,
        graph: settings.graph,
        json_mode: cli.json_mode,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::AddNode { id, props }) => cmd_add_node(&ctx, &id, &props),
        Some(Commands::AddEdge {
            from,
            to,
            edge_type,
        }) => cmd_add_edge(&ctx, &from, &to, edge_type.as_deref()),
        Some(Commands::DelNode { id }) => cmd_del_node(&ctx, &id),
        Some(Commands::Props { id }) => cmd_props(&ctx, &id),
        Some(Commands::SetProp { id, name, value }) => {
            cmd_set_prop(&ctx, &id, &name, value.as_deref())
        }
        Some(Commands::Descendants { id, edge_type }) => {
            cmd_walk(&ctx, &id, edge_type.as_deref(), WalkKind::Descendants)
        }
        Some(Commands::Ancestors { id, edge_type }) => {
            cmd_walk(&ctx, &id, edge_type.as_deref(), WalkKind::Ancestors)
        }
        Some(Commands::RegisterGroup { group }) => cmd_register_group(&ctx, &group),
        Some(Commands::GroupNode { group, suffix }) => {
            cmd_group_node(&ctx, &group, suffix.as_deref())
        }
        Some(Commands::Export { output }) => cmd_export(&ctx, &output),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
        Some(Commands::Hash) => cmd_hash(&ctx),
    }
}
