use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::config::{DEFAULT_SERVER_ADDR, SECTIONLEADER_CONFIG_ENV_VAR, SECTIONLEADER_HOME_ENV_VAR};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `sectionleader` provisions and supervises a fleet of Firecracker microVMs
#[derive(Debug, Parser)]
#[command(name = "sectionleader", author, version, styles=styles::styles())]
pub struct SectionleaderArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: SectionleaderSubcommand,

    /// Path to a TOML config file
    #[arg(short, long, env = SECTIONLEADER_CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Directory holding per-machine state
    #[arg(long, env = SECTIONLEADER_HOME_ENV_VAR)]
    pub home: Option<PathBuf>,

    /// Explicit Firecracker binary
    #[arg(long)]
    pub firecracker_bin: Option<PathBuf>,

    /// Return subnets, ports and names to their pools when a machine stops
    #[arg(long)]
    pub reclaim: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum SectionleaderSubcommand {
    /// Serve the HTTP API
    #[command(name = "serve")]
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value_t = DEFAULT_SERVER_ADDR)]
        addr: SocketAddr,
    },

    /// Manage machines from an interactive prompt
    #[command(name = "shell")]
    Shell,
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
