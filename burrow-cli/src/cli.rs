//! CLI argument definitions

use burrow_core::NamespaceType;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "Linux namespace broker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve broker requests on an inherited channel
    Serve {
        /// Descriptor of the inherited channel end
        #[arg(long, default_value_t = 3)]
        fd: i32,

        /// Seconds to wait for a request before checking for shutdown
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
        receive_deadline: u64,
    },

    /// Create new flat namespaces and show their identifiers
    Rooms {
        /// Namespace types (cgroup, ipc, mnt, net, time, uts)
        #[arg(required = true)]
        types: Vec<NamespaceType>,
    },

    /// Show namespace information
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// Show version information
    Version,
}
