//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incremental code knowledge graph with retrieval-augmented answers.
///
/// Every command prints its JSON response on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "kgraph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: `KGRAPH_CONFIG`, then config/kgraph.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a change batch (`{"workspaceId", "changes", "replace"}`)
    Sync {
        /// JSON request file, or `-` for stdin
        #[arg(long, default_value = "-")]
        request: String,
    },

    /// Answer a question from the indexed functions
    Ask {
        question: String,

        /// Restrict retrieval to one workspace
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Content hashes of a workspace's mirrored files
    Manifest {
        #[arg(short, long)]
        workspace: String,
    },

    /// Print the mirrored content of one file
    Cat {
        #[arg(short, long)]
        workspace: String,

        #[arg(short, long)]
        path: String,
    },

    /// Node and edge counts
    Status {
        /// Counts for one workspace instead of the whole store
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Clear one workspace, or everything
    Reset {
        #[arg(long, conflicts_with = "workspace")]
        all: bool,

        #[arg(short, long, required_unless_present = "all")]
        workspace: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reset_needs_a_target() {
        assert!(Cli::try_parse_from(["kgraph", "reset"]).is_err());
        assert!(Cli::try_parse_from(["kgraph", "reset", "--all", "-w", "ws"]).is_err());
        let cli = Cli::try_parse_from(["kgraph", "reset", "--workspace", "ws"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Reset { all: false, workspace: Some(ref w) } if w == "ws"
        ));
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::try_parse_from(["kgraph", "status", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::Status { workspace: None }));
    }

    #[test]
    fn sync_reads_stdin_by_default() {
        let cli = Cli::try_parse_from(["kgraph", "sync"]).unwrap();
        assert!(matches!(cli.command, Command::Sync { ref request } if request == "-"));
    }
}
