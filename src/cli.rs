//! Command-line interface for Lookout
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::DEFAULT_CONFIG_PATH;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

/// Lookout - container healthcheck supervisor
#[derive(Parser)]
#[command(name = "lookout")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to reach the container when probing
#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Run the probe inside the container through `<runtime> exec`
    #[arg(long)]
    pub exec: bool,

    /// OCI runtime binary (overrides the config file)
    #[arg(long)]
    pub runtime: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Supervise a container's healthcheck until SIGINT/SIGTERM
    Monitor {
        /// Container ID
        #[arg(long)]
        cid: String,

        /// OCI bundle directory containing config.json
        #[arg(short, long)]
        bundle: PathBuf,

        #[command(flatten)]
        exec: ExecArgs,

        /// File descriptor of the parent sync pipe (stdout if unset)
        #[arg(long, env = "_OCI_SYNCPIPE")]
        sync_pipe_fd: Option<RawFd>,
    },

    /// Run a probe once and print its outcome
    Probe {
        /// Container ID passed to `<runtime> exec`
        #[arg(long, default_value = "")]
        cid: String,

        #[command(flatten)]
        exec: ExecArgs,

        /// Seconds before the probe is killed
        #[arg(long, default_value = "30")]
        timeout: i64,

        /// Probe command (use -- to separate from options)
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Validate a healthcheck annotation
    Validate {
        /// OCI bundle directory containing config.json
        #[arg(short, long, conflicts_with = "annotation", required_unless_present = "annotation")]
        bundle: Option<PathBuf>,

        /// Annotation JSON document
        #[arg(short, long)]
        annotation: Option<String>,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "lookout", &mut std::io::stdout());
    }
}
