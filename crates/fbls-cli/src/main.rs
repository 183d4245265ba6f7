use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod completion;
mod dispatch;
mod prompt;
mod render;

use completion::CliCompletionShell;

const LOG_ENV: &str = "FBLS_LOG";

#[derive(Parser, Debug)]
#[command(name = "fbls")]
#[command(about = "Acquire, update and launch flatbuffers-language-server", long_about = None)]
struct Cli {
    /// Use this server binary instead of searching PATH or the local cache.
    #[arg(long, global = true)]
    server_path: Option<PathBuf>,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a server binary, downloading one if needed.
    Resolve {
        /// Answer every prompt with its non-persistent "yes" choice.
        #[arg(long)]
        yes: bool,
    },
    /// Resolve without prompting and run the server over stdio.
    Serve {
        #[arg(last = true)]
        args: Vec<OsString>,
    },
    /// Check for a newer release of the cached server.
    Update {
        #[arg(long)]
        yes: bool,
    },
    Status,
    Config {
        #[command(subcommand)]
        setting: ConfigCommand,
    },
    /// Remove every installed version except the cached one.
    Prune,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    AutoDownload {
        #[arg(value_enum)]
        state: Toggle,
    },
    ServerPath {
        #[arg(required_unless_present = "unset", conflicts_with = "unset")]
        path: Option<PathBuf>,
        #[arg(long)]
        unset: bool,
    },
    /// Releases-latest endpoint the server is downloaded from.
    ReleaseUrl {
        #[arg(required_unless_present = "unset", conflicts_with = "unset")]
        url: Option<String>,
        #[arg(long)]
        unset: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Self::On
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dispatch::run_cli(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // stdout carries the language-server stream in `serve` mode.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
