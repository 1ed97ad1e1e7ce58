//! Command-line interface definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use fibpipe::channel::InputPolicy;
use fibpipe::interface::InterfaceConfig;
use fibpipe::logging::LogConfig;
use fibpipe::paths;
use fibpipe::server::ServerConfig;

/// Fibonacci over a named pipe, with a CPU-time budget.
#[derive(Parser, Debug)]
#[command(name = "fibpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server: create the pipe, launch the interface, compute.
    Serve(ServeArgs),

    /// Read numbers from stdin and send them down the pipe.
    ///
    /// Normally launched by `serve`; can be run by hand against an existing
    /// server pipe.
    Interface(InterfaceArgs),
}

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// CPU-time budget in seconds.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub cpu_limit: u64,

    /// Where to create the request pipe [default: $TMPDIR/fibpipe-<pid>.fifo].
    #[arg(long, env = "FIBPIPE_PIPE")]
    pub pipe: Option<PathBuf>,

    /// Milliseconds between "waiting for workers" reports during shutdown.
    #[arg(long, env = "FIBPIPE_DRAIN_INTERVAL_MS", default_value_t = 1000)]
    pub drain_interval: u64,

    /// Treat malformed input like C atoi: no digits means the sentinel.
    #[arg(long)]
    pub lenient: bool,

    /// Executable to launch as the interface (defaults to this binary).
    #[arg(long, hide = true)]
    pub interface_exe: Option<PathBuf>,
}

/// Arguments for the interface command.
#[derive(Args, Debug)]
pub struct InterfaceArgs {
    /// The server's request pipe.
    pub pipe: PathBuf,

    /// Treat malformed input like C atoi: no digits means the sentinel.
    #[arg(long)]
    pub lenient: bool,
}

fn policy(lenient: bool) -> InputPolicy {
    if lenient {
        InputPolicy::Lenient
    } else {
        InputPolicy::Strict
    }
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig::from_verbosity(self.verbose, self.quiet)
    }

    /// Global flags to repeat for a launched interface.
    pub fn forwarded_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.no_color {
            flags.push("--no-color".to_string());
        }
        if self.quiet {
            flags.push("--quiet".to_string());
        } else if self.verbose > 0 {
            flags.push(format!("-{}", "v".repeat(usize::from(self.verbose))));
        }
        flags
    }
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            cpu_limit_secs: self.cpu_limit,
            pipe: paths::resolve_fifo_path(self.pipe.as_deref()),
            drain_interval: Duration::from_millis(self.drain_interval.max(1)),
            policy: policy(self.lenient),
            ..ServerConfig::default()
        }
    }
}

impl InterfaceArgs {
    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            pipe: paths::expand_tilde(&self.pipe),
            policy: policy(self.lenient),
        }
    }
}
