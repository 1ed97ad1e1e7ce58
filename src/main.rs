//! fibpipe - Fibonacci over a named pipe

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::info;

use cli::{Cli, Commands, InterfaceArgs, ServeArgs};
use fibpipe::server::{ProcessLauncher, Server};
use fibpipe::{interface, logging, theme};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if cli.no_color {
        theme::disable_colors();
    }
    logging::init(cli.log_config().with_env_overrides());

    let result = match &cli.command {
        Commands::Serve(args) => cmd_serve(&cli, args),
        Commands::Interface(args) => cmd_interface(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn cmd_serve(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let config = args.server_config();

    let mut launcher = match &args.interface_exe {
        Some(exe) => ProcessLauncher::new(exe, config.policy),
        None => ProcessLauncher::current_exe(config.policy)?,
    };
    for flag in cli.forwarded_flags() {
        launcher = launcher.with_global_arg(flag);
    }

    let pipe = config.pipe.clone();
    let server = Server::new(config);
    let summary = server
        .run(&launcher)
        .with_context(|| format!("server run on {} failed", pipe.display()))?;

    info!(
        outcomes = summary.outcomes.len(),
        cpu = ?summary.usage.cpu_time(),
        "Server summary"
    );
    Ok(())
}

fn cmd_interface(args: &InterfaceArgs) -> Result<()> {
    let config = args.interface_config();
    let summary = interface::run(&config)
        .with_context(|| format!("interface on {} failed", config.pipe.display()))?;
    info!(sent = summary.sent, "Interface summary");
    Ok(())
}
