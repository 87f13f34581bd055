// ABOUTME: CLI entry point for the tether tool.
// ABOUTME: Dispatches probe, config and version subcommands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tether_cli::{parse_arg, probe, ProbeOptions, VERSION};
use tether_core::{ArgValue, ChannelRegistry, Config};
use tether_grpc::TonicConnector;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Probe shared client channels")]
#[command(version)]
struct Cli {
    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open channels to a target and report their state
    Probe(ProbeArgs),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show version information
    Version,
}

#[derive(Args)]
struct ProbeArgs {
    /// Target address (host:port or URL)
    target: String,

    /// Load configuration from a file
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Attempt to connect and wait for READY
    #[arg(long)]
    connect: bool,

    /// Seconds to wait for READY with --connect
    #[arg(long, default_value_t = 5)]
    wait_secs: u64,

    /// Number of handles to open
    #[arg(long, default_value_t = 1)]
    handles: usize,

    /// Use a private channel instead of the shared one
    #[arg(long)]
    force_new: bool,

    /// Use TLS with the system roots
    #[arg(long)]
    tls: bool,

    /// Channel argument as key=value (repeatable)
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_arg_flag)]
    args: Vec<(String, ArgValue)>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default config file if missing
    Init,

    /// Print the effective configuration
    Show {
        /// Config file path
        #[arg(long, env = "TETHER_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn parse_arg_flag(raw: &str) -> Result<(String, ArgValue), String> {
    parse_arg(raw).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tether_log::init_with_level(tether_log::level_for_verbosity(cli.verbose));

    match cli.command {
        Commands::Probe(args) => run_probe(args),
        Commands::Config(cmd) => run_config(cmd),
        Commands::Version => {
            println!("tether {VERSION}");
            Ok(())
        }
    }
}

/// Probe a target through the process-wide registry
fn run_probe(args: ProbeArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let connector =
        TonicConnector::new(config.transport.clone()).context("Failed to start transport")?;
    let registry = ChannelRegistry::init_global(ChannelRegistry::with_config(
        connector,
        config.registry.clone(),
    ))?;

    let options = ProbeOptions {
        target: args.target,
        args: args.args,
        handles: args.handles,
        connect: args.connect,
        wait: Duration::from_secs(args.wait_secs),
        force_new: args.force_new,
        tls: args.tls,
    };
    let result = probe(registry, &options);

    let released = registry.shutdown();
    tracing::debug!(released, "registry shut down");

    println!("{}", result?);
    Ok(())
}

fn run_config(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init => {
            let path = Config::init()?;
            println!("Config file: {}", path.display());
            Ok(())
        }
        ConfigCommands::Show { config } => {
            let config = load_config(config.as_ref())?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_probe_flags_parse() {
        let cli = Cli::try_parse_from([
            "tether",
            "probe",
            "localhost:50051",
            "--handles",
            "3",
            "--arg",
            "grpc.keepalive_time_ms=500",
            "--arg",
            "grpc.primary_user_agent=probe",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.handles, 3);
        assert_eq!(args.args.len(), 2);
        assert!(!args.connect);
    }

    #[test]
    fn test_bad_arg_flag_rejected() {
        assert!(Cli::try_parse_from(["tether", "probe", "h:1", "--arg", "nokey"]).is_err());
    }
}
