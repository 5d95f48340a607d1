//! ---
//! vms_section: "05-networking-external-interfaces"
//! vms_subsection: "binary"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Control CLI for operators inspecting VMS bus traffic."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use vms_common::{init_cli, init_tracing, AppConfig, VersionInfo};

mod codec;
mod replay;

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["vms.toml", "/etc/vms/vms.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "VMS bus inspection and replay utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    /// Configuration file (defaults to VMS_CONFIG, ./vms.toml, /etc/vms/vms.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log through the configured service logging instead of warnings on stderr.
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encode a JSON message into channel values.
    Encode(codec::EncodeCommand),
    /// Decode channel values into a JSON message.
    Decode(codec::DecodeCommand),
    /// Resolve available layers from a JSON offering table.
    Resolve(codec::ResolveCommand),
    /// Feed recorded channel values through a dispatcher.
    Replay(replay::ReplayCommand),
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(&[path])
            .with_context(|| format!("unable to load configuration {}", path.display())),
        None => AppConfig::load_or_default(DEFAULT_CONFIG_CANDIDATES),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    let config = load_config(cli.config.as_ref())?;
    if cli.trace {
        init_tracing("vmsctl", &config.logging)?;
    } else {
        init_cli();
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see --help");
    };
    match command {
        Commands::Encode(cmd) => cmd.execute()?,
        Commands::Decode(cmd) => cmd.execute(&config)?,
        Commands::Resolve(cmd) => cmd.execute()?,
        Commands::Replay(cmd) => cmd.execute(config)?,
    }
    Ok(())
}
