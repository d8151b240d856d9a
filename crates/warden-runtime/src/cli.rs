//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warden", about = "Session lifecycle supervisor", version)]
pub struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short = 'c', global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Supervise a session interactively (commands on stdin)
    Run(RunOpts),
    /// Replay a JSON scenario against a virtual clock
    Simulate(SimulateOpts),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args, Debug, Default)]
pub struct RunOpts {
    /// Backend base URL (overrides config and WARDEN_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Username whose credentials are already stored
    #[arg(long, requires = "token")]
    pub user: Option<String>,

    /// Stored token for --user
    #[arg(long, env = "WARDEN_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Route the client starts on (overrides navigation.start_path)
    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Args, Debug)]
pub struct SimulateOpts {
    /// Scenario file
    pub scenario: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}
