//! warden: session lifecycle supervisor binary.
//! Runs the lifecycle manager against a real clock, an HTTP backend and a
//! terminal prompt surface, or replays scenarios against a virtual clock.

use clap::Parser;
use tokio::sync::mpsc;
use warden_core::MemoryRoute;

mod backend;
mod cli;
mod clock;
mod config;
mod console;
mod event_loop;
mod identity;
mod prompt;
mod simulate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("WARDEN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::WardenConfig::load(args.config.as_deref())?;

    match args.command {
        cli::Command::Run(opts) => {
            if let Some(url) = opts.api_url {
                config.backend.base_url = url;
            }
            let policy = config.policy()?;
            let start_path = opts
                .path
                .unwrap_or_else(|| config.navigation.start_path.clone());

            tracing::info!(
                "warden starting against {} (session {:?}, inactivity {:?}, warning {:?})",
                config.backend.base_url,
                policy.session_duration,
                policy.inactivity_limit,
                policy.warning_window
            );

            let (tx, rx) = mpsc::unbounded_channel();
            let backend = backend::HttpBackend::new(&config.backend, tx.clone())?;
            let route = MemoryRoute::new(&start_path, &config.navigation.login_path);
            let supervisor = event_loop::Supervisor::new(
                policy,
                route,
                &config.navigation.start_path,
                Box::new(backend),
                tx,
                rx,
            );
            if let (Some(user), Some(token)) = (opts.user.as_deref(), opts.token.as_deref()) {
                supervisor.identity().restore(user, token);
            }
            supervisor.run().await?;
        }
        cli::Command::Simulate(opts) => {
            let report = simulate::run(&opts.scenario, opts.json)?;
            if !report.is_success() {
                anyhow::bail!(
                    "scenario {} had {} mismatch(es)",
                    report.name,
                    report.mismatches.len()
                );
            }
        }
        cli::Command::Config => {
            config.policy()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
