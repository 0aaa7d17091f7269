use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::Args;
use display::Display;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::time::{Instant, MissedTickBehavior};

mod aggregator;
mod config;
mod display;
mod encode;
mod error;
mod font;
mod influx;
mod jobs;
mod measurement;
mod mesonet;
mod pixel;
mod render;
mod server;
mod snapshot;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    TermLogger::init(
        args.log_level,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run(args).await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run(args: Args) -> Result<(), anyhow::Error> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let display = Arc::new(Display::from_args(&args, client).context("Failed to set up display")?);
    log::info!(
        "refreshing {:?} every {:?}",
        display.job_names(),
        args.refresh_interval()
    );

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", args.listen))?;
    let server = tokio::spawn(server::serve(
        listener,
        display.snapshot().clone(),
        shutdown_signal(),
    ));

    let refresher = tokio::spawn(refresh_loop(Arc::clone(&display), args.refresh_interval()));

    match server.await {
        Ok(result) => result?,
        Err(e) => log::error!("HTTP server task failed: {e}"),
    }
    refresher.abort();

    Ok(())
}

/// Refreshes and renders once per `interval`. Each cycle gets `interval` to finish, so cycles
/// never overlap.
async fn refresh_loop(display: Arc<Display>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        match display.update_once(Instant::now() + interval).await {
            Ok(()) => log::info!("display updated: {:?}", display.snapshot().screen()),
            Err(e) => log::warn!("problem updating display: {e}"),
        }
        log::debug!("{:?}", display.snapshot().readings());
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for Ctrl+C signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}
