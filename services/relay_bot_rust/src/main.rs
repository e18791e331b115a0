mod config;
mod discord;
mod formatters;
mod reconcile;
mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use discord::DiscordClient;
use dotenv::dotenv;
use log::info;
use reconcile::Relay;
use voidcast_rust_core::state::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting Voidcast relay...");

    let cfg = Config::from_env()?;
    info!(
        "Config: main channel={} hourly anchor minute={} locale={} tz={}",
        cfg.channel_id, cfg.poll_hour_minute, cfg.locale, cfg.timezone
    );

    let store = StateStore::new(cfg.state_path.clone());
    let state = store.load().context("loading state file")?;

    let gateway = DiscordClient::connect(&cfg.discord_token)
        .await
        .context("connecting to Discord")?;
    info!("Connected as user {}", gateway.user_id());

    let poll_hour_minute = cfg.poll_hour_minute;
    let relay = Arc::new(Relay::new(cfg, gateway, store, state)?);

    // Startup pass: force-republish every topic once.
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            relay.initial_run().await;
        });
    }

    // Hourly anchored loop for the coupled arbitration + incursions pair.
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            loop {
                scheduler::sleep_until_next_hour_minute(poll_hour_minute).await;
                relay.refresh_hourly_pair().await;
            }
        });
    }

    // Fixed-interval invasions loop.
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(reconcile::INVASION_POLL_INTERVAL).await;
                relay.refresh_invasions(false).await;
            }
        });
    }

    // Self-paced open-world loop: each pass computes its own next delay
    // from the soonest world phase change.
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            loop {
                let delay = relay.refresh_open_worlds(false).await;
                tokio::time::sleep(delay).await;
            }
        });
    }

    // The loops never join; the process runs until killed.
    std::future::pending::<()>().await;
    Ok(())
}
