use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use paperless_courier::backend::BackendClient;
use paperless_courier::config::{Config, RUN_ONCE};
use paperless_courier::relay::Relay;
use paperless_courier::smtp::SmtpMailer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = std::env::var("COURIER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/config.yaml"));
    let config = Arc::new(Config::load(&config_path)?);

    info!("paperless-courier v{}", env!("CARGO_PKG_VERSION"));
    info!(
        queue_tag = %config.paperless.queue_tag,
        processed_tag = %config.paperless.processed_tag,
        "Documents tagged for queuing will be delivered and marked processed"
    );
    for rule in &config.paperless.rules {
        info!(
            rule = %rule.name,
            tags = %rule.tags.join(","),
            recipients = %rule.recipients.join(","),
            "Loaded rule"
        );
    }

    let backend = Arc::new(BackendClient::new(
        config.paperless.instance_url.clone(),
        config.paperless.token.clone(),
    )?);
    let transport = Arc::new(SmtpMailer::new(&config.email));
    let relay = Relay::new(Arc::clone(&config), backend, transport);

    if config.run_every_minutes == RUN_ONCE {
        relay.run_cycle().await?;
        return Ok(());
    }

    let period = Duration::from_secs(config.run_every_minutes as u64 * 60);
    info!(minutes = config.run_every_minutes, "Scheduling processing loop");

    let mut tick = tokio::time::interval(period);
    // Cycles never overlap: the next tick is awaited only after the current
    // cycle returns, and a missed tick just fires late.
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        if let Err(e) = relay.run_cycle().await {
            error!(error = %e, "Processing cycle failed");
        }
    }
}
