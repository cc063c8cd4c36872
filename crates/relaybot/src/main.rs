use std::sync::Arc;

use relaybot_scheduler::SchedulerEngine;
use relaybot_transport::{Channel, OutboundApi};
use tracing::{error, info};

mod app;
mod stdio_channel;

use app::{App, Paths};
use stdio_channel::StdioChannel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaybot=info".into()),
        )
        .init();

    let data_dir = std::env::var("RELAYBOT_DATA_DIR").unwrap_or_else(|_| ".".to_string());
    let paths = Paths::new(&data_dir);

    let mut channel = StdioChannel::new();
    if let Err(e) = channel.connect().await {
        error!(error = %e, "transport connect failed");
        std::process::exit(1);
    }
    let channel = Arc::new(channel);
    let build_poster: Arc<dyn OutboundApi> = channel.clone();
    let run_poster: Arc<dyn OutboundApi> = channel.clone();
    let channel: Arc<dyn Channel> = channel;

    let app = match App::build(&paths, build_poster).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler: Arc<SchedulerEngine> = app.scheduler.clone();
    tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    info!("relaybot started, reading from stdin");
    app.run(channel, run_poster).await;

    let _ = shutdown_tx.send(true);
    Ok(())
}
