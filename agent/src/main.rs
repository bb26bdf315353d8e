//! Attend Agent - captures badge reads and syncs them to the collection service.
//!
//! Reads identifiers line by line from a reader device (or stdin), stores them
//! durably and serves the inspection API over HTTP.

use attend_agent::config::Config;
use attend_agent::inspect::Inspector;
use attend_agent::orchestrator::{shutdown_signal, Orchestrator};
use attend_agent::source;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attend_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);
    let reader_path = config.reader_path.clone();

    tracing::info!(
        device_id = %config.device.device_id,
        api_url = %config.api_url,
        storage = %config.storage_path.display(),
        "Starting Attend Agent"
    );

    let orchestrator = Orchestrator::start(config).await?;
    let handle = orchestrator.handle();
    let cancel = orchestrator.cancel_token();

    // Badge reader
    let reader = match reader_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Reading badges from device");
            let file = tokio::fs::File::open(&path).await?;
            source::spawn_line_reader(BufReader::new(file), handle.events(), cancel.clone())
        }
        None => {
            tracing::info!("Reading badges from stdin");
            source::spawn_line_reader(
                BufReader::new(tokio::io::stdin()),
                handle.events(),
                cancel.clone(),
            )
        }
    };

    // Signals start draining
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    // Inspection server
    let app = attend_agent::app(Inspector::new(handle));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Inspection API listening on {}", addr);

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    orchestrator.run_until_cancelled().await?;

    match reader.await {
        Ok(Ok(read)) => tracing::info!(read, "Reader stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Reader failed"),
        Err(e) => tracing::warn!(error = %e, "Reader task panicked"),
    }
    server.await??;

    Ok(())
}
