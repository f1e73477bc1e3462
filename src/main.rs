use anyhow::Result;

use fiwes::{ServerConfig, http, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = ServerConfig::from_env();
    let router = http::router(&config)?;
    let tcp_listener = tokio::net::TcpListener::bind(config.http_addr.as_str()).await?;

    tracing::info!(
        addr = %config.http_addr,
        originals = %config.storage.original_root.display(),
        previews = %config.storage.preview_root.display(),
        "image server started"
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
