//! amqpmux - AMQP 0-9-1 connection probe
//!
//! Connects to a broker, reports the negotiated parameters, optionally
//! publishes one message and closes cleanly.

use amqpmux_client::{Connection, ConnectionConfig};
use amqpmux_protocol::method::BasicPublish;
use amqpmux_protocol::MessageProperties;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if AMQPMUX_CONFIG is set, then env overrides)
    let config = match ConnectionConfig::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("AMQPMUX_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting amqpmux probe");
    tracing::info!("  Endpoints: {}", config.endpoints.join(", "));
    tracing::info!("  Virtual host: {}", config.virtual_host);
    tracing::info!("  Auth mechanism: {}", config.auth_mechanism().name());

    let connection = Connection::connect(&config).await?;
    tracing::info!(
        "Negotiated: {}",
        serde_json::to_string(connection.tuning())?
    );

    let channel = connection.open_channel().await?;
    tracing::info!("Opened channel {}", channel.number());

    if let Ok(exchange) = std::env::var("AMQPMUX_PUBLISH_EXCHANGE") {
        let routing_key = std::env::var("AMQPMUX_PUBLISH_ROUTING_KEY").unwrap_or_default();
        let body = std::env::var("AMQPMUX_PUBLISH_BODY").unwrap_or_default();
        let properties = MessageProperties::new().with_content_type("text/plain");

        channel
            .send_with_content(
                BasicPublish::new(exchange.as_str(), routing_key.as_str()),
                &properties,
                body.as_bytes(),
            )
            .await?;
        tracing::info!(
            "Published {} bytes to exchange '{}' with routing key '{}'",
            body.len(),
            exchange,
            routing_key
        );
    }

    // Hold the connection open until interrupted when asked to
    if std::env::var("AMQPMUX_HOLD").is_ok() {
        tracing::info!("Holding connection open, press Ctrl-C to close");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, closing connection...");
            }
            reason = connection.wait_closed() => {
                tracing::error!("Connection closed by broker: {}", reason);
                return Err(reason.into());
            }
        }
    }

    channel.close().await?;
    connection.close().await?;

    tracing::info!("Connection closed");
    Ok(())
}
