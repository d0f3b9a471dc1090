use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use sift_server::{config::Config, relay::NotificationRelay, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    if let Err(e) = PrometheusBuilder::new().install() {
        warn!(error = %e, "prometheus exporter not installed");
    }

    let state = AppState::new(&config.redis_url).await?;
    match state.redis.ping().await {
        Ok(true) => info!("redis connection established"),
        _ => warn!("redis ping failed at startup, continuing anyway"),
    }

    // One relay subscription for the lifetime of the process; individual
    // websocket connections fan out from its broadcast channel.
    let relay = NotificationRelay::new(
        state.redis.clone(),
        state.updates.clone(),
        state.metrics.clone(),
    );
    tokio::spawn(relay.run());

    let app = routes::create_router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    info!(%addr, "ingestion API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
