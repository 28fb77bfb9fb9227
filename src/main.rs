use std::sync::Arc;
use analysis_gateway::{routes, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    if config.uses_default_secret() {
        tracing::warn!("JWT_SECRET is not set; using the built-in development secret");
    }
    for route in config.routes() {
        tracing::info!(service = route.name, mount = route.mount, target = %route.target, "Proxy route");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config));
    tracing::info!(
        max_requests = state.rate_limiter.max_requests(),
        window_secs = state.rate_limiter.window().as_secs(),
        trust_proxy = state.config.trust_proxy,
        "Rate limiting enabled"
    );

    // Sweep expired rate-limit windows so idle clients don't accumulate.
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweeper_state.rate_limiter.window());
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sweeper_state.rate_limiter.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "Swept expired rate-limit windows");
            }
        }
    });

    let (addr, server) = match warp::serve(routes(state)).try_bind_with_graceful_shutdown(
        ([0, 0, 0, 0], port),
        async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        },
    ) {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(error = %e, port, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("API Gateway running on http://{}", addr);
    server.await;
    tracing::info!("API Gateway stopped");
}
