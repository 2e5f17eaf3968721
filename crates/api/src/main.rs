use huddle_api::{build_router, state::AppState};
use huddle_config::Settings;
use huddle_core::lifecycle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "huddle_api=debug,huddle_core=debug,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    info!(
        "Starting Huddle SFU signaling on {}:{}",
        settings.app.host, settings.app.port
    );

    let app_state = AppState::new(settings.clone())?;
    let registry = app_state.registry.clone();

    let app = build_router(app_state);

    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            lifecycle::drain(&registry).await;
        })
        .await?;

    Ok(())
}
