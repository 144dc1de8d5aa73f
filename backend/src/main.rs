use backend::config::Config;
use backend::{app, AppState};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.persist_path.is_none() {
        info!("PERSIST_PATH not set, codes are kept in memory only");
    }

    let state = AppState::from_config(&config).await;
    let app = app(state).layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting server on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
