//! Binary entrypoint for the uReport service.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ureport_engine::{Config, Engine, Store};
use ureport_service::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://ureports.db".into());
  let port: u16 = std::env::var("PORT")
    .unwrap_or_else(|_| "5005".into())
    .parse()?;

  // Unknown policy names and bad values stop the service here, not per request.
  let config = Config::from_env()?;
  tracing::info!(policy = %config.known_policy, "configuration loaded");

  let store = Store::open(&database_url).await?;
  let state = Arc::new(AppState {
    engine: Engine::new(store, config),
    public_url: std::env::var("PUBLIC_URL").ok(),
  });

  let app = router(state);

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  tracing::info!("ureport-service listening on http://{}", addr);

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
