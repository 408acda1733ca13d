//! shaperd — the traffic shaping control daemon.
//!
//! Serves the control surface and runs the telemetry and lease monitors as
//! independent background tasks. Actual traffic manipulation is delegated to
//! the kernel scheduler through `tc`; address leasing to the system's DHCP
//! daemon.

mod api;
mod settings;
mod state;
mod system;

use shaper_core::command::Executor as _;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{settings::Settings, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting shaperd");

    let settings = Settings::from_env();
    let state = AppState::new(settings.clone());

    if !system::has_root() {
        tracing::warn!("not running as root; queueing discipline changes will be rejected");
    }
    if state.executor.run("tc -V").await.is_err() {
        tracing::error!("`tc` not found; install the iproute2 package");
    }

    state.spawn_monitors();

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(settings.listen).await?;
    tracing::info!(addr = %settings.listen, "control surface listening");
    axum::serve(listener, app).await?;

    Ok(())
}
