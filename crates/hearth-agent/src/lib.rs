use axum::{
    Router,
    routing::{get, post},
};
use hearth_console::ConsoleHub;

pub mod api;
pub mod console_ws;
pub mod docker;
pub mod resources;
pub mod settings;

#[derive(Clone)]
pub struct AppState {
    pub hub: ConsoleHub,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/console/:id", get(console_ws::console_ws))
        .route("/resources/:id/start", post(api::start))
        .route("/resources/:id/stop", post(api::stop))
        .route("/resources/:id/restart", post(api::restart))
        .route(
            "/resources/:id/integration",
            post(api::enable_integration).delete(api::disable_integration),
        )
        .with_state(state)
}
