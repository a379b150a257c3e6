mod api_error;
pub mod config;
mod http_layers;
pub mod metrics;
mod playlist_routes;
pub mod server;
pub(self) mod session;
mod song_routes;
pub mod state;
mod upload_routes;

pub use api_error::ApiError;
pub use config::ServerConfig;
pub use http_layers::*;
pub use metrics::ServerMetrics;
#[allow(unused_imports)] // Used by main.rs and the e2e harness
pub use server::{make_app, make_metrics_app, run_server, serve_until};
pub use state::ServerState;
