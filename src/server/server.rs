use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use super::metrics::{metrics_handler, ServerMetrics};
use super::playlist_routes::playlist_routes;
use super::song_routes::{song_routes, storage_routes};
use super::upload_routes::upload_routes;
use super::{log_requests, state::*, ServerConfig};
use crate::config::UploadSettings;
use crate::library::GuardedLibraryStore;
use crate::playlist::PlaylistService;
use crate::upload::UploadService;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        store: GuardedLibraryStore,
        upload_settings: &UploadSettings,
        metrics: GuardedServerMetrics,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            hash: env!("GIT_HASH").to_owned(),
            uploads: Arc::new(UploadService::new(store.clone(), upload_settings)),
            playlists: PlaylistService::new(store.clone()),
            store,
            metrics,
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let songs: Router = song_routes()
        .merge(upload_routes())
        .with_state(state.clone());
    let storage: Router = storage_routes().with_state(state.clone());
    let playlists: Router = playlist_routes().with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/songs", songs)
        .nest("/v1/storage", storage)
        .nest("/v1/playlists", playlists)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app(metrics: GuardedServerMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serves `app` until `shutdown` resolves.
pub async fn serve_until<F>(listener: tokio::net::TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

pub async fn run_server(
    config: ServerConfig,
    metrics_port: u16,
    store: GuardedLibraryStore,
    upload_settings: &UploadSettings,
) -> Result<()> {
    tokio::fs::create_dir_all(upload_settings.songs_dir())
        .await
        .with_context(|| format!("Failed to create {:?}", upload_settings.songs_dir()))?;

    let metrics: GuardedServerMetrics = Arc::new(ServerMetrics::new()?);
    let port = config.port;
    let state = ServerState::new(config, store, upload_settings, metrics.clone());
    let app = make_app(state);

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    info!("Metrics server listening on port {}", metrics_port);
    let metrics_app = make_metrics_app(metrics);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!("Metrics server failed: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    serve_until(listener, app, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
}
