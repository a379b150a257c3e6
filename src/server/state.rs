use axum::extract::FromRef;

use crate::library::GuardedLibraryStore;
use crate::playlist::PlaylistService;
use crate::upload::UploadService;
use std::sync::Arc;
use std::time::Instant;

use super::metrics::ServerMetrics;
use super::ServerConfig;

pub type GuardedUploadService = Arc<UploadService>;
pub type GuardedServerMetrics = Arc<ServerMetrics>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub store: GuardedLibraryStore,
    pub uploads: GuardedUploadService,
    pub playlists: PlaylistService,
    pub metrics: GuardedServerMetrics,
}

impl FromRef<ServerState> for GuardedLibraryStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedUploadService {
    fn from_ref(input: &ServerState) -> Self {
        input.uploads.clone()
    }
}

impl FromRef<ServerState> for PlaylistService {
    fn from_ref(input: &ServerState) -> Self {
        input.playlists.clone()
    }
}

impl FromRef<ServerState> for GuardedServerMetrics {
    fn from_ref(input: &ServerState) -> Self {
        input.metrics.clone()
    }
}
