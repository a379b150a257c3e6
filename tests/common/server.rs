//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own database and uploads root.

use super::constants::*;
use super::fixtures::create_test_db_with_users;
use cloudtune_server::config::UploadSettings;
use cloudtune_server::library::{GuardedLibraryStore, SqliteLibraryStore};
use cloudtune_server::server::{
    make_app, serve_until, RequestsLoggingLevel, ServerConfig, ServerMetrics, ServerState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated database and uploads root
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Store for direct database access in tests
    pub store: GuardedLibraryStore,

    /// Metrics of this instance
    pub metrics: Arc<ServerMetrics>,

    /// Upload settings the server runs with
    pub settings: UploadSettings,

    /// Token of TEST_USER
    pub user_token: String,

    /// Token of OTHER_USER
    pub other_token: String,

    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with the default test limits.
    pub async fn spawn() -> Self {
        Self::spawn_with(TEST_QUOTA_BYTES, TEST_MAX_PARALLEL_UPLOADS).await
    }

    /// Spawns a new test server with the given quota and upload concurrency.
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, binding fails or the
    /// server does not become ready in time.
    pub async fn spawn_with(quota_bytes: u64, max_parallel_uploads: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("cloudtune.db");
        let (user_token, other_token) =
            create_test_db_with_users(&db_path).expect("Failed to create test database");

        let store: GuardedLibraryStore =
            Arc::new(SqliteLibraryStore::new(&db_path).expect("Failed to open store"));

        let settings = UploadSettings {
            uploads_root: temp_dir.path().join("uploads"),
            max_upload_bytes: TEST_MAX_UPLOAD_BYTES,
            storage_quota_bytes: quota_bytes,
            max_parallel_uploads,
        };
        std::fs::create_dir_all(settings.songs_dir()).expect("Failed to create songs dir");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let metrics = Arc::new(ServerMetrics::new().expect("Failed to create metrics"));
        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let state = ServerState::new(config, store.clone(), &settings, metrics.clone());
        let app = make_app(state);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            serve_until(listener, app, async {
                shutdown_rx.await.ok();
            })
            .await
            .expect("Server failed");
        });

        let server = Self {
            base_url,
            store,
            metrics,
            settings,
            user_token,
            other_token,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Files currently in the songs directory, staging files included.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.settings.songs_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
