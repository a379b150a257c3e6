//! HTTP client for end-to-end tests
//!
//! This module wraps reqwest and provides methods for all endpoints.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client sending a bearer token with every request
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    token: Option<String>,
}

impl TestClient {
    /// Creates a client that sends no credentials
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            token: None,
        }
    }

    /// Creates a client authenticated with the given token
    pub fn authenticated(base_url: String, token: &str) -> Self {
        let mut client = Self::new(base_url);
        client.token = Some(token.to_string());
        client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(&self, path: &str) -> Response {
        self.with_auth(self.client.get(self.url(path)))
            .send()
            .await
            .expect("GET request failed")
    }

    async fn delete(&self, path: &str) -> Response {
        self.with_auth(self.client.delete(self.url(path)))
            .send()
            .await
            .expect("DELETE request failed")
    }

    async fn post_json(&self, path: &str, body: &Value) -> Response {
        self.with_auth(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("POST request failed")
    }

    // ========================================================================
    // Server
    // ========================================================================

    /// GET /
    pub async fn get_stats(&self) -> Response {
        self.get("/").await
    }

    // ========================================================================
    // Songs
    // ========================================================================

    /// POST /v1/songs/upload with only the file part
    pub async fn upload(&self, filename: &str, content: Vec<u8>) -> Response {
        self.upload_form(Form::new().part("file", Part::bytes(content).file_name(filename.to_string())))
            .await
    }

    /// POST /v1/songs/upload with the file and descriptive fields
    pub async fn upload_with_metadata(
        &self,
        filename: &str,
        content: Vec<u8>,
        metadata: &[(&str, &str)],
    ) -> Response {
        let mut form = Form::new();
        for (key, value) in metadata {
            form = form.text(key.to_string(), value.to_string());
        }
        form = form.part("file", Part::bytes(content).file_name(filename.to_string()));
        self.upload_form(form).await
    }

    /// POST /v1/songs/upload with an arbitrary form
    pub async fn upload_form(&self, form: Form) -> Response {
        self.with_auth(self.client.post(self.url("/v1/songs/upload")))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// GET /v1/songs
    pub async fn list_songs(&self, query: &str) -> Response {
        self.get(&format!("/v1/songs{}", query)).await
    }

    /// GET /v1/songs/{id}
    pub async fn get_song(&self, song_id: u64) -> Response {
        self.get(&format!("/v1/songs/{}", song_id)).await
    }

    /// GET /v1/songs/{id}/download
    pub async fn download_song(&self, song_id: u64) -> Response {
        self.get(&format!("/v1/songs/{}/download", song_id)).await
    }

    /// DELETE /v1/songs/{id}
    pub async fn delete_song(&self, song_id: u64) -> Response {
        self.delete(&format!("/v1/songs/{}", song_id)).await
    }

    /// GET /v1/storage/usage
    pub async fn storage_usage(&self) -> Response {
        self.get("/v1/storage/usage").await
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    /// GET /v1/playlists
    pub async fn list_playlists(&self, query: &str) -> Response {
        self.get(&format!("/v1/playlists{}", query)).await
    }

    /// POST /v1/playlists
    pub async fn upsert_playlist(&self, body: Value) -> Response {
        self.post_json("/v1/playlists", &body).await
    }

    /// POST /v1/playlists with just a name
    pub async fn create_playlist(&self, name: &str) -> Response {
        self.upsert_playlist(json!({ "name": name })).await
    }

    /// POST /v1/playlists/favorites
    pub async fn ensure_favorites(&self) -> Response {
        self.with_auth(self.client.post(self.url("/v1/playlists/favorites")))
            .send()
            .await
            .expect("Favorites request failed")
    }

    /// DELETE /v1/playlists/{id}
    pub async fn delete_playlist(&self, playlist_id: u64) -> Response {
        self.delete(&format!("/v1/playlists/{}", playlist_id)).await
    }

    /// GET /v1/playlists/{id}/songs
    pub async fn playlist_songs(&self, playlist_id: u64) -> Response {
        self.get(&format!("/v1/playlists/{}/songs", playlist_id))
            .await
    }

    /// POST /v1/playlists/{id}/songs
    pub async fn add_song_to_playlist(&self, playlist_id: u64, song_id: u64) -> Response {
        self.post_json(
            &format!("/v1/playlists/{}/songs", playlist_id),
            &json!({ "song_id": song_id }),
        )
        .await
    }

    /// POST /v1/playlists/{id}/songs/bulk
    pub async fn bulk_add_to_playlist(&self, playlist_id: u64, song_ids: &[i64]) -> Response {
        self.post_json(
            &format!("/v1/playlists/{}/songs/bulk", playlist_id),
            &json!({ "song_ids": song_ids }),
        )
        .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Uploads content and returns the new song id, asserting success
    pub async fn upload_ok(&self, filename: &str, content: Vec<u8>) -> u64 {
        let response = self.upload(filename, content).await;
        let status = response.status();
        let body: Value = response.json().await.expect("Upload response is not JSON");
        assert_eq!(status, reqwest::StatusCode::OK, "Upload failed: {}", body);
        body["song_id"].as_u64().expect("Missing song_id")
    }

    /// Creates a playlist and returns its id, asserting success
    pub async fn create_playlist_ok(&self, name: &str) -> u64 {
        let response = self.create_playlist(name).await;
        let status = response.status();
        let body: Value = response.json().await.expect("Playlist response is not JSON");
        assert_eq!(status, reqwest::StatusCode::OK, "Create failed: {}", body);
        body["playlist_id"].as_u64().expect("Missing playlist_id")
    }
}
