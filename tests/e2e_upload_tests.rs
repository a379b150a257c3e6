//! End-to-end tests for uploads, deduplication and quota
//!
//! Tests content-addressed storage over HTTP: new content is stored once,
//! identical content is shared between libraries, and every rejection
//! leaves no file behind.

mod common;

use common::{
    mp3_bytes, text_bytes, wav_bytes, TestClient, TestServer, TEST_MAX_UPLOAD_BYTES,
    TEST_QUOTA_BYTES,
};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_upload_stores_new_song() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    let response = client.upload("First Song.mp3", mp3_bytes(4096, 1)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Song uploaded successfully");
    assert_eq!(body["deduplicated"], false);
    assert_eq!(body["song"]["id"], body["song_id"]);
    assert_eq!(body["song"]["original_filename"], "First Song.mp3");
    assert_eq!(body["song"]["filesize"], 4096);
    assert_eq!(body["song"]["mime_type"], "audio/mpeg");
    assert!(body["song"]["filename"].as_str().unwrap().ends_with(".mp3"));

    let files = server.stored_files();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].file_name().unwrap().to_str().unwrap(),
        body["song"]["filename"].as_str().unwrap()
    );
}

#[tokio::test]
async fn test_identical_content_is_shared() {
    let server = TestServer::spawn().await;
    let alice = TestClient::authenticated(server.base_url.clone(), &server.user_token);
    let bob = TestClient::authenticated(server.base_url.clone(), &server.other_token);
    let content = mp3_bytes(10_000, 2);

    let first: Value = alice
        .upload("mine.mp3", content.clone())
        .await
        .json()
        .await
        .unwrap();

    let response = bob.upload("renamed.mp3", content.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second: Value = response.json().await.unwrap();
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["song_id"], first["song_id"]);
    assert_eq!(
        second["message"],
        "Song already exists on server. Access granted"
    );

    // Uploading it again is a no-op for bob
    let third: Value = bob.upload("again.mp3", content).await.json().await.unwrap();
    assert_eq!(third["deduplicated"], true);
    assert_eq!(third["message"], "Song already exists in your library");

    assert_eq!(server.store.count_songs().unwrap(), 1);
    assert_eq!(server.stored_files().len(), 1);

    let usage: Value = bob.storage_usage().await.json().await.unwrap();
    assert_eq!(usage["used_bytes"], 10_000);
}

#[tokio::test]
async fn test_upload_keeps_metadata() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    let response = client
        .upload_with_metadata(
            "track.wav",
            wav_bytes(2048, 3),
            &[
                ("title", "Morning"),
                ("artist", "The Testers"),
                ("album", "Fixtures"),
                ("genre", "Ambient"),
                ("year", "1999"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let mime_type = body["song"]["mime_type"].as_str().unwrap();
    assert!(mime_type.starts_with("audio/") && mime_type.contains("wav"));

    let song: Value = client
        .get_song(body["song_id"].as_u64().unwrap())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(song["title"], "Morning");
    assert_eq!(song["artist"], "The Testers");
    assert_eq!(song["album"], "Fixtures");
    assert_eq!(song["genre"], "Ambient");
    assert_eq!(song["year"], 1999);
}

#[tokio::test]
async fn test_unsupported_content_is_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    // The extension does not matter, only the content does
    let response = client.upload("notes.mp3", text_bytes(600)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "unsupported_mime");
    assert!(body["detected_mime"].is_string());
    assert!(body["allowed_formats"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "mp3"));
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    let response = client
        .upload("huge.mp3", mp3_bytes(TEST_MAX_UPLOAD_BYTES as usize + 1, 4))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "file_too_large");
    assert_eq!(body["max_upload_bytes"], TEST_MAX_UPLOAD_BYTES);
    assert!(server.stored_files().is_empty());
    assert_eq!(server.store.count_songs().unwrap(), 0);
}

#[tokio::test]
async fn test_empty_and_missing_files_are_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    let response = client.upload("empty.mp3", vec![]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "file_empty");

    let response = client
        .upload_form(Form::new().text("title", "No file here"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "file_missing");

    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_quota_is_enforced() {
    let server = TestServer::spawn_with(6000, 4).await;
    let alice = TestClient::authenticated(server.base_url.clone(), &server.user_token);
    let bob = TestClient::authenticated(server.base_url.clone(), &server.other_token);

    alice.upload_ok("a.mp3", mp3_bytes(5000, 5)).await;

    let response = alice.upload("b.mp3", mp3_bytes(2000, 6)).await;
    assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "storage_quota_exceeded");
    assert_eq!(body["used_bytes"], 5000);
    assert_eq!(body["quota_bytes"], 6000);
    assert_eq!(server.stored_files().len(), 1);

    // Linking existing content counts against the linking user too
    bob.upload_ok("c.mp3", mp3_bytes(2000, 7)).await;
    let response = bob.upload("a-copy.mp3", mp3_bytes(5000, 5)).await;
    assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["used_bytes"], 2000);
    assert_eq!(server.store.count_songs().unwrap(), 2);
}

#[tokio::test]
async fn test_storage_usage_reports_remaining() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    let usage: Value = client.storage_usage().await.json().await.unwrap();
    assert_eq!(usage["used_bytes"], 0);
    assert_eq!(usage["quota_bytes"], TEST_QUOTA_BYTES);
    assert_eq!(usage["remaining_bytes"], TEST_QUOTA_BYTES);

    client.upload_ok("a.mp3", mp3_bytes(3000, 8)).await;
    let usage: Value = client.storage_usage().await.json().await.unwrap();
    assert_eq!(usage["used_bytes"], 3000);
    assert_eq!(usage["remaining_bytes"], TEST_QUOTA_BYTES - 3000);
}

#[tokio::test]
async fn test_upload_requires_session() {
    let server = TestServer::spawn().await;
    let anonymous = TestClient::new(server.base_url.clone());
    let bogus = TestClient::authenticated(server.base_url.clone(), "not-a-real-token");

    for client in [anonymous, bogus] {
        let response = client.upload("a.mp3", mp3_bytes(1000, 9)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert!(server.stored_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_uploads_store_once() {
    let server = TestServer::spawn_with(TEST_QUOTA_BYTES, 8).await;
    let content = mp3_bytes(50_000, 10);

    let mut handles = vec![];
    for i in 0..6 {
        let token = if i % 2 == 0 {
            server.user_token.clone()
        } else {
            server.other_token.clone()
        };
        let base_url = server.base_url.clone();
        let content = content.clone();
        handles.push(tokio::spawn(async move {
            let client = TestClient::authenticated(base_url, &token);
            let response = client.upload("same.mp3", content).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: Value = response.json().await.unwrap();
            body["song_id"].as_u64().unwrap()
        }));
    }

    let mut ids = vec![];
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(server.store.count_songs().unwrap(), 1);
    assert_eq!(server.stored_files().len(), 1);
}

#[tokio::test]
async fn test_upload_outcomes_are_counted() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone(), &server.user_token);

    client.upload_ok("a.mp3", mp3_bytes(1234, 11)).await;
    client.upload("bad.mp3", text_bytes(100)).await;

    let rendered = server.metrics.render().unwrap();
    assert!(rendered.contains("cloudtune_upload_bytes_total 1234"));
    assert!(rendered.contains("outcome=\"created\""));
    assert!(rendered.contains("reason=\"unsupported_mime\""));
}
