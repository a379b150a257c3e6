//! Test fixture creation for the database and audio payloads
//!
//! Audio payloads are synthetic: only their leading bytes matter, since the
//! server detects the format from them. The rest is filled from a seed so
//! that different seeds give different digests.

use super::constants::*;
use anyhow::Result;
use cloudtune_server::library::{AuthTokenValue, SqliteLibraryStore, UserStore};
use std::path::Path;

/// A small MP3-looking payload: an ID3v2 header followed by seeded filler.
pub fn mp3_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x00".to_vec();
    fill(&mut bytes, len, seed);
    bytes
}

/// A small WAV-looking payload: RIFF/WAVE header followed by seeded filler.
pub fn wav_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&(len as u32).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    fill(&mut bytes, len, seed);
    bytes
}

/// Plain text, which must be rejected as an unsupported type.
pub fn text_bytes(len: usize) -> Vec<u8> {
    "just some notes, not music. ".repeat(len / 28 + 1).as_bytes()[..len].to_vec()
}

fn fill(bytes: &mut Vec<u8>, len: usize, seed: u8) {
    let mut value = seed;
    while bytes.len() < len {
        bytes.push(value);
        value = value.wrapping_mul(31).wrapping_add(7);
    }
}

/// Creates the test users in a fresh database and issues one token each.
/// Returns the tokens of TEST_USER and OTHER_USER, in this order.
pub fn create_test_db_with_users(db_path: &Path) -> Result<(String, String)> {
    let store = SqliteLibraryStore::new(db_path)?;

    let mut tokens = vec![];
    for handle in [TEST_USER, OTHER_USER] {
        let user_id = store.create_user(handle)?;
        let token = AuthTokenValue::generate();
        store.add_auth_token(user_id, &token)?;
        tokens.push(token.0);
    }
    let other = tokens.pop().unwrap_or_default();
    let test = tokens.pop().unwrap_or_default();
    Ok((test, other))
}
