//! Removal of blobs that no song row references anymore.

use super::GuardedLibraryStore;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserDeletionSummary {
    pub library_links_removed: usize,
    pub playlists_removed: usize,
    pub songs_deleted: usize,
    pub files_removed: usize,
}

/// Removes a stored blob. A file that is already gone counts as removed;
/// any other failure is logged and reported as false.
pub async fn remove_blob(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove blob {:?}: {}", path, e);
            false
        }
    }
}

/// Deletes a user and removes the files of every song that was only in its
/// library. Returns Ok(None) if the user does not exist.
pub async fn delete_user_and_reclaim(
    store: &GuardedLibraryStore,
    user_id: usize,
) -> Result<Option<UserDeletionSummary>> {
    let Some(deletion) = store.delete_user(user_id)? else {
        return Ok(None);
    };

    let mut files_removed = 0;
    for path in &deletion.orphaned_files {
        if remove_blob(path).await {
            files_removed += 1;
        }
    }
    info!(
        "Reclaimed {}/{} files of user {}",
        files_removed,
        deletion.orphaned_files.len(),
        user_id
    );

    Ok(Some(UserDeletionSummary {
        library_links_removed: deletion.library_links_removed,
        playlists_removed: deletion.playlists_removed,
        songs_deleted: deletion.songs_deleted,
        files_removed,
    }))
}
