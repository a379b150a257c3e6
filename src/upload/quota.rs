use crate::library::GuardedLibraryStore;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

/// Per-user storage quota. Usage is always computed from the library, never
/// cached, so it cannot drift from what the user actually holds.
///
/// `can_admit` is a pre-check only. The store re-checks inside the write
/// transaction that commits an upload, which is what makes the quota hard.
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: GuardedLibraryStore,
    quota_bytes: u64,
}

impl QuotaEnforcer {
    pub fn new(store: GuardedLibraryStore, quota_bytes: u64) -> Self {
        Self { store, quota_bytes }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    pub fn current_usage(&self, user_id: usize) -> Result<u64> {
        self.store.library_usage_bytes(user_id)
    }

    pub fn can_admit(&self, user_id: usize, additional_bytes: i64) -> Result<QuotaDecision> {
        let used_bytes = self.current_usage(user_id)?;
        Ok(QuotaDecision {
            allowed: admits(used_bytes, additional_bytes, self.quota_bytes),
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

/// Non-positive additions are always admitted.
pub fn admits(used_bytes: u64, additional_bytes: i64, quota_bytes: u64) -> bool {
    if additional_bytes <= 0 {
        return true;
    }
    used_bytes.saturating_add(additional_bytes as u64) <= quota_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{NewSong, SongMetadata, SqliteLibraryStore};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn admits_up_to_the_quota() {
        assert!(admits(90, 10, 100));
        assert!(!admits(90, 11, 100));
        assert!(admits(200, 0, 100));
        assert!(admits(200, -5, 100));
        assert!(!admits(u64::MAX, 1, u64::MAX - 1));
    }

    #[test]
    fn admission_is_monotonic_in_size() {
        let (used, quota) = (2_999, 3_000);
        let largest = (0..=10).rev().find(|n| admits(used, *n, quota)).unwrap();
        assert!((-3..=largest).all(|n| admits(used, n, quota)));
    }

    #[test]
    fn reports_usage_from_library() {
        let temp_dir = TempDir::new().unwrap();
        let store: GuardedLibraryStore =
            Arc::new(SqliteLibraryStore::new(temp_dir.path().join("test.db")).unwrap());
        let user_id = store.create_user("alice").unwrap();
        store
            .insert_song_and_link(
                &NewSong {
                    filename: "1_1.mp3".to_string(),
                    original_filename: "a.mp3".to_string(),
                    filepath: PathBuf::from("/tmp/1_1.mp3"),
                    filesize: 60,
                    content_hash: "aa".to_string(),
                    mime_type: "audio/mpeg".to_string(),
                    metadata: SongMetadata::default(),
                    uploader_id: user_id,
                },
                100,
            )
            .unwrap();

        let enforcer = QuotaEnforcer::new(store, 100);
        assert_eq!(enforcer.current_usage(user_id).unwrap(), 60);
        assert_eq!(
            enforcer.can_admit(user_id, 41).unwrap(),
            QuotaDecision {
                allowed: false,
                used_bytes: 60,
                quota_bytes: 100
            }
        );
        assert!(enforcer.can_admit(user_id, 40).unwrap().allowed);
    }
}
