mod auth;
mod models;
mod pagination;
mod reclaim;
mod schema;
mod sqlite_library_store;
mod store;

use std::sync::Arc;

pub use auth::{AuthToken, AuthTokenValue};
pub use models::*;
pub use pagination::{ListParams, ListQuery, Page, PageEnvelope, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use reclaim::{delete_user_and_reclaim, remove_blob, UserDeletionSummary};
pub use sqlite_library_store::SqliteLibraryStore;
pub use store::{LibraryStore, PlaylistStore, SongStore, UserStore};

pub type GuardedLibraryStore = Arc<dyn LibraryStore>;
