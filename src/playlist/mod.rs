mod bulk;
mod service;

pub use bulk::{normalize_unique_ids, BulkAppendBody, BulkAppendReport};
pub use service::{
    PlaylistError, PlaylistRequest, PlaylistService, FAVORITES_PLAYLIST_DESCRIPTION,
    FAVORITES_PLAYLIST_NAME,
};
