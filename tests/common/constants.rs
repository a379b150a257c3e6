//! Shared constants for end-to-end tests
//!
//! When test users or limits change, update only this file.

// ============================================================================
// Test Users
// ============================================================================

/// Handle of the user most tests act as
pub const TEST_USER: &str = "testuser";

/// Handle of a second user, for sharing and ownership tests
pub const OTHER_USER: &str = "otheruser";

// ============================================================================
// Upload Limits
// ============================================================================

/// Largest upload accepted by the default test server
pub const TEST_MAX_UPLOAD_BYTES: u64 = 256 * 1024;

/// Per-user quota of the default test server
pub const TEST_QUOTA_BYTES: u64 = 1024 * 1024;

/// Parallel uploads admitted by the default test server
pub const TEST_MAX_PARALLEL_UPLOADS: usize = 4;

// ============================================================================
// Timeouts
// ============================================================================

/// Server startup timeout (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Server ready check poll interval (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// HTTP request timeout (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Name the server gives the favorites playlist
pub const FAVORITES_NAME: &str = "Liked songs";
