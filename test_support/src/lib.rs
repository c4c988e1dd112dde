//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Common test fixtures and polling helpers for all crates

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique suffix for test resources (database files, queue names)
pub fn unique_suffix() -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", std::process::id(), n)
}

/// Temporary directory holding a fresh SQLite path.
///
/// Keep the returned `TempDir` alive for as long as the database is used.
pub fn temp_db_path() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir
        .path()
        .join(format!("userhub-test-{}.db", unique_suffix()))
        .to_string_lossy()
        .to_string();
    (dir, path)
}

/// Wire payload of a user-created event, as produced by the publisher
pub fn user_created_json(name: &str, email: &str) -> Vec<u8> {
    serde_json::json!({ "type": "user_created", "name": name, "email": email })
        .to_string()
        .into_bytes()
}

/// Wire payload of a user-creation-failed event
pub fn user_creation_failed_json(email: &str, reason: &str) -> Vec<u8> {
    serde_json::json!({
        "type": "user_creation_failed",
        "attemptedEmail": email,
        "reason": reason,
    })
    .to_string()
    .into_bytes()
}

/// Poll `check` until it returns true or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
