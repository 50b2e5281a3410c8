//! Common utilities and helper functions

pub mod error;
pub mod retry;

use std::time::Duration;
use tokio::sync::watch;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` if shutdown was requested (or the sender is gone).
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
