use std::sync::Arc;

use parking_lot::RwLock;

/// Tracks the inferred state of the backend: which template prefix was
/// last sent to slot 0. The state is inferred, not queried; we record what
/// we forwarded and assume the backend accepted it.
///
/// Disk I/O only happens on template switches. Before forwarding a request
/// with prefix `new` while `old` is resident:
///   save `old` when `old != "" && old != new`,
///   restore `new` when `new != "" && old != new`.
/// Repeated requests against the same template touch no disk at all.
#[derive(Default)]
pub struct BackendState {
    last_prefix: RwLock<String>,
}

impl BackendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The prefix of the last forwarded request; empty when no template
    /// is resident (startup, or the last request was untemplated).
    pub fn last_prefix(&self) -> String {
        self.last_prefix.read().clone()
    }

    /// Records that a request with this prefix was just accepted by the
    /// backend. Called for user requests and warmups alike.
    pub fn update(&self, prefix: &str) {
        *self.last_prefix.write() = prefix.to_string();
    }

    /// Whether the outgoing template's snapshot must be saved before
    /// switching to `new_prefix`.
    pub fn should_save(&self, new_prefix: &str) -> bool {
        let last = self.last_prefix.read();
        !last.is_empty() && *last != new_prefix
    }

    /// Whether `new_prefix`'s snapshot must be restored before use.
    pub fn should_restore(&self, new_prefix: &str) -> bool {
        let last = self.last_prefix.read();
        !new_prefix.is_empty() && *last != new_prefix
    }

    /// Forgets the resident template. For operators who restarted the
    /// backend underneath the proxy.
    pub fn reset(&self) {
        self.last_prefix.write().clear();
    }
}
