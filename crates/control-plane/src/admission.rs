use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What kind of work currently holds backend slot 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    Idle,
    UserQuery,
    WarmupQuery,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Idle => "idle",
            SlotState::UserQuery => "user_query",
            SlotState::WarmupQuery => "warmup_query",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: SlotState,
    user_query_count: u32,
    warmup_cancel: Option<CancellationToken>,
    warmup_prefix: String,
}

/// Mutual exclusion over backend slot 0.
///
/// User requests always win: acquiring a user slot cancels any in-flight
/// warmup. Warmups only run from an idle slot and never block. All
/// transitions happen under one mutex; the cancellation token is fired
/// while it is held, so no warmup can observe itself "still warming"
/// after a user request has taken the slot.
pub struct AdmissionController {
    inner: Mutex<Inner>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SlotState::Idle,
                user_query_count: 0,
                warmup_cancel: None,
                warmup_prefix: String::new(),
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Takes the slot for a user query. Never blocks and never refuses:
    /// concurrent user queries are allowed (the backend queues them), and
    /// an active warmup is cancelled on the spot.
    pub fn acquire_user(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SlotState::Idle => {
                inner.state = SlotState::UserQuery;
                inner.user_query_count = 1;
                debug!("admission: idle -> user_query");
            }
            SlotState::UserQuery => {
                inner.user_query_count += 1;
                debug!(count = inner.user_query_count, "admission: concurrent user query");
            }
            SlotState::WarmupQuery => {
                if let Some(cancel) = inner.warmup_cancel.take() {
                    debug!(prefix = %inner.warmup_prefix, "admission: cancelling warmup for user query");
                    cancel.cancel();
                }
                inner.state = SlotState::UserQuery;
                inner.user_query_count = 1;
                inner.warmup_prefix.clear();
            }
        }
        true
    }

    /// Releases one user query; the slot goes idle when the last one
    /// finishes.
    pub fn release_user(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SlotState::UserQuery {
            warn!(state = %inner.state, "release_user called outside user_query");
            return;
        }
        inner.user_query_count = inner.user_query_count.saturating_sub(1);
        if inner.user_query_count == 0 {
            inner.state = SlotState::Idle;
            debug!("admission: user_query -> idle");
        }
    }

    /// Tries to take the slot for a warmup. Succeeds only from idle;
    /// `cancel` is stored so a later user query can abort the attempt.
    pub fn acquire_warmup(&self, prefix: &str, cancel: CancellationToken) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SlotState::Idle => {
                inner.state = SlotState::WarmupQuery;
                inner.warmup_prefix = prefix.to_string();
                inner.warmup_cancel = Some(cancel);
                debug!(prefix = %prefix, "admission: idle -> warmup_query");
                true
            }
            SlotState::UserQuery => {
                debug!(prefix = %prefix, "admission: user query active, warmup skipped");
                false
            }
            SlotState::WarmupQuery => {
                debug!(prefix = %prefix, current = %inner.warmup_prefix, "admission: already warming, skipped");
                false
            }
        }
    }

    /// Releases a warmup. A no-op when the slot is no longer in
    /// warmup_query: that is the normal aftermath of a user query
    /// pre-empting the warmup between acquire and release.
    pub fn release_warmup(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SlotState::WarmupQuery {
            return;
        }
        inner.state = SlotState::Idle;
        inner.warmup_cancel = None;
        inner.warmup_prefix.clear();
        debug!("admission: warmup_query -> idle");
    }

    pub fn current_state(&self) -> SlotState {
        self.inner.lock().state
    }

    pub fn user_query_count(&self) -> u32 {
        self.inner.lock().user_query_count
    }

    /// The prefix currently being warmed, when a warmup holds the slot.
    pub fn warmup_prefix(&self) -> Option<String> {
        let inner = self.inner.lock();
        if inner.state == SlotState::WarmupQuery {
            Some(inner.warmup_prefix.clone())
        } else {
            None
        }
    }
}

/// Releases the user slot when dropped, so early exits and client
/// disconnects cannot leak an acquisition.
pub struct UserQueryGuard {
    controller: Arc<AdmissionController>,
}

impl UserQueryGuard {
    pub fn acquire(controller: &Arc<AdmissionController>) -> Self {
        controller.acquire_user();
        Self {
            controller: controller.clone(),
        }
    }
}

impl Drop for UserQueryGuard {
    fn drop(&mut self) {
        self.controller.release_user();
    }
}
