use std::sync::Arc;

use control_plane::{BackendState, Metrics};
use data_plane::{BackendClient, ChatInterceptor};

/// Shared state for the proxy listener.
pub struct ProxyState {
    pub interceptor: Arc<ChatInterceptor>,
    pub backend: Arc<BackendClient>,
    pub metrics: Arc<Metrics>,
}

/// Shared state for the admin listener.
pub struct AdminState {
    pub metrics: Arc<Metrics>,
    pub backend_state: Arc<BackendState>,
}
