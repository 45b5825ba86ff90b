pub mod admission;
pub mod backend_state;
pub mod config;
pub mod metrics;
pub mod template;

pub use admission::{AdmissionController, SlotState, UserQueryGuard};
pub use backend_state::BackendState;
pub use config::{Config, ConfigError};
pub use metrics::{Metrics, RestoreOutcome, WarmupErrorKind};
pub use template::{expand, TemplateError, TemplateWatcher};
