pub mod context;
pub mod error;
pub mod pod_watcher;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result, ResultExt};
pub use pod_watcher::run_pod_watcher;
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use state_machine::{ClusterEvent, is_valid_transition};
pub use status::StatusBoard;
pub use validation::validate_spec;
