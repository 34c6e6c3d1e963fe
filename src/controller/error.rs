//! Error types for the cluster lifecycle and its controller

use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap a foreign error.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("invalid username: '{0}'")]
    InvalidUsername(String),

    #[error("invalid flags for user '{user}' ({flags:?}): {reason}")]
    InvalidUserFlags {
        user: String,
        flags: Vec<String>,
        reason: String,
    },

    #[error("invalid volume {volume}: {reason}")]
    InvalidVolume { volume: String, reason: String },

    #[error("unrecognized output: {0}, assuming error")]
    UnrecognizedResizeOutput(String),

    #[error("block storage provider error: {0}")]
    VolumeProvider(String),

    #[error("remote command failed: {0}")]
    Exec(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("teams API error: {0}")]
    TeamsApi(String),

    #[error("pod {0} already has a subscriber")]
    SubscriberExists(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is a create conflict (object already exists)
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 409),
            Error::Context { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// Check if requeueing the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::Context { source, .. } => source.is_retryable(),
            Error::ValidationError(_)
            | Error::InvalidUsername(_)
            | Error::InvalidUserFlags { .. }
            | Error::InvalidVolume { .. }
            | Error::SerializationError(_)
            | Error::MissingObjectKey(_) => false,
            Error::UnrecognizedResizeOutput(_)
            | Error::VolumeProvider(_)
            | Error::Exec(_)
            | Error::Database(_)
            | Error::TeamsApi(_)
            | Error::SubscriberExists(_)
            | Error::Timeout(_) => true,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach a step description to an error
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}

/// Exponential backoff configuration for the outer controller's requeue
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        Duration::from_secs_f64(delay_with_jitter.min(self.max_delay.as_secs_f64()))
    }

    /// Non-retryable errors wait the maximum delay, leaving room for manual intervention
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}
