//! Error types for the VDB operator

use thiserror::Error;

use crate::crd::Phase;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The stored object moved since it was fetched
    #[error("Conflict writing {0}: resource version changed since fetch")]
    Conflict(String),

    /// Operator or cluster misconfiguration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A referenced secret or config map value could not be resolved
    #[error("Unresolved reference {reference}: {message}")]
    UnresolvedReference { reference: String, message: String },

    /// A bounded wait elapsed
    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),

    /// Artifact packaging failed
    #[error("Packaging error: {0}")]
    PackagingError(String),

    /// Certificate material could not be generated
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Error raised by a phase action, tagged with where it happened
    #[error("Action {action} failed in phase {phase}: {source}")]
    Action {
        action: &'static str,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if the error is transient and the pass should be retried with backoff
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::Conflict(_) | Error::Timeout(..) => true,
            Error::UnresolvedReference { .. } => true,
            Error::Action { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Short label used for metrics and logs
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Conflict(_) => "conflict",
            Error::ConfigError(_) => "config",
            Error::UnresolvedReference { .. } => "unresolved_reference",
            Error::Timeout(..) => "timeout",
            Error::PackagingError(_) => "packaging",
            Error::CertificateError(_) => "certificate",
            Error::SerializationError(_) => "serialization",
            Error::Action { source, .. } => source.metric_label(),
        }
    }

    /// Wrap an error with the action name and the phase it was raised in
    pub fn in_action(self, action: &'static str, phase: Phase) -> Self {
        Error::Action {
            action,
            phase,
            source: Box::new(self),
        }
    }

    /// Translate an HTTP 409 from the API server into [`Error::Conflict`]
    pub fn from_write(err: kube::Error, object: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 409 => Error::Conflict(object.to_string()),
            other => Error::KubeError(other),
        }
    }
}
