use crate::reconciler::zendesksource::client::ZendeskError;
use kube::error::Error as KubeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An object the reconciler depends on does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    /// A Secret exists but lacks the referenced key.
    #[error("key {key:?} not found in secret {name:?}")]
    SecretKeyMissing { name: String, key: String },
    /// A source references a Secret without naming it.
    #[error("{0} does not reference a secret key")]
    MissingSecretRef(&'static str),
    #[error("sink resolution failed: {0}")]
    Sink(#[from] knative::error::Error),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),
    #[error("Zendesk API error: {0}")]
    Zendesk(#[from] ZendeskError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Retrying will not help; wait for the object to change.
    #[error("{0}")]
    Permanent(Box<Error>),
    #[error("{context}: {source}")]
    Context { context: String, source: Box<Error> },
}

impl Error {
    /// Marks the error as non-retryable.
    pub fn permanent(self) -> Self {
        match self {
            e @ Error::Permanent(_) => e,
            e => Error::Permanent(Box::new(e)),
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Permanent(_) => true,
            Error::Context { source, .. } => source.is_permanent(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(KubeError::Api(response)) => response.code == 404,
            Error::Sink(e) => e.is_not_found(),
            Error::Permanent(e) | Error::Context { source: e, .. } => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether the external system refused the credentials.
    pub fn is_denied(&self) -> bool {
        match self {
            Error::Zendesk(e) => e.is_denied(),
            Error::Permanent(e) | Error::Context { source: e, .. } => e.is_denied(),
            _ => false,
        }
    }

    /// Converts a Kubernetes 404 on `kind/name` into [`Error::NotFound`].
    pub(crate) fn from_kube(kind: &'static str, name: &str, e: KubeError) -> Self {
        match e {
            KubeError::Api(response) if response.code == 404 => Error::NotFound {
                kind,
                name: name.to_string(),
            },
            e => Error::Kube(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
