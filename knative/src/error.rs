use crate::addressable_type::AddressableErr;
use thiserror::Error;
use kube::error::Error as KubeError;

#[derive(Error, Debug)]
pub enum Error {
    /// Discovery errors
    #[error("Error from discovery: {0}")]
    Discovery(#[from] DiscoveryError),
    /// The referenced object does not expose an address
    #[error("{0}")]
    Addressable(#[from] AddressableErr),
    /// Kube errors
    #[error("Error: {0}")]
    KubeError(#[from] KubeError),
}

impl Error {
    /// Whether the referenced object (or its type) does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(KubeError::Api(response)) => response.code == 404,
            Error::Discovery(DiscoveryError::UnknownKind(..)) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("destination missing Ref and URI, expected at least one")]
    EmptyDestination,
    #[error("reference {0:?} has no apiVersion")]
    MissingApiVersion(String),
    #[error("kind {0} is not served by the cluster")]
    UnknownKind(String),
    #[error("URI {0:?} must be absolute when no Ref is given")]
    RelativeUri(String),
    #[error("unable to resolve URI {uri:?} against {base}: {reason}")]
    Join { uri: String, base: url::Url, reason: String },
}
