use super::{
    addressable_type::AddressableTypeExt,
    source_types::Destination,
};
use crate::error::{DiscoveryError, Error};
use async_trait::async_trait;
use kube::{
    api::{Api, DynamicObject},
    discovery::pinned_kind,
    Client,
};
use tracing::debug;
use url::Url;

/// Resolves a [`Destination`] into the URL events should be delivered to.
#[async_trait]
pub trait UriResolver: Send + Sync {
    /// Resolve `dest`, looking up its Ref (if any) in `namespace` unless the Ref names its own.
    async fn uri_from_destination(&self, dest: &Destination, namespace: &str) -> Result<Url, Error>;
}

/// A [`UriResolver`] which reads Addressable objects from the cluster.
#[derive(Clone)]
pub struct KubeResolver {
    client: Client,
    cluster_domain: String,
}

impl KubeResolver {
    pub fn new(client: Client, cluster_domain: impl Into<String>) -> Self {
        KubeResolver {
            client,
            cluster_domain: cluster_domain.into(),
        }
    }
}

#[async_trait]
impl UriResolver for KubeResolver {
    async fn uri_from_destination(&self, dest: &Destination, namespace: &str) -> Result<Url, Error> {
        let base = match &dest.ref_ {
            Some(reference) => {
                let gvk = reference.gvk()?;
                let (resource, _caps) = pinned_kind(&self.client, &gvk)
                    .await
                    .map_err(|e| match e {
                        kube::Error::Discovery(_) => Error::from(DiscoveryError::UnknownKind(gvk.kind.clone())),
                        e => Error::from(e),
                    })?;
                let api = Api::<DynamicObject>::namespaced_with(
                    self.client.clone(),
                    reference.namespace_or(namespace),
                    &resource,
                );
                let obj = api.get(&reference.name).await?;
                let url = obj.try_get_address(&self.cluster_domain)?;
                debug!(kind = %gvk.kind, name = %reference.name, %url, "resolved sink reference");
                Some(url)
            }
            None => None,
        };

        Ok(dest.resolve(base)?)
    }
}
