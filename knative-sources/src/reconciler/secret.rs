use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, SecretKeySelector};
use kube::{Api, Client};
use std::collections::BTreeMap;

/// Reads the data of Secrets.
#[async_trait]
pub trait SecretGetter: Send + Sync {
    /// Returns the data of the Secret, or [`Error::NotFound`] when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// A [`SecretGetter`] reading Secrets from the cluster.
#[derive(Clone)]
pub struct KubeSecrets {
    client: Client,
}

impl KubeSecrets {
    pub fn new(client: Client) -> Self {
        KubeSecrets { client }
    }
}

#[async_trait]
impl SecretGetter for KubeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| Error::from_kube("Secret", name, e))?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}

/// Resolves the value of `selector` in `namespace`.
///
/// A missing Secret is [`Error::NotFound`], a Secret without the key is
/// [`Error::SecretKeyMissing`].
pub async fn resolve(
    secrets: &dyn SecretGetter,
    namespace: &str,
    selector: &SecretKeySelector,
) -> Result<String> {
    let name = selector.name.as_deref().unwrap_or_default();
    let mut data = secrets.get(namespace, name).await?;
    let value = data.remove(&selector.key).ok_or_else(|| Error::SecretKeyMissing {
        name: name.to_string(),
        key: selector.key.clone(),
    })?;
    Ok(String::from_utf8_lossy(&value).into_owned())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reconciler::testing::FakeSecrets;

    fn selector(key: &str) -> SecretKeySelector {
        SecretKeySelector {
            name: Some("zendesk".into()),
            key: key.into(),
            optional: None,
        }
    }

    #[tokio::test]
    async fn resolves_key() {
        let secrets = FakeSecrets::default().with("tickets", "zendesk", &[("apiToken", "t0k3n")]);
        let value = resolve(&secrets, "tickets", &selector("apiToken")).await.unwrap();
        assert_eq!(value, "t0k3n");
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let secrets = FakeSecrets::default();
        let err = resolve(&secrets, "tickets", &selector("apiToken")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_key_is_distinct() {
        let secrets = FakeSecrets::default().with("tickets", "zendesk", &[("other", "x")]);
        let err = resolve(&secrets, "tickets", &selector("apiToken")).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, Error::SecretKeyMissing { ref key, .. } if key == "apiToken"));
    }

    #[tokio::test]
    async fn secrets_are_namespaced() {
        let secrets = FakeSecrets::default().with("other", "zendesk", &[("apiToken", "t0k3n")]);
        let err = resolve(&secrets, "tickets", &selector("apiToken")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
