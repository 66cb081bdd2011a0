use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use kube::api::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Cluster domain used for in-cluster Service addresses.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

#[derive(Error, Debug)]
pub enum AddressableErr {
    #[error("{0} ({1}) is not an AddressableType")]
    NotAddressable(String, String),
    #[error("url missing in address of {0}")]
    UrlNotSet(String),
    #[error("service must have name to be addressable")]
    ServiceMustHaveName,
    #[error("unable to parse url: {0}")]
    UrlParseErr(#[from] url::ParseError)
}

/// Addressable provides a generic mechanism for a custom resource definition to
/// indicate a destination for message delivery.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>
}

/// AddressStatus shows how we expect folks to embed Addressable in
/// their Status field.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct AddressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
}

#[derive(Deserialize)]
pub struct AddressableType {
    pub status: AddressStatus
}

/// Construct the uri of a Service from its metadata.
pub fn service_url(name: &str, namespace: &str, cluster_domain: &str) -> Result<Url, AddressableErr> {
    let url = Url::parse(&format!("http://{name}.{namespace}.svc.{cluster_domain}"))?;
    Ok(url)
}

#[doc(hidden)]
/// Parse a url from a &serde_json::Value containing a status. This avoids a clone of data.
fn parse_url_from_obj_data(name: &str, kind: &str, data: &Value) -> Result<Url, AddressableErr> {
    let address = data.get("status")
        .and_then(|status| status.get("address"))
        .and_then(Value::as_object)
        .ok_or_else(|| AddressableErr::NotAddressable(name.to_string(), kind.to_string()))?;

    match address.get("url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() => Ok(Url::parse(url)?),
        _ => Err(AddressableErr::UrlNotSet(name.to_string()))
    }
}

pub trait AddressableTypeExt {
    fn try_get_address(&self, cluster_domain: &str) -> Result<Url, AddressableErr>;
}

impl AddressableTypeExt for AddressableType {
    fn try_get_address(&self, _cluster_domain: &str) -> Result<Url, AddressableErr> {
        self.status.address
            .as_ref()
            .and_then(|address| address.url.clone())
            .ok_or_else(|| AddressableErr::UrlNotSet("addressable".to_string()))
    }
}

impl AddressableTypeExt for DynamicObject {
    fn try_get_address(&self, cluster_domain: &str) -> Result<Url, AddressableErr> {
        let name = self.meta().name.as_ref().ok_or(AddressableErr::ServiceMustHaveName)?;
        let namespace = self.namespace().unwrap_or_else(|| "default".into());

        match &self.types {
            Some(t) => match (t.api_version.as_ref(), t.kind.as_ref()) {
                ("v1", "Service") => service_url(name, &namespace, cluster_domain),
                _ => parse_url_from_obj_data(name, t.kind.as_ref(), &self.data)
            }
            None => Err(AddressableErr::NotAddressable(name.to_string(), "unknown".to_string()))
        }
    }
}

impl AddressableTypeExt for Service {
    fn try_get_address(&self, cluster_domain: &str) -> Result<Url, AddressableErr> {
        let name = self.meta().name.as_ref().ok_or(AddressableErr::ServiceMustHaveName)?;
        let namespace = self.namespace().unwrap_or_else(|| "default".into());
        service_url(name, &namespace, cluster_domain)
    }
}
