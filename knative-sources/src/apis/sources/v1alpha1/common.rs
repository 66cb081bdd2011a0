use k8s_openapi::api::core::v1::SecretKeySelector;
use k8s_openapi::NamespaceResourceScope;
use knative::{
    conditions::ConditionSet,
    event_source_types::{EventSourceConditionType, EventSourceStatus},
    source_types::{CloudEventAttributes, SourceConditionType, SourceSpec},
};
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// A value read from a key of a Secret.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

/// The capabilities the reconcilers need from every source kind.
pub trait EventSource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Condition: SourceConditionType
        + EventSourceConditionType
        + Serialize
        + DeserializeOwned
        + PartialEq
        + Clone
        + Send
        + Sync
        + 'static;

    /// Name of the receive adapter, also the prefix of its object name.
    const ADAPTER_NAME: &'static str;

    /// Finalizer guarding external state, for kinds that have any.
    const FINALIZER: Option<&'static str> = None;

    fn source_spec(&self) -> &SourceSpec;

    fn source_status(&self) -> Option<&EventSourceStatus<Self::Condition>>;

    fn source_status_mut(&mut self) -> &mut EventSourceStatus<Self::Condition>;

    /// The condition set of the kind.
    fn condition_set() -> ConditionSet<Self::Condition> {
        ConditionSet::default()
    }

    /// Types of the CloudEvents produced by the source.
    fn event_types(&self) -> Vec<String>;

    /// Value of the CloudEvents `source` attribute.
    fn as_event_source(&self) -> String {
        match self.namespace() {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name_any()),
            _ => self.name_any(),
        }
    }

    /// The attributes published in `status.ceAttributes`.
    fn cloud_event_attributes(&self) -> Vec<CloudEventAttributes> {
        let source = self.as_event_source();
        self.event_types()
            .into_iter()
            .map(|type_| CloudEventAttributes {
                type_: Some(type_),
                source: Some(source.clone()),
            })
            .collect()
    }
}
