use super::common::{EventSource, SecretValueFromSource};
use knative::{
    event_source_types::{EventSourceCondition, EventSourceStatus},
    source_types::SourceSpec,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HttpSource receives events over HTTP and forwards them to a sink.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "HttpSource",
    group = "sources.triggermesh.io",
    version = "v1alpha1",
    status = "HttpSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpSourceSpec {
    /// Sink and CloudEventOverrides
    #[serde(flatten)]
    pub source_spec: SourceSpec,
    /// Value of the CloudEvents `type` attribute set on produced events.
    pub event_type: String,
    /// Value of the CloudEvents `source` attribute set on produced events.
    /// Defaults to `<namespace>.<name>` of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Username requests must authenticate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_username: Option<String>,
    /// Password requests must authenticate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_password: Option<SecretValueFromSource>,
}

pub type HttpSourceStatus = EventSourceStatus<EventSourceCondition>;

impl EventSource for HttpSource {
    type Condition = EventSourceCondition;

    const ADAPTER_NAME: &'static str = "httpsource";

    fn source_spec(&self) -> &SourceSpec {
        &self.spec.source_spec
    }

    fn source_status(&self) -> Option<&HttpSourceStatus> {
        self.status.as_ref()
    }

    fn source_status_mut(&mut self) -> &mut HttpSourceStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn event_types(&self) -> Vec<String> {
        vec![self.spec.event_type.clone()]
    }

    fn as_event_source(&self) -> String {
        match &self.spec.event_source {
            Some(source) => source.clone(),
            None => match self.metadata.namespace.as_deref() {
                Some(ns) if !ns.is_empty() => {
                    format!("{}.{}", ns, self.metadata.name.as_deref().unwrap_or_default())
                }
                _ => self.metadata.name.clone().unwrap_or_default(),
            },
        }
    }
}
