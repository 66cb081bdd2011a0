use super::common::{EventSource, SecretValueFromSource};
use knative::{
    event_source_types::{EventSourceCondition, EventSourceStatus},
    source_types::SourceSpec,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SlackSource receives events from the Slack Events API.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "SlackSource",
    group = "sources.triggermesh.io",
    version = "v1alpha1",
    status = "SlackSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SlackSourceSpec {
    /// Sink and CloudEventOverrides
    #[serde(flatten)]
    pub source_spec: SourceSpec,
    /// Signing secret used to verify requests from Slack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<SecretValueFromSource>,
    /// Slack App ID, used to filter events of other apps.
    #[serde(rename = "appID", default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

pub type SlackSourceStatus = EventSourceStatus<EventSourceCondition>;

const EVENT_TYPE_SLACK_EVENT: &str = "com.slack.events";

impl EventSource for SlackSource {
    type Condition = EventSourceCondition;

    const ADAPTER_NAME: &'static str = "slacksource";

    fn source_spec(&self) -> &SourceSpec {
        &self.spec.source_spec
    }

    fn source_status(&self) -> Option<&SlackSourceStatus> {
        self.status.as_ref()
    }

    fn source_status_mut(&mut self) -> &mut SlackSourceStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn event_types(&self) -> Vec<String> {
        vec![EVENT_TYPE_SLACK_EVENT.to_string()]
    }
}
