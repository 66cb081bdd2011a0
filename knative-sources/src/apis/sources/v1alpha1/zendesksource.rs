use super::common::{EventSource, SecretValueFromSource};
use knative::{
    conditions::{ConditionAccessor, ConditionSet},
    derive::ConditionType,
    event_source_types::{EventSourceConditionType, EventSourceStatus},
    source_types::{SourceConditionType, SourceSpec},
};
use enumset::EnumSetType;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ZendeskSource is the schema for the Zendesk source.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "ZendeskSource",
    group = "sources.triggermesh.io",
    version = "v1alpha1",
    status = "ZendeskSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ZendeskSourceSpec {
    /// Sink and CloudEventOverrides
    #[serde(flatten)]
    pub source_spec: SourceSpec,
    /// API token used to register the webhook with Zendesk.
    #[serde(default)]
    pub token: SecretValueFromSource,
    /// Email of the Zendesk user owning the API token.
    #[serde(default)]
    pub email: String,
    /// Password used for basic authentication of events sent from Zendesk to the adapter.
    #[serde(default)]
    pub webhook_password: SecretValueFromSource,
    /// Username used for basic authentication of events sent from Zendesk to the adapter.
    #[serde(default)]
    pub webhook_username: String,
    /// Zendesk subdomain, e.g. `acme` for `acme.zendesk.com`.
    #[serde(default)]
    pub subdomain: String,
}

#[derive(ConditionType, EnumSetType, Deserialize, Serialize, Debug, JsonSchema)]
pub enum ZendeskCondition {
    Ready,
    #[dependent]
    SinkProvided,
    #[dependent]
    Deployed,
    /// The Target and Trigger are registered with Zendesk.
    #[dependent]
    TargetSynced,
}

impl SourceConditionType for ZendeskCondition {
    fn sinkprovided() -> Self {
        ZendeskCondition::SinkProvided
    }
}

impl EventSourceConditionType for ZendeskCondition {
    fn sinkprovided() -> Self {
        ZendeskCondition::SinkProvided
    }

    fn deployed() -> Self {
        ZendeskCondition::Deployed
    }
}

/// TargetSynced is Unknown because the adapter has no public URL yet.
pub const ZENDESK_REASON_NO_URL: &str = "NoAdapterURL";
/// TargetSynced is False because a credential could not be read.
pub const ZENDESK_REASON_NO_SECRET: &str = "CredentialError";
/// TargetSynced is False because a call to the Zendesk API failed.
pub const ZENDESK_REASON_FAILED_SYNC: &str = "FailedSync";

pub type ZendeskSourceStatus = EventSourceStatus<ZendeskCondition>;

const EVENT_TYPE_NEW_TICKET: &str = "com.zendesk.ticket.new";

impl ZendeskSource {
    /// Title of the Zendesk Target and Trigger owned by this source.
    pub fn target_title(&self) -> String {
        format!(
            "io.triggermesh.zendesksource.{}.{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default(),
        )
    }
}

/// Marks the Zendesk sync on a [`ZendeskSourceStatus`].
pub trait TargetSyncManager {
    fn mark_target_synced(&mut self, set: &ConditionSet<ZendeskCondition>);

    fn mark_target_not_synced(&mut self, set: &ConditionSet<ZendeskCondition>, reason: &str, message: String);

    fn mark_target_sync_pending(&mut self, set: &ConditionSet<ZendeskCondition>, reason: &str, message: String);
}

impl TargetSyncManager for ZendeskSourceStatus {
    fn mark_target_synced(&mut self, set: &ConditionSet<ZendeskCondition>) {
        self.manage(set).mark_true(ZendeskCondition::TargetSynced);
    }

    fn mark_target_not_synced(&mut self, set: &ConditionSet<ZendeskCondition>, reason: &str, message: String) {
        self.manage(set).mark_false(ZendeskCondition::TargetSynced, reason, Some(message));
    }

    fn mark_target_sync_pending(&mut self, set: &ConditionSet<ZendeskCondition>, reason: &str, message: String) {
        self.manage(set).mark_unknown(ZendeskCondition::TargetSynced, reason, Some(message));
    }
}

impl EventSource for ZendeskSource {
    type Condition = ZendeskCondition;

    const ADAPTER_NAME: &'static str = "zendesksource";
    const FINALIZER: Option<&'static str> = Some("zendesksources.sources.triggermesh.io");

    fn source_spec(&self) -> &SourceSpec {
        &self.spec.source_spec
    }

    fn source_status(&self) -> Option<&ZendeskSourceStatus> {
        self.status.as_ref()
    }

    fn source_status_mut(&mut self) -> &mut ZendeskSourceStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn event_types(&self) -> Vec<String> {
        vec![EVENT_TYPE_NEW_TICKET.to_string()]
    }

    fn as_event_source(&self) -> String {
        format!("{}.zendesk.com", self.spec.subdomain)
    }
}
