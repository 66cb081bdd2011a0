use super::{
    knative_reference::KReference,
    status_types::Status,
};
use crate::derive::ConditionType;
use crate::error::DiscoveryError;
use knative_conditions::{ConditionAccessor, ConditionSet, Conditions};
use enumset::EnumSetType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Default, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Sink is a reference to an object that will resolve to a uri to use as the sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<Destination>,
    /// CloudEventOverrides defines overrides to control the output format and
    /// modifications of the event sent to the sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ce_overrides: Option<CloudEventOverrides>,
}

/// Destination represents a target of an invocation over HTTP.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct Destination {
    /// Ref points to an Addressable.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<KReference>,
    /// URI can be an absolute URL(non-empty scheme and non-empty host) pointing to the target or a relative URI.
    /// Relative URIs will be resolved using the base URI retrieved from Ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl From<KReference> for Destination {
    fn from(reference: KReference) -> Self {
        Destination {
            ref_: Some(KReference {
                // combine the group and api_version, handling the case that this was done already
                api_version: match (reference.api_version, reference.group) {
                    (Some(api_version), _) if api_version.contains('/') => Some(api_version),
                    (Some(api_version), Some(group)) => Some(group + "/" + &api_version),
                    (Some(api_version), None) => Some(api_version),
                    (None, _) => None,
                },
                group: None,
                kind: reference.kind,
                namespace: reference.namespace,
                name: reference.name,
            }),
            uri: None,
        }
    }
}

impl From<url::Url> for Destination {
    fn from(uri: url::Url) -> Self {
        Destination {
            ref_: None,
            uri: Some(uri.to_string()),
        }
    }
}

impl Destination {
    /// Combines the address of [`Destination::ref_`] (already resolved by the caller) with
    /// [`Destination::uri`]. With a Ref the URI is resolved relative to the Ref's address;
    /// without one it must be absolute.
    pub fn resolve(&self, ref_address: Option<url::Url>) -> Result<url::Url, DiscoveryError> {
        match (ref_address, self.uri.as_deref()) {
            (Some(base), None) => Ok(base),
            (Some(base), Some(uri)) => base.join(uri).map_err(|e| DiscoveryError::Join {
                uri: uri.to_string(),
                base,
                reason: e.to_string(),
            }),
            (None, Some(uri)) => match url::Url::parse(uri) {
                Ok(url) if url.has_host() => Ok(url),
                _ => Err(DiscoveryError::RelativeUri(uri.to_string())),
            },
            (None, None) => Err(DiscoveryError::EmptyDestination),
        }
    }
}

/// CloudEventOverrides defines arguments for a Source that control the output
/// format of the CloudEvents produced by the Source.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventOverrides {
    /// Extensions specify what attribute are added or overridden on the
    /// outbound event. Each `Extensions` key-value pair are set on the event as
    /// an attribute extension independently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, String>>,
}

/// CloudEventAttributes specifies the attributes that a Source
/// uses as part of its CloudEvents.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventAttributes {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A baseline [`ConditionType`] for [`SourceStatus`].
///
/// Custom conditions should implement [`SourceConditionType`] in order to be used by
/// [`SourceStatus`].
#[derive(ConditionType, EnumSetType, Deserialize, Serialize, Debug, JsonSchema)]
pub enum SourceCondition {
    Ready,
    /// A [`sink_uri`] has been set on the resource.
    ///
    /// [`sink_uri`]:./struct.SourceStatus.html#structfield.sink_uri
    #[dependent]
    SinkProvided
}

/// SinkProvided is False because the sink could not be resolved.
pub const REASON_SINK_NOT_FOUND: &str = "SinkNotFound";
/// SinkProvided is False because the sink resolved to an empty URI.
pub const REASON_SINK_EMPTY: &str = "EmptySinkURI";

/// SourceStatus shows how we expect folks to embed Addressable in
/// their Status field.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus<C> {
    /// inherits Status, which currently provides:
    /// * ObservedGeneration - the 'Generation' of the Service that was last
    ///   processed by the controller.
    /// * Conditions - the latest available observations of a resource's current
    ///   state.
    #[serde(flatten)]
    pub status: Status<C>,
    /// SinkURI is the current active sink URI that has been configured for the
    /// Source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<url::Url>,
    /// CloudEventAttributes are the specific attributes that the Source uses
    /// as part of its CloudEvents.
    #[serde(rename = "ceAttributes", default, skip_serializing_if = "Option::is_none")]
    pub cloud_event_attributes: Option<Vec<CloudEventAttributes>>,
}

impl<C> Default for SourceStatus<C> {
    fn default() -> Self {
        SourceStatus {
            status: Status::default(),
            sink_uri: None,
            cloud_event_attributes: None,
        }
    }
}

impl<C: SourceConditionType> ConditionAccessor<C> for SourceStatus<C> {
    fn conditions(&mut self) -> &mut Conditions<C> {
        self.status.conditions()
    }
}

/// Provides management of `sink_uri` on [`SourceStatus`].
///
/// This traits helps to discourage use of the `SinkProvided` condition directly, which would
/// leave `sink_uri` out of sync with the condition.
pub trait SinkManager<S: SourceConditionType>: ConditionAccessor<S> {
    /// Return the [`SourceStatus`] of your CRD Status type.
    fn source_status(&mut self) -> &mut SourceStatus<S>;

    /// Set the condition that the source has a sink configured. An empty URI marks the sink
    /// as not provided.
    fn mark_sink(&mut self, set: &ConditionSet<S>, uri: Option<url::Url>) {
        let status = self.source_status();
        match uri {
            Some(uri) => {
                status.sink_uri = Some(uri);
                status.manage(set).mark_true(S::sinkprovided());
            }
            None => {
                status.sink_uri = None;
                status.manage(set).mark_false(
                    S::sinkprovided(),
                    REASON_SINK_EMPTY,
                    Some("The sink has no URI".into()),
                );
            }
        }
    }

    /// Set the condition that the source has no sink configured
    fn mark_no_sink(&mut self, set: &ConditionSet<S>, message: Option<String>) {
        let status = self.source_status();
        status.sink_uri = None;
        status.manage(set).mark_false(
            S::sinkprovided(),
            REASON_SINK_NOT_FOUND,
            message.or_else(|| Some("The sink does not exist or its URI is not set".into())),
        );
    }
}

impl<S: SourceConditionType> SinkManager<S> for SourceStatus<S> {
    fn source_status(&mut self) -> &mut SourceStatus<S> {
        self
    }
}
