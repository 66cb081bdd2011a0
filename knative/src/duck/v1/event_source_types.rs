use super::{
    addressable_type::{Addressable, AddressStatus},
    source_types::{SinkManager, SourceConditionType, SourceStatus},
};
use crate::derive::ConditionType;
use enumset::EnumSetType;
use knative_conditions::{ConditionAccessor, ConditionSet, Conditions};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

/// Conditions shared by every event source that runs a receive adapter.
#[derive(ConditionType, EnumSetType, Deserialize, Serialize, Debug, JsonSchema)]
pub enum EventSourceCondition {
    Ready,
    /// The sink has been resolved to a URI.
    #[dependent]
    SinkProvided,
    /// The receive adapter is deployed and available.
    #[dependent]
    Deployed,
}

impl SourceConditionType for EventSourceCondition {
    fn sinkprovided() -> Self {
        EventSourceCondition::SinkProvided
    }
}

/// Deployed is False because the adapter reported itself unavailable.
pub const REASON_UNAVAILABLE: &str = "AdapterUnavailable";
/// Deployed is Unknown because the adapter has not reported its readiness yet.
pub const REASON_STATUS_UNKNOWN: &str = "AdapterStatusUnknown";

/// A container of the adapter waiting to start, e.g. because its image can't be pulled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaitingState {
    pub reason: String,
    pub message: String,
}

/// What the controller observed about a receive adapter.
///
/// Adapter kinds either expose a public address (Knative Services) or only report
/// availability (Deployments). `None` readiness means the adapter has not reported yet.
#[derive(Clone, Debug, PartialEq)]
pub enum AdapterObservation {
    Addressable {
        ready: Option<bool>,
        url: Option<Url>,
        message: Option<String>,
    },
    Workload {
        available: Option<bool>,
        message: Option<String>,
        waiting: Option<WaitingState>,
    },
}

/// Status of an event source backed by a receive adapter.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceStatus<C> {
    /// Conditions, sink URI and CloudEvent attributes.
    #[serde(flatten)]
    pub source_status: SourceStatus<C>,
    /// Public address of the receive adapter, when it has one.
    #[serde(flatten)]
    pub address_status: AddressStatus,
}

impl<C> Default for EventSourceStatus<C> {
    fn default() -> Self {
        EventSourceStatus {
            source_status: SourceStatus::default(),
            address_status: AddressStatus::default(),
        }
    }
}

impl<C: SourceConditionType> ConditionAccessor<C> for EventSourceStatus<C> {
    fn conditions(&mut self) -> &mut Conditions<C> {
        self.source_status.conditions()
    }
}

impl<C: SourceConditionType> SinkManager<C> for EventSourceStatus<C> {
    fn source_status(&mut self) -> &mut SourceStatus<C> {
        &mut self.source_status
    }
}

impl<C> EventSourceStatus<C>
where
    C: SourceConditionType + EventSourceConditionType,
{
    /// Maps the observed state of the receive adapter onto the `Deployed` condition.
    ///
    /// `kind` names the adapter kind in condition messages. An absent observation, or one
    /// whose readiness is not reported yet, leaves `Deployed` Unknown.
    pub fn propagate_availability(
        &mut self,
        set: &ConditionSet<C>,
        kind: &str,
        observation: Option<&AdapterObservation>,
    ) {
        let observation = match observation {
            Some(observation) => observation,
            None => {
                self.manage(set).mark_unknown(
                    C::deployed(),
                    REASON_STATUS_UNKNOWN,
                    Some(format!("The status of the adapter {kind} can not be determined")),
                );
                return;
            }
        };

        match observation {
            AdapterObservation::Addressable { ready, url, message } => {
                self.address_status.address = Some(Addressable { url: url.clone() });

                match ready {
                    Some(true) => self.manage(set).mark_true(C::deployed()),
                    Some(false) => {
                        let msg = unavailable_message(kind, [message.as_deref()]);
                        self.manage(set).mark_false(C::deployed(), REASON_UNAVAILABLE, Some(msg));
                    }
                    None => self.manage(set).mark_unknown(
                        C::deployed(),
                        REASON_STATUS_UNKNOWN,
                        Some(format!("The adapter {kind} has not reported its readiness yet")),
                    ),
                }
            }
            AdapterObservation::Workload { available, message, waiting } => {
                // workloads are not addressable
                self.address_status.address = None;

                match available {
                    Some(true) => self.manage(set).mark_true(C::deployed()),
                    Some(false) => {
                        let reason = waiting
                            .as_ref()
                            .map(|ws| ws.reason.as_str())
                            .unwrap_or(REASON_UNAVAILABLE);
                        let msg = unavailable_message(
                            kind,
                            [message.as_deref(), waiting.as_ref().map(|ws| ws.message.as_str())],
                        );
                        self.manage(set).mark_false(C::deployed(), reason, Some(msg));
                    }
                    None => self.manage(set).mark_unknown(
                        C::deployed(),
                        REASON_STATUS_UNKNOWN,
                        Some(format!("The adapter {kind} has not reported its availability yet")),
                    ),
                }
            }
        }
    }
}

fn unavailable_message<'a>(kind: &str, details: impl IntoIterator<Item = Option<&'a str>>) -> String {
    details
        .into_iter()
        .flatten()
        .filter(|d| !d.is_empty())
        .fold(format!("The adapter {kind} is unavailable"), |msg, detail| msg + ": " + detail)
}
