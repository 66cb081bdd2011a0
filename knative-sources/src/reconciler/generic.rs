//! Reconciliation of the receive adapter of a source.

use super::adapter::{Adapter, AdapterClient};
use super::event::{EventRecorder, Events};
use crate::apis::sources::v1alpha1::EventSource;
use crate::error::Result;
use crate::reconciler::resources::adapter_name;
use knative::{
    conditions::{ConditionAccessor, ConditionSet},
    event_source_types::{AdapterObservation, EventSourceConditionType, REASON_STATUS_UNKNOWN},
    resolver::UriResolver,
    source_types::SinkManager,
};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub const REASON_ADAPTER_CREATED: &str = "AdapterCreated";
pub const REASON_ADAPTER_UPDATED: &str = "AdapterUpdated";
pub const REASON_FAILED_ADAPTER_CREATE: &str = "FailedAdapterCreate";
pub const REASON_FAILED_ADAPTER_UPDATE: &str = "FailedAdapterUpdate";
pub const REASON_BAD_SINK_URI: &str = "BadSinkURI";

/// Reconciles the receive adapter of sources of kind `S`, running as an `A`.
pub struct GenericReconciler<S: EventSource, A: Adapter> {
    set: ConditionSet<S::Condition>,
    resolver: Arc<dyn UriResolver>,
    adapters: Arc<dyn AdapterClient<A>>,
    recorder: Arc<dyn EventRecorder>,
}

impl<S: EventSource, A: Adapter> GenericReconciler<S, A> {
    pub fn new(
        resolver: Arc<dyn UriResolver>,
        adapters: Arc<dyn AdapterClient<A>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        GenericReconciler {
            set: S::condition_set(),
            resolver,
            adapters,
            recorder,
        }
    }

    pub fn condition_set(&self) -> &ConditionSet<S::Condition> {
        &self.set
    }

    pub fn recorder(&self) -> &dyn EventRecorder {
        self.recorder.as_ref()
    }

    /// Resolves the sink of `src`, then ensures its adapter exists as built by `build` and
    /// reflects the availability of the adapter in the status.
    pub async fn reconcile_source<F>(&self, src: &mut S, build: F) -> Result<()>
    where
        F: FnOnce(&S, Option<&Url>) -> A + Send,
    {
        let namespace = src.namespace().unwrap_or_default();
        let events = Events::new(self.recorder.as_ref(), src.object_ref(&()));

        let sink = self.resolve_sink(src, &namespace).await;
        let sink = match sink {
            Ok(sink) => sink,
            Err(e) => {
                src.source_status_mut().mark_no_sink(&self.set, Some(e.to_string()));
                events
                    .warn(REASON_BAD_SINK_URI, format!("Could not resolve sink URI: {e}"))
                    .await;
                return Err(e.context("resolving sink URI"));
            }
        };
        debug!(source = %src.name_any(), %sink, "resolved sink");
        src.source_status_mut().mark_sink(&self.set, Some(sink.clone()));

        let attributes = src.cloud_event_attributes();
        src.source_status_mut().source_status.cloud_event_attributes = Some(attributes);

        let desired = build(src, Some(&sink));
        let name = desired.name_any();

        let adapter = match self.adapters.get(&namespace, &name).await {
            Ok(current) => match self.update_if_needed(&events, current, desired).await {
                Ok(updated) => updated,
                Err(e) => {
                    src.source_status_mut().manage(&self.set).mark_unknown(
                        <S::Condition as EventSourceConditionType>::deployed(),
                        REASON_STATUS_UNKNOWN,
                        Some(format!("Failed to update adapter {}: {e}", A::KIND)),
                    );
                    return Err(e.context(format!("updating adapter {}", A::KIND)));
                }
            },
            Err(e) if e.is_not_found() => match self.adapters.create(&namespace, &desired).await {
                Ok(created) => {
                    info!(source = %src.name_any(), adapter = %name, "created adapter {}", A::KIND);
                    events
                        .normal(REASON_ADAPTER_CREATED, format!("Created adapter {} {:?}", A::KIND, name))
                        .await;
                    created
                }
                Err(e) => {
                    events
                        .warn(
                            REASON_FAILED_ADAPTER_CREATE,
                            format!("Failed to create adapter {} {:?}: {e}", A::KIND, name),
                        )
                        .await;
                    src.source_status_mut().manage(&self.set).mark_unknown(
                        <S::Condition as EventSourceConditionType>::deployed(),
                        REASON_STATUS_UNKNOWN,
                        Some(format!("Failed to create adapter {}: {e}", A::KIND)),
                    );
                    return Err(e.context(format!("creating adapter {}", A::KIND)));
                }
            },
            Err(e) => {
                src.source_status_mut().manage(&self.set).mark_unknown(
                    <S::Condition as EventSourceConditionType>::deployed(),
                    REASON_STATUS_UNKNOWN,
                    Some(format!("Failed to get adapter {}: {e}", A::KIND)),
                );
                return Err(e.context(format!("getting adapter {}", A::KIND)));
            }
        };

        let observation = self.observe(&namespace, &adapter).await;
        src.source_status_mut()
            .propagate_availability(&self.set, A::KIND, Some(&observation));
        Ok(())
    }

    /// Returns the adapter of `src`. Absence is reported as an error for which
    /// [`Error::is_not_found`](crate::error::Error::is_not_found) holds.
    pub async fn find_adapter(&self, src: &S) -> Result<A> {
        let namespace = src.namespace().unwrap_or_default();
        self.adapters.get(&namespace, &adapter_name(src)).await
    }

    async fn resolve_sink(&self, src: &S, namespace: &str) -> Result<Url> {
        let dest = src
            .source_spec()
            .sink
            .as_ref()
            .ok_or(knative::error::DiscoveryError::EmptyDestination)
            .map_err(knative::error::Error::from)?;
        Ok(self.resolver.uri_from_destination(dest, namespace).await?)
    }

    async fn update_if_needed(&self, events: &Events<'_>, mut current: A, desired: A) -> Result<A> {
        if !current.needs_update(&desired) {
            return Ok(current);
        }

        let name = current.name_any();
        let namespace = current.namespace().unwrap_or_default();
        current.apply_desired(desired);
        match self.adapters.update(&namespace, &current).await {
            Ok(updated) => {
                info!(adapter = %name, "updated adapter {}", A::KIND);
                events
                    .normal(REASON_ADAPTER_UPDATED, format!("Updated adapter {} {:?}", A::KIND, name))
                    .await;
                Ok(updated)
            }
            Err(e) => {
                events
                    .warn(
                        REASON_FAILED_ADAPTER_UPDATE,
                        format!("Failed to update adapter {} {:?}: {e}", A::KIND, name),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn observe(&self, namespace: &str, adapter: &A) -> AdapterObservation {
        let mut observation = adapter.observe();
        if let AdapterObservation::Workload { available: Some(false), waiting, .. } = &mut observation {
            if let Some(selector) = adapter.pod_selector() {
                match self.adapters.waiting_state(namespace, &selector).await {
                    Ok(state) => *waiting = state,
                    Err(e) => warn!(adapter = %adapter.name_any(), error = %e, "unable to look up statuses of dependant pods"),
                }
            }
        }
        observation
    }
}
