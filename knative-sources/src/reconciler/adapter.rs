//! Receive adapter kinds and the client used to manage them.

use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use knative::event_source_types::{AdapterObservation, WaitingState};
use knative_serving::Service;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A workload running the receive adapter of a source.
///
/// Only the fields the controller sets are compared and copied, so changes made by other
/// controllers (replicas, autoscaling annotations) do not cause updates.
pub trait Adapter:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind of the adapter, used in condition messages and events.
    const KIND: &'static str;

    fn observe(&self) -> AdapterObservation;

    /// Whether the controller-owned fields of `self` differ from `desired`.
    fn needs_update(&self, desired: &Self) -> bool;

    /// Copies the controller-owned fields of `desired` into `self`.
    fn apply_desired(&mut self, desired: Self);

    /// Label selector of the pods of the adapter, for kinds that can explain unavailability.
    fn pod_selector(&self) -> Option<String> {
        None
    }
}

fn labels_differ(current: Option<&ObjectMeta>, desired: Option<&ObjectMeta>) -> bool {
    let desired = match desired.and_then(|m| m.labels.as_ref()) {
        Some(desired) => desired,
        None => return false,
    };
    let current = current.and_then(|m| m.labels.as_ref());
    desired
        .iter()
        .any(|(k, v)| current.and_then(|labels| labels.get(k)) != Some(v))
}

fn merge_labels(current: &mut ObjectMeta, desired: Option<BTreeMap<String, String>>) {
    if let Some(desired) = desired {
        current.labels.get_or_insert_with(BTreeMap::new).extend(desired);
    }
}

/// Protocol the API server assigns to ports that name none.
const DEFAULT_PORT_PROTOCOL: &str = "TCP";

fn ports_differ(current: Option<&Vec<ContainerPort>>, desired: Option<&Vec<ContainerPort>>) -> bool {
    let key = |ports: Option<&Vec<ContainerPort>>| {
        ports
            .into_iter()
            .flatten()
            .map(|p| {
                (
                    p.name.clone(),
                    p.container_port,
                    p.protocol.clone().unwrap_or_else(|| DEFAULT_PORT_PROTOCOL.to_string()),
                )
            })
            .collect::<Vec<_>>()
    };
    key(current) != key(desired)
}

fn container_differs(current: Option<&Container>, desired: Option<&Container>) -> bool {
    match (current, desired) {
        (Some(current), Some(desired)) => {
            current.image != desired.image
                || current.env != desired.env
                || ports_differ(current.ports.as_ref(), desired.ports.as_ref())
        }
        (None, None) => false,
        _ => true,
    }
}

fn pod_differs(current: &PodSpec, desired: &PodSpec) -> bool {
    container_differs(current.containers.first(), desired.containers.first())
}

fn apply_pod(current: &mut PodSpec, desired: PodSpec) {
    let desired = match desired.containers.into_iter().next() {
        Some(desired) => desired,
        None => return,
    };
    match current.containers.first_mut() {
        Some(container) => {
            container.image = desired.image;
            container.env = desired.env;
            container.ports = desired.ports;
        }
        None => current.containers.push(desired),
    }
}

impl Adapter for Service {
    const KIND: &'static str = "Service";

    fn observe(&self) -> AdapterObservation {
        AdapterObservation::Addressable {
            ready: self.is_ready(),
            url: self.url().cloned(),
            message: self.ready_message().map(String::from),
        }
    }

    fn needs_update(&self, desired: &Self) -> bool {
        labels_differ(Some(&self.metadata), Some(&desired.metadata))
            || labels_differ(
                self.spec.template.metadata.as_ref(),
                desired.spec.template.metadata.as_ref(),
            )
            || pod_differs(&self.spec.template.spec.pod_spec, &desired.spec.template.spec.pod_spec)
    }

    fn apply_desired(&mut self, desired: Self) {
        merge_labels(&mut self.metadata, desired.metadata.labels);
        let template = desired.spec.template;
        merge_labels(
            self.spec.template.metadata.get_or_insert_with(Default::default),
            template.metadata.and_then(|m| m.labels),
        );
        apply_pod(&mut self.spec.template.spec.pod_spec, template.spec.pod_spec);
    }
}

const DEPLOYMENT_AVAILABLE: &str = "Available";

impl Adapter for Deployment {
    const KIND: &'static str = "Deployment";

    fn observe(&self) -> AdapterObservation {
        let available = self
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == DEPLOYMENT_AVAILABLE));

        AdapterObservation::Workload {
            available: available.and_then(|c| match c.status.as_str() {
                "True" => Some(true),
                "False" => Some(false),
                _ => None,
            }),
            message: available.and_then(|c| c.message.clone()),
            waiting: None,
        }
    }

    fn needs_update(&self, desired: &Self) -> bool {
        let (current_spec, desired_spec) = match (&self.spec, &desired.spec) {
            (Some(current), Some(desired)) => (current, desired),
            (None, None) => return labels_differ(Some(&self.metadata), Some(&desired.metadata)),
            _ => return true,
        };
        let default_pod = PodSpec::default();
        labels_differ(Some(&self.metadata), Some(&desired.metadata))
            || labels_differ(
                current_spec.template.metadata.as_ref(),
                desired_spec.template.metadata.as_ref(),
            )
            || pod_differs(
                current_spec.template.spec.as_ref().unwrap_or(&default_pod),
                desired_spec.template.spec.as_ref().unwrap_or(&default_pod),
            )
    }

    fn apply_desired(&mut self, desired: Self) {
        merge_labels(&mut self.metadata, desired.metadata.labels);
        let desired_spec = match desired.spec {
            Some(spec) => spec,
            None => return,
        };
        let spec = match &mut self.spec {
            Some(spec) => spec,
            None => {
                self.spec = Some(desired_spec);
                return;
            }
        };
        merge_labels(
            spec.template.metadata.get_or_insert_with(Default::default),
            desired_spec.template.metadata.and_then(|m| m.labels),
        );
        if let Some(pod) = desired_spec.template.spec {
            apply_pod(spec.template.spec.get_or_insert_with(Default::default), pod);
        }
    }

    fn pod_selector(&self) -> Option<String> {
        let labels = self.spec.as_ref()?.selector.match_labels.as_ref()?;
        Some(
            labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// First container of `pods` waiting for a reason, e.g. `ImagePullBackOff`.
pub fn pods_waiting_state(pods: &[Pod]) -> Option<WaitingState> {
    pods.iter()
        .filter_map(|pod| pod.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .find_map(|waiting| {
            let reason = waiting.reason.clone().filter(|r| !r.is_empty())?;
            Some(WaitingState {
                reason,
                message: waiting.message.clone().unwrap_or_default(),
            })
        })
}

/// Reads and writes receive adapters of kind `A`.
#[async_trait]
pub trait AdapterClient<A: Adapter>: Send + Sync {
    /// Returns the adapter, or [`Error::NotFound`] when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<A>;
    async fn create(&self, namespace: &str, adapter: &A) -> Result<A>;
    async fn update(&self, namespace: &str, adapter: &A) -> Result<A>;
    /// Why the pods matching `selector` are not running, if any of them says.
    async fn waiting_state(&self, namespace: &str, selector: &str) -> Result<Option<WaitingState>>;
}

/// An [`AdapterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeAdapterClient {
    client: Client,
}

impl KubeAdapterClient {
    pub fn new(client: Client) -> Self {
        KubeAdapterClient { client }
    }
}

#[async_trait]
impl<A: Adapter> AdapterClient<A> for KubeAdapterClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<A> {
        Api::<A>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(A::KIND, name, e))
    }

    async fn create(&self, namespace: &str, adapter: &A) -> Result<A> {
        Ok(Api::<A>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), adapter)
            .await?)
    }

    async fn update(&self, namespace: &str, adapter: &A) -> Result<A> {
        let name = adapter.meta().name.clone().unwrap_or_default();
        Ok(Api::<A>::namespaced(self.client.clone(), namespace)
            .replace(&name, &PostParams::default(), adapter)
            .await?)
    }

    async fn waiting_state(&self, namespace: &str, selector: &str) -> Result<Option<WaitingState>> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods_waiting_state(&pods.items))
    }
}
