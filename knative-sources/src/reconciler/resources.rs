//! Builders of receive adapter objects.

use crate::apis::sources::v1alpha1::EventSource;
use crate::config::{AdapterConfig, ENV_LOGGING_CONFIG, ENV_METRICS_CONFIG, ENV_TRACING_CONFIG};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use knative_serving::apis::serving::v1::service::{RevisionSpec, RevisionTemplateSpec};
use knative_serving::{Service, ServiceSpec};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use url::Url;

// Kubernetes recommended labels
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const APP_PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const ADAPTER_COMPONENT: &str = "adapter";
pub const PART_OF: &str = "knative-sources";
pub const MANAGED_BY: &str = "knative-sources-controller";

/// Longest name a Kubernetes object may have.
const MAX_NAME_LEN: usize = 63;
/// Hex length of an md5 digest.
const HASH_LEN: usize = 32;

/// Deterministic name of a child object. Names longer than 63 characters are truncated and
/// suffixed with the md5 digest of the full name, so distinct parents keep distinct children.
pub fn child_name(prefix: &str, parent: &str) -> String {
    let name = format!("{prefix}{parent}");
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let digest = format!("{:x}", md5::compute(name.as_bytes()));
    let mut head: String = name.chars().take(MAX_NAME_LEN - HASH_LEN).collect();
    // names may not end with a separator before the digest
    while head.ends_with('-') || head.ends_with('.') {
        head.pop();
    }
    head + &digest
}

/// Name of the receive adapter of `src`.
pub fn adapter_name<S: EventSource>(src: &S) -> String {
    child_name(&format!("{}-", S::ADAPTER_NAME), &src.name_any())
}

/// Labels of the receive adapter of `src`. Also used as the selector of Deployments.
pub fn adapter_labels<S: EventSource>(src: &S) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_LABEL.to_string(), S::ADAPTER_NAME.to_string()),
        (APP_INSTANCE_LABEL.to_string(), src.name_any()),
        (APP_COMPONENT_LABEL.to_string(), ADAPTER_COMPONENT.to_string()),
        (APP_PART_OF_LABEL.to_string(), PART_OF.to_string()),
        (APP_MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

fn owner_references<S: EventSource>(src: &S) -> Option<Vec<OwnerReference>> {
    src.controller_owner_ref(&()).map(|owner| vec![owner])
}

pub fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub fn env_secret(name: &str, selector: &SecretKeySelector) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(selector.clone()),
            ..Default::default()
        }),
    }
}

/// `NAMESPACE`, `NAME`, `K_SINK` and `K_CE_OVERRIDES` of every adapter.
pub fn common_env<S: EventSource>(src: &S, sink: Option<&Url>) -> Vec<EnvVar> {
    let mut env = vec![
        env_value("NAMESPACE", src.namespace().unwrap_or_default()),
        env_value("NAME", adapter_name(src)),
    ];
    if let Some(sink) = sink {
        env.push(env_value("K_SINK", sink.as_str()));
    }
    if let Some(overrides) = &src.source_spec().ce_overrides {
        // a map of strings always serializes
        if let Ok(json) = serde_json::to_string(overrides) {
            env.push(env_value("K_CE_OVERRIDES", json));
        }
    }
    env
}

/// Observability settings of the adapter. Knative Services blank the metrics settings
/// because queue-proxy already serves on the metrics port.
pub fn observability_env(config: &AdapterConfig, knative_service: bool) -> Vec<EnvVar> {
    let obs = &config.observability;
    let metrics = if knative_service { String::new() } else { obs.metrics.clone() };
    vec![
        env_value(ENV_LOGGING_CONFIG, obs.logging.clone()),
        env_value(ENV_METRICS_CONFIG, metrics),
        env_value(ENV_TRACING_CONFIG, obs.tracing.clone()),
    ]
}

fn adapter_container(config: &AdapterConfig, env: Vec<EnvVar>, ports: Option<Vec<ContainerPort>>) -> Container {
    Container {
        name: ADAPTER_COMPONENT.to_string(),
        image: Some(config.image.clone()),
        env: Some(env),
        ports,
        ..Default::default()
    }
}

/// A Knative Service running the receive adapter of `src`.
pub fn make_service<S: EventSource>(src: &S, config: &AdapterConfig, env: Vec<EnvVar>) -> Service {
    let labels = adapter_labels(src);
    let mut ksvc = Service::new(&adapter_name(src), ServiceSpec {
        template: RevisionTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: RevisionSpec {
                pod_spec: PodSpec {
                    containers: vec![adapter_container(config, env, None)],
                    ..Default::default()
                },
                ..Default::default()
            },
        },
    });
    ksvc.metadata.namespace = src.namespace();
    ksvc.metadata.labels = Some(labels);
    ksvc.metadata.owner_references = owner_references(src);
    ksvc
}

/// A Deployment running the receive adapter of `src`.
pub fn make_deployment<S: EventSource>(src: &S, config: &AdapterConfig, env: Vec<EnvVar>) -> Deployment {
    let labels = adapter_labels(src);
    let ports = vec![ContainerPort {
        name: Some("http".to_string()),
        container_port: 8080,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    Deployment {
        metadata: ObjectMeta {
            name: Some(adapter_name(src)),
            namespace: src.namespace(),
            labels: Some(labels.clone()),
            owner_references: owner_references(src),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![adapter_container(config, env, Some(ports))],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
