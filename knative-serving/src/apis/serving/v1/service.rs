use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use knative::{
    addressable_type::Addressable,
    conditions::{ConditionStatus, ConditionType},
    derive::ConditionType,
    status_types::Status,
};
use enumset::EnumSetType;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Service acts as a top-level container that manages a Route and Configuration which
/// implement a network service.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "Service",
    group = "serving.knative.dev",
    version = "v1",
    status = "ServiceStatus",
    shortname = "ksvc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Template holds the latest specification for the Revision to be stamped out.
    pub template: RevisionTemplateSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,
    #[serde(default)]
    pub spec: RevisionSpec,
}

/// RevisionSpec holds the desired state of the Revision.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    #[serde(flatten)]
    pub pod_spec: PodSpec,
    /// The maximum number of requests that can be in flight at once to a Revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_concurrency: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

#[derive(ConditionType, EnumSetType, Deserialize, Serialize, Debug, JsonSchema)]
pub enum ServiceCondition {
    Ready,
    /// The Configuration has a ready Revision.
    #[dependent]
    ConfigurationsReady,
    /// The Route is ready to serve traffic.
    #[dependent]
    RoutesReady,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub status: Status<ServiceCondition>,
    /// URL holds the url that will distribute traffic over the provided traffic targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<url::Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_revision_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ready_revision_name: Option<String>,
}

impl Service {
    fn ready_condition(&self) -> Option<&knative::conditions::Condition<ServiceCondition>> {
        let status = self.status.as_ref()?;
        // the status describes an older generation of the spec
        if status.status.observed_generation != self.metadata.generation {
            return None;
        }
        status.status.conditions.get(ServiceCondition::happy())
    }

    /// Whether the Service is ready. `None` while the controller has not reported on the
    /// current generation.
    pub fn is_ready(&self) -> Option<bool> {
        self.ready_condition().and_then(|cond| match cond.status {
            ConditionStatus::True => Some(true),
            ConditionStatus::False => Some(false),
            ConditionStatus::Unknown => None,
        })
    }

    /// The message of the Ready condition, if any.
    pub fn ready_message(&self) -> Option<&str> {
        self.ready_condition().and_then(|cond| cond.message.as_deref())
    }

    /// The public URL of the Service, once routed.
    pub fn url(&self) -> Option<&url::Url> {
        self.status.as_ref().and_then(|status| status.url.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const READY: &str = r#"
apiVersion: serving.knative.dev/v1
kind: Service
metadata:
  name: zendesksource-sample
  namespace: default
  generation: 2
spec:
  template:
    metadata:
      annotations:
        autoscaling.knative.dev/minScale: "1"
    spec:
      containers:
      - image: gcr.io/triggermesh/zendesksource-adapter
        env:
        - name: NAMESPACE
          value: default
status:
  observedGeneration: 2
  url: http://zendesksource-sample.default.example.com
  address:
    url: http://zendesksource-sample.default.svc.cluster.local
  conditions:
  - type: ConfigurationsReady
    status: "True"
  - type: Ready
    status: "True"
  - type: RoutesReady
    status: "True"
"#;

    fn ready_service() -> Service {
        serde_yaml::from_str(READY).unwrap()
    }

    #[test]
    fn deserializes_ready_service() {
        let ksvc = ready_service();
        assert_eq!(ksvc.is_ready(), Some(true));
        assert_eq!(ksvc.url().unwrap().as_str(), "http://zendesksource-sample.default.example.com/");
        let container = &ksvc.spec.template.spec.pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("gcr.io/triggermesh/zendesksource-adapter"));
    }

    #[test]
    fn stale_generation_is_not_ready() {
        let mut ksvc = ready_service();
        ksvc.metadata.generation = Some(3);
        assert_eq!(ksvc.is_ready(), None);
    }

    #[test]
    fn failed_service_reports_message() {
        let mut ksvc = ready_service();
        let status = ksvc.status.as_mut().unwrap();
        status.status.conditions = serde_json::from_str(
            r#"[{"type": "Ready", "status": "False", "reason": "RevisionFailed", "message": "Revision failed"}]"#,
        )
        .unwrap();
        assert_eq!(ksvc.is_ready(), Some(false));
        assert_eq!(ksvc.ready_message(), Some("Revision failed"));
    }

    #[test]
    fn new_service_has_no_readiness() {
        let ksvc = Service::new("adapter", ServiceSpec::default());
        assert_eq!(ksvc.is_ready(), None);
        assert!(ksvc.url().is_none());
    }
}
