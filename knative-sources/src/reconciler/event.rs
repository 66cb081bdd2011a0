use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Records Kubernetes events about a source.
///
/// Recording is fire-and-forget: failures are logged and never fail reconciliation.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, regarding: &ObjectReference, type_: EventType, reason: &str, note: String);
}

/// An [`EventRecorder`] publishing through the Kubernetes events API.
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        KubeEventRecorder {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, regarding: &ObjectReference, type_: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), regarding.clone());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(reason, error = %e, "failed to record event");
        }
    }
}

/// Records events regarding one object.
pub struct Events<'a> {
    recorder: &'a dyn EventRecorder,
    regarding: ObjectReference,
}

impl<'a> Events<'a> {
    pub fn new(recorder: &'a dyn EventRecorder, regarding: ObjectReference) -> Self {
        Events { recorder, regarding }
    }

    pub async fn normal(&self, reason: &str, note: String) {
        self.recorder.record(&self.regarding, EventType::Normal, reason, note).await
    }

    pub async fn warn(&self, reason: &str, note: String) {
        self.recorder.record(&self.regarding, EventType::Warning, reason, note).await
    }
}
