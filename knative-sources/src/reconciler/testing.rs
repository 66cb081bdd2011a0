//! In-memory fakes of the collaborators of the reconcilers.

use super::adapter::{Adapter, AdapterClient};
use super::event::EventRecorder;
use super::secret::SecretGetter;
use super::zendesksource::client::{ApiFactory, Credential, Target, Trigger, ZendeskApi, ZendeskError};
use crate::apis::sources::v1alpha1::{
    HttpSource, HttpSourceSpec, SecretValueFromSource, SlackSource, SlackSourceSpec, ZendeskSource,
    ZendeskSourceSpec,
};
use crate::config::{AdapterConfig, ObservabilityConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, SecretKeySelector};
use knative::event_source_types::WaitingState;
use knative::knative_reference::KReference;
use knative::resolver::UriResolver;
use knative::source_types::{Destination, SourceSpec};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use url::Url;

pub fn adapter_config() -> AdapterConfig {
    AdapterConfig {
        image: "gcr.io/example/adapter:v1".into(),
        observability: ObservabilityConfig::default(),
    }
}

pub fn broker_sink() -> Destination {
    Destination::from(KReference {
        kind: "Broker".into(),
        name: "default".into(),
        api_version: Some("eventing.knative.dev/v1".into()),
        ..Default::default()
    })
}

pub fn sink_url() -> Url {
    "http://broker-ingress.knative-eventing.svc.cluster.local/dev/default".parse().unwrap()
}

fn source_spec() -> SourceSpec {
    SourceSpec {
        sink: Some(broker_sink()),
        ce_overrides: None,
    }
}

pub fn http_source() -> HttpSource {
    let mut src = HttpSource::new("webhook", HttpSourceSpec {
        source_spec: source_spec(),
        event_type: "com.example.push".into(),
        basic_auth_username: Some("user".into()),
        basic_auth_password: Some(secret_value("http", "password")),
        ..Default::default()
    });
    src.metadata.namespace = Some("dev".into());
    src.metadata.uid = Some("0d1d4b1e-1111".into());
    src.metadata.generation = Some(1);
    src
}

pub fn slack_source() -> SlackSource {
    let mut src = SlackSource::new("team", SlackSourceSpec {
        source_spec: source_spec(),
        signing_secret: Some(secret_value("slack", "signingSecret")),
        app_id: Some("A012345".into()),
    });
    src.metadata.namespace = Some("dev".into());
    src.metadata.uid = Some("0d1d4b1e-2222".into());
    src.metadata.generation = Some(1);
    src
}

pub fn zendesk_source() -> ZendeskSource {
    let mut src = ZendeskSource::new("tickets", ZendeskSourceSpec {
        source_spec: source_spec(),
        token: secret_value("zendesk", "apiToken"),
        email: "agent@example.com".into(),
        webhook_password: secret_value("zendesk", "webhookPassword"),
        webhook_username: "zendesk".into(),
        subdomain: "acme".into(),
    });
    src.metadata.namespace = Some("dev".into());
    src.metadata.uid = Some("0d1d4b1e-3333".into());
    src.metadata.generation = Some(1);
    src
}

pub fn secret_value(name: &str, key: &str) -> SecretValueFromSource {
    SecretValueFromSource {
        secret_key_ref: Some(SecretKeySelector {
            name: Some(name.into()),
            key: key.into(),
            optional: None,
        }),
    }
}

/// Resolves every destination to one URL, or fails as if the sink did not exist.
#[derive(Default)]
pub struct FakeResolver {
    url: Mutex<Option<Url>>,
}

impl FakeResolver {
    pub fn resolving(url: Url) -> Self {
        FakeResolver { url: Mutex::new(Some(url)) }
    }

    pub fn remove_sink(&self) {
        *self.url.lock().unwrap() = None;
    }
}

#[async_trait]
impl UriResolver for FakeResolver {
    async fn uri_from_destination(&self, _dest: &Destination, _namespace: &str) -> Result<Url, knative::error::Error> {
        self.url.lock().unwrap().clone().ok_or_else(|| {
            knative::error::Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: "brokers.eventing.knative.dev \"default\" not found".into(),
                reason: "NotFound".into(),
                code: 404,
            }))
        })
    }
}

/// Stores adapters in memory and counts writes.
pub struct FakeAdapters<A> {
    pub objects: Mutex<BTreeMap<String, A>>,
    pub creates: Mutex<usize>,
    pub updates: Mutex<usize>,
    pub fail_create: Mutex<Option<String>>,
    pub fail_update: Mutex<Option<String>>,
    pub waiting: Mutex<Option<WaitingState>>,
    /// Applied to every written adapter, as the API server fills in defaults.
    pub defaults: Mutex<Option<fn(&mut A)>>,
}

impl<A> Default for FakeAdapters<A> {
    fn default() -> Self {
        FakeAdapters {
            objects: Mutex::new(BTreeMap::new()),
            creates: Mutex::new(0),
            updates: Mutex::new(0),
            fail_create: Mutex::new(None),
            fail_update: Mutex::new(None),
            waiting: Mutex::new(None),
            defaults: Mutex::new(None),
        }
    }
}

impl<A: Adapter> FakeAdapters<A> {
    pub fn creates(&self) -> usize {
        *self.creates.lock().unwrap()
    }

    pub fn updates(&self) -> usize {
        *self.updates.lock().unwrap()
    }

    /// Mutates a stored adapter as another actor would.
    pub fn modify(&self, name: &str, f: impl FnOnce(&mut A)) {
        let mut objects = self.objects.lock().unwrap();
        f(objects.get_mut(name).expect("adapter exists"));
    }

    pub fn stored(&self, name: &str) -> Option<A> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    fn store(&self, adapter: &A) -> A {
        let mut stored = adapter.clone();
        if let Some(defaults) = *self.defaults.lock().unwrap() {
            defaults(&mut stored);
        }
        self.objects.lock().unwrap().insert(stored.name_any(), stored.clone());
        stored
    }
}

#[async_trait]
impl<A: Adapter> AdapterClient<A> for FakeAdapters<A> {
    async fn get(&self, _namespace: &str, name: &str) -> Result<A> {
        self.objects.lock().unwrap().get(name).cloned().ok_or_else(|| Error::NotFound {
            kind: A::KIND,
            name: name.to_string(),
        })
    }

    async fn create(&self, _namespace: &str, adapter: &A) -> Result<A> {
        if let Some(message) = self.fail_create.lock().unwrap().clone() {
            return Err(Error::Config(message));
        }
        *self.creates.lock().unwrap() += 1;
        let mut created = adapter.clone();
        created.meta_mut().resource_version = Some("1".into());
        Ok(self.store(&created))
    }

    async fn update(&self, _namespace: &str, adapter: &A) -> Result<A> {
        if let Some(message) = self.fail_update.lock().unwrap().clone() {
            return Err(Error::Config(message));
        }
        *self.updates.lock().unwrap() += 1;
        Ok(self.store(adapter))
    }

    async fn waiting_state(&self, _namespace: &str, _selector: &str) -> Result<Option<WaitingState>> {
        Ok(self.waiting.lock().unwrap().clone())
    }
}

/// Remembers recorded events in order.
#[derive(Default)]
pub struct FakeRecorder {
    pub events: Mutex<Vec<(bool, String, String)>>,
}

impl FakeRecorder {
    /// Reasons of the recorded events, warnings prefixed with `!`.
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(warning, reason, _)| if *warning { format!("!{reason}") } else { reason.clone() })
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, _, note)| note.clone()).collect()
    }
}

#[async_trait]
impl EventRecorder for FakeRecorder {
    async fn record(&self, _regarding: &ObjectReference, type_: EventType, reason: &str, note: String) {
        let warning = matches!(type_, EventType::Warning);
        self.events.lock().unwrap().push((warning, reason.to_string(), note));
    }
}

/// Secrets keyed by namespace and name.
#[derive(Default)]
pub struct FakeSecrets {
    data: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
}

impl FakeSecrets {
    pub fn with(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.data.insert(
            (namespace.to_string(), name.to_string()),
            data.iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect(),
        );
        self
    }
}

#[async_trait]
impl SecretGetter for FakeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.data
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound { kind: "Secret", name: name.to_string() })
    }
}

/// State of a fake Zendesk account.
#[derive(Default)]
pub struct ZendeskState {
    pub targets: Vec<Target>,
    pub triggers: Vec<Trigger>,
    pub next_id: i64,
    /// Calls made, in order, e.g. `delete_trigger(2)`.
    pub calls: Vec<String>,
    /// Status every call fails with.
    pub fail_with: Option<u16>,
    /// Status trigger creation fails with.
    pub fail_create_trigger: Option<u16>,
    /// Report creations as conflicts while storing the object, as a racing writer would.
    pub conflict_on_create: bool,
    pub credentials: Vec<(String, String, String)>,
}

impl ZendeskState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self) -> Result<(), ZendeskError> {
        match self.fail_with {
            Some(status) => Err(ZendeskError::Status { status, body: String::new() }),
            None => Ok(()),
        }
    }
}

/// A fake Zendesk account shared by every client the factory builds.
#[derive(Clone, Default)]
pub struct FakeZendesk {
    pub state: Arc<Mutex<ZendeskState>>,
}

impl FakeZendesk {
    pub fn with_target(self, title: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.id();
            state.targets.push(Target { id: Some(id), title: title.into(), ..Default::default() });
        }
        self
    }

    pub fn with_trigger(self, title: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.id();
            state.triggers.push(Trigger { id: Some(id), title: title.into(), ..Default::default() });
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| !c.starts_with("list")).collect()
    }
}

impl ApiFactory for FakeZendesk {
    fn build(&self, subdomain: &str, credential: Credential) -> Result<Box<dyn ZendeskApi>, ZendeskError> {
        self.state.lock().unwrap().credentials.push((
            subdomain.to_string(),
            credential.email,
            credential.token,
        ));
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ZendeskApi for FakeZendesk {
    async fn list_targets(&self) -> Result<Vec<Target>, ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_targets".into());
        state.check()?;
        Ok(state.targets.clone())
    }

    async fn create_target(&self, target: &Target) -> Result<Target, ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_target({})", target.title));
        state.check()?;
        let id = state.id();
        let created = Target { id: Some(id), ..target.clone() };
        state.targets.push(created.clone());
        if state.conflict_on_create {
            return Err(ZendeskError::Status { status: 422, body: "Title taken".into() });
        }
        Ok(created)
    }

    async fn delete_target(&self, id: i64) -> Result<(), ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_target({id})"));
        state.check()?;
        state.targets.retain(|t| t.id != Some(id));
        Ok(())
    }

    async fn list_triggers(&self) -> Result<Vec<Trigger>, ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_triggers".into());
        state.check()?;
        Ok(state.triggers.clone())
    }

    async fn create_trigger(&self, trigger: &Trigger) -> Result<Trigger, ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_trigger({})", trigger.title));
        state.check()?;
        if let Some(status) = state.fail_create_trigger {
            return Err(ZendeskError::Status { status, body: String::new() });
        }
        let id = state.id();
        let created = Trigger { id: Some(id), ..trigger.clone() };
        state.triggers.push(created.clone());
        Ok(created)
    }

    async fn delete_trigger(&self, id: i64) -> Result<(), ZendeskError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_trigger({id})"));
        state.check()?;
        state.triggers.retain(|t| t.id != Some(id));
        Ok(())
    }
}
