//! Dispatch of watched sources to their reconcilers.
//!
//! Each source kind runs in its own kube-runtime [`Controller`], triggered by changes to the
//! sources and to the adapters they own. A dispatch pass follows the lifecycle of the source:
//! active sources are reconciled and their status written back, sources pending deletion are
//! finalized before their finalizer is released.

use crate::apis::sources::v1alpha1::{EventSource, HttpSource, SlackSource, ZendeskSource};
use crate::config::{AdapterConfig, ControllerConfig};
use crate::error::Result;
use crate::reconciler::adapter::{Adapter, KubeAdapterClient};
use crate::reconciler::event::{EventRecorder, KubeEventRecorder};
use crate::reconciler::resources::{APP_MANAGED_BY_LABEL, MANAGED_BY};
use crate::reconciler::secret::KubeSecrets;
use crate::reconciler::zendesksource::client::ClientFactory;
use crate::reconciler::{httpsource, slacksource, zendesksource, SourceReconciler};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use knative::conditions::ConditionAccessor;
use knative::resolver::{KubeResolver, UriResolver};
use knative_serving::Service;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a source stands with respect to its deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Deleted, but our finalizer still guards external state.
    PendingDeletion,
    /// Deleted, with nothing left for us to clean up.
    Finalized,
}

impl Lifecycle {
    pub fn of<K: Resource>(obj: &K, finalizer: Option<&str>) -> Self {
        if obj.meta().deletion_timestamp.is_none() {
            return Lifecycle::Active;
        }
        match finalizer {
            Some(finalizer) if obj.finalizers().iter().any(|f| f == finalizer) => Lifecycle::PendingDeletion,
            _ => Lifecycle::Finalized,
        }
    }
}

/// Writes the parts of a source the controller owns.
#[async_trait]
pub trait SourceClient<S: EventSource>: Send + Sync {
    /// Applies `patch`, a JSON merge patch of the object, to the status subresource of `src`.
    async fn patch_status(&self, src: &S, patch: &Value) -> Result<()>;
    async fn set_finalizers(&self, src: &S, finalizers: Vec<String>) -> Result<()>;
}

/// A [`SourceClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSourceClient {
    client: Client,
}

impl KubeSourceClient {
    pub fn new(client: Client) -> Self {
        KubeSourceClient { client }
    }
}

#[async_trait]
impl<S: EventSource> SourceClient<S> for KubeSourceClient {
    async fn patch_status(&self, src: &S, patch: &Value) -> Result<()> {
        let api = Api::<S>::namespaced(self.client.clone(), &src.namespace().unwrap_or_default());
        api.patch_status(&src.name_any(), &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(&self, src: &S, finalizers: Vec<String>) -> Result<()> {
        let api = Api::<S>::namespaced(self.client.clone(), &src.namespace().unwrap_or_default());
        // the resource version makes the write fail if finalizers changed concurrently
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": src.resource_version(),
            }
        });
        api.patch(&src.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// State shared by the dispatch passes of one source kind.
pub struct Context<S: EventSource> {
    reconciler: Arc<dyn SourceReconciler<S>>,
    client: Arc<dyn SourceClient<S>>,
    config: ControllerConfig,
    /// Consecutive failures per `namespace/name`, with the time of the last one.
    failures: Mutex<HashMap<String, (u32, Instant)>>,
}

impl<S: EventSource> Context<S> {
    pub fn new(
        reconciler: Arc<dyn SourceReconciler<S>>,
        client: Arc<dyn SourceClient<S>>,
        config: ControllerConfig,
    ) -> Self {
        Context {
            reconciler,
            client,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn reset_failures(&self, key: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    fn record_failure(&self, key: String) -> u32 {
        let now = Instant::now();
        // a failing source is retried within the maximum backoff, so older entries belong to
        // sources deleted while failing
        let stale = Duration::from_millis(self.config.backoff_max_ms.saturating_mul(2));
        match self.failures.lock() {
            Ok(mut failures) => {
                failures.retain(|_, (_, last)| now.saturating_duration_since(*last) <= stale);
                let (count, last) = failures.entry(key).or_insert((0, now));
                *count = count.saturating_add(1);
                *last = now;
                *count
            }
            Err(_) => 1,
        }
    }
}

/// Merge patch turning the status `before` into `after`. Fields cleared since `before` are
/// sent as `null`, since a merge patch keeps every field it leaves out.
pub fn status_patch<T: Serialize>(before: Option<&T>, after: Option<&T>) -> Result<Value> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;
    Ok(json!({ "status": merge_diff(&before, after) }))
}

fn merge_diff(before: &Value, after: Value) -> Value {
    match (before, after) {
        (Value::Object(before), Value::Object(mut after)) => {
            let mut patch = Map::new();
            for (field, old) in before {
                let value = match after.remove(field) {
                    Some(new) => merge_diff(old, new),
                    None => Value::Null,
                };
                patch.insert(field.clone(), value);
            }
            patch.extend(after);
            Value::Object(patch)
        }
        (_, after) => after,
    }
}

fn key<S: EventSource>(src: &S) -> String {
    format!("{}/{}", src.namespace().unwrap_or_default(), src.name_any())
}

/// Runs one dispatch pass over `obj`.
pub async fn reconcile<S: EventSource>(obj: Arc<S>, ctx: Arc<Context<S>>) -> Result<Action> {
    let mut src = (*obj).clone();
    let key = key(&src);

    let action = match Lifecycle::of(&src, S::FINALIZER) {
        Lifecycle::Finalized => Action::await_change(),
        Lifecycle::PendingDeletion => {
            info!(source = %key, "finalizing");
            ctx.reconciler.finalize_kind(&mut src).await?;

            let finalizers = src
                .finalizers()
                .iter()
                .filter(|f| Some(f.as_str()) != S::FINALIZER)
                .cloned()
                .collect();
            ctx.client.set_finalizers(&src, finalizers).await?;
            Action::await_change()
        }
        Lifecycle::Active => {
            if let Some(finalizer) = S::FINALIZER {
                if !src.finalizers().iter().any(|f| f == finalizer) {
                    let mut finalizers = src.finalizers().to_vec();
                    finalizers.push(finalizer.to_string());
                    ctx.client.set_finalizers(&src, finalizers.clone()).await?;
                    src.meta_mut().finalizers = Some(finalizers);
                }
            }
            reconcile_active(&mut src, &ctx).await?;
            Action::requeue(ctx.config.resync_period())
        }
    };

    ctx.reset_failures(&key);
    Ok(action)
}

async fn reconcile_active<S: EventSource>(src: &mut S, ctx: &Context<S>) -> Result<()> {
    let before = src.source_status().cloned();
    let generation = src.meta().generation;

    src.source_status_mut()
        .manage(ctx.reconciler.condition_set())
        .initialize_conditions();
    let result = ctx.reconciler.reconcile_kind(src).await;
    src.source_status_mut().source_status.status.observed_generation = generation;

    // the outcome of failed passes is recorded too
    if src.source_status() != before.as_ref() {
        debug!(source = %key(src), "updating status");
        let written = match status_patch(before.as_ref(), src.source_status()) {
            Ok(patch) => ctx.client.patch_status(src, &patch).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(source = %key(src), error = %e, "failed to update status");
            return result.and(Err(e.context("updating status")));
        }
    }
    result
}

/// Chooses when to retry a failed dispatch pass.
pub fn error_policy<S: EventSource>(obj: Arc<S>, error: &crate::Error, ctx: Arc<Context<S>>) -> Action {
    let key = key(obj.as_ref());
    if error.is_permanent() {
        error!(source = %key, %error, "reconciliation failed permanently");
        ctx.reset_failures(&key);
        return Action::await_change();
    }

    let failures = ctx.record_failure(key.clone());
    let delay = ctx.config.backoff(failures);
    warn!(source = %key, %error, failures, ?delay, "reconciliation failed, retrying");
    Action::requeue(delay)
}

async fn run_kind<S, A>(client: Client, reconciler: Arc<dyn SourceReconciler<S>>, config: ControllerConfig)
where
    S: EventSource,
    A: Adapter,
{
    let sources = Api::<S>::all(client.clone());
    let adapters = Api::<A>::all(client.clone());
    let managed = format!("{APP_MANAGED_BY_LABEL}={MANAGED_BY}");
    let ctx = Arc::new(Context::new(reconciler, Arc::new(KubeSourceClient::new(client)), config));

    info!(kind = %S::kind(&()), adapter = A::KIND, "starting controller");
    Controller::new(sources, watcher::Config::default().any_semantic())
        .owns(adapters, watcher::Config::default().labels(&managed))
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(source = %obj.name, "reconciled"),
                Err(e) => debug!(error = %e, "dispatch error"),
            }
        })
        .await;
    info!(kind = %S::kind(&()), "controller stopped");
}

/// Runs the controllers of every source kind until a shutdown signal is received.
pub async fn run(client: Client, config: ControllerConfig) -> Result<()> {
    let resolver: Arc<dyn UriResolver> = Arc::new(KubeResolver::new(client.clone(), config.cluster_domain.clone()));
    let recorder: Arc<dyn EventRecorder> = Arc::new(KubeEventRecorder::new(client.clone(), &config.controller_name));
    let adapters = Arc::new(KubeAdapterClient::new(client.clone()));

    let zendesk = zendesksource::Reconciler::new(
        resolver.clone(),
        adapters.clone(),
        recorder.clone(),
        Arc::new(KubeSecrets::new(client.clone())),
        Arc::new(ClientFactory::default()),
        AdapterConfig::from_env(ZendeskSource::ADAPTER_NAME)?,
    );
    let http = httpsource::Reconciler::new(
        resolver.clone(),
        adapters.clone(),
        recorder.clone(),
        AdapterConfig::from_env(HttpSource::ADAPTER_NAME)?,
    );
    let slack = slacksource::Reconciler::new(
        resolver,
        adapters,
        recorder,
        AdapterConfig::from_env(SlackSource::ADAPTER_NAME)?,
    );

    futures::join!(
        run_kind::<ZendeskSource, Service>(client.clone(), Arc::new(zendesk), config.clone()),
        run_kind::<HttpSource, Service>(client.clone(), Arc::new(http), config.clone()),
        run_kind::<SlackSource, Deployment>(client, Arc::new(slack), config),
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::reconciler::testing::{sink_url, zendesk_source};
    use crate::reconciler::zendesksource::client::ZendeskError;
    use crate::apis::sources::v1alpha1::{ZendeskCondition, TargetSyncManager, ZENDESK_REASON_FAILED_SYNC};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use knative::addressable_type::Addressable;
    use knative::conditions::ConditionSet;
    use knative::source_types::SinkManager;

    const FINALIZER: &str = "zendesksources.sources.triggermesh.io";

    /// Marks the target synced, or fails as told.
    struct ScriptedReconciler {
        set: ConditionSet<ZendeskCondition>,
        fail_with: Mutex<Option<u16>>,
        lose_sink: Mutex<bool>,
        finalized: Mutex<usize>,
    }

    impl ScriptedReconciler {
        fn new() -> Self {
            ScriptedReconciler {
                set: ZendeskSource::condition_set(),
                fail_with: Mutex::new(None),
                lose_sink: Mutex::new(false),
                finalized: Mutex::new(0),
            }
        }

        fn failure(&self) -> Option<Error> {
            self.fail_with
                .lock()
                .unwrap()
                .map(|status| Error::from(ZendeskError::Status { status, body: String::new() }))
        }
    }

    #[async_trait]
    impl SourceReconciler<ZendeskSource> for ScriptedReconciler {
        fn condition_set(&self) -> &ConditionSet<ZendeskCondition> {
            &self.set
        }

        async fn reconcile_kind(&self, src: &mut ZendeskSource) -> Result<()> {
            match self.failure() {
                Some(e) => {
                    src.source_status_mut()
                        .mark_target_not_synced(&self.set, ZENDESK_REASON_FAILED_SYNC, e.to_string());
                    Err(e)
                }
                None => {
                    if *self.lose_sink.lock().unwrap() {
                        let status = src.source_status_mut();
                        status.mark_no_sink(&self.set, Some("sink not found".into()));
                        status.address_status.address = None;
                    }
                    src.source_status_mut().mark_target_synced(&self.set);
                    Ok(())
                }
            }
        }

        async fn finalize_kind(&self, _src: &mut ZendeskSource) -> Result<()> {
            match self.failure() {
                Some(e) => Err(e),
                None => {
                    *self.finalized.lock().unwrap() += 1;
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeSourceClient {
        statuses: Mutex<Vec<ZendeskSource>>,
        patches: Mutex<Vec<Value>>,
        finalizers: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl SourceClient<ZendeskSource> for FakeSourceClient {
        async fn patch_status(&self, src: &ZendeskSource, patch: &Value) -> Result<()> {
            self.statuses.lock().unwrap().push(src.clone());
            self.patches.lock().unwrap().push(patch.clone());
            Ok(())
        }

        async fn set_finalizers(&self, _src: &ZendeskSource, finalizers: Vec<String>) -> Result<()> {
            self.finalizers.lock().unwrap().push(finalizers);
            Ok(())
        }
    }

    struct Fixture {
        reconciler: Arc<ScriptedReconciler>,
        client: Arc<FakeSourceClient>,
        ctx: Arc<Context<ZendeskSource>>,
    }

    fn fixture() -> Fixture {
        let reconciler = Arc::new(ScriptedReconciler::new());
        let client = Arc::new(FakeSourceClient::default());
        let ctx = Arc::new(Context::new(reconciler.clone(), client.clone(), ControllerConfig::default()));
        Fixture { reconciler, client, ctx }
    }

    fn deleted(mut src: ZendeskSource, finalizers: &[&str]) -> ZendeskSource {
        src.metadata.deletion_timestamp = Some(Time(Default::default()));
        src.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        src
    }

    #[test]
    fn lifecycle_follows_deletion_and_finalizer() {
        let src = zendesk_source();
        assert_eq!(Lifecycle::of(&src, Some(FINALIZER)), Lifecycle::Active);
        assert_eq!(Lifecycle::of(&deleted(src.clone(), &[FINALIZER]), Some(FINALIZER)), Lifecycle::PendingDeletion);
        assert_eq!(Lifecycle::of(&deleted(src.clone(), &["other"]), Some(FINALIZER)), Lifecycle::Finalized);
        assert_eq!(Lifecycle::of(&deleted(src, &[FINALIZER]), None), Lifecycle::Finalized);
    }

    #[tokio::test]
    async fn active_source_gets_finalizer_and_status() {
        let f = fixture();

        let action = reconcile(Arc::new(zendesk_source()), f.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ControllerConfig::default().resync_period()));
        assert_eq!(*f.client.finalizers.lock().unwrap(), vec![vec![FINALIZER.to_string()]]);
        let statuses = f.client.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        let status = statuses[0].status.as_ref().unwrap();
        assert_eq!(status.source_status.status.observed_generation, Some(1));
        let synced = status.source_status.status.conditions.get(ZendeskCondition::TargetSynced).unwrap();
        assert!(synced.is_true());
        let sink = status.source_status.status.conditions.get(ZendeskCondition::SinkProvided).unwrap();
        assert!(sink.is_unknown());
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let f = fixture();
        reconcile(Arc::new(zendesk_source()), f.ctx.clone()).await.unwrap();
        let written = f.client.statuses.lock().unwrap()[0].clone();

        reconcile(Arc::new(written), f.ctx.clone()).await.unwrap();

        assert_eq!(f.client.statuses.lock().unwrap().len(), 1);
        assert_eq!(f.client.finalizers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleared_fields_are_nulled_in_the_status_patch() {
        let f = fixture();
        reconcile(Arc::new(zendesk_source()), f.ctx.clone()).await.unwrap();
        let mut src = f.client.statuses.lock().unwrap()[0].clone();
        let status = src.source_status_mut();
        status.source_status.sink_uri = Some(sink_url());
        status.address_status.address = Some(Addressable {
            url: Some("https://zendesksource-tickets.dev.example.com".parse().unwrap()),
        });
        *f.reconciler.lose_sink.lock().unwrap() = true;

        reconcile(Arc::new(src), f.ctx.clone()).await.unwrap();

        let patch = f.client.patches.lock().unwrap()[1].clone();
        assert_eq!(patch["status"]["sinkUri"], Value::Null);
        assert_eq!(patch["status"]["address"], Value::Null);
        assert!(patch["status"].as_object().unwrap().contains_key("sinkUri"));
        assert!(patch["status"]["conditions"].as_array().unwrap().iter().any(|c| {
            c["type"] == "SinkProvided" && c["status"] == "False"
        }));
    }

    #[test]
    fn status_patch_sets_new_and_cleared_fields() {
        let before = json!({"sinkUri": "http://old", "conditions": [], "address": {"url": "http://a"}});
        let after = json!({"conditions": [{"type": "Ready"}], "address": {}, "observedGeneration": 2});

        let patch = status_patch(Some(&before), Some(&after)).unwrap();

        assert_eq!(
            patch,
            json!({"status": {
                "sinkUri": null,
                "conditions": [{"type": "Ready"}],
                "address": {"url": null},
                "observedGeneration": 2,
            }})
        );
        assert_eq!(status_patch(None, Some(&after)).unwrap(), json!({ "status": after }));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_of_vanished_sources_are_forgotten() {
        let reconciler = Arc::new(ScriptedReconciler::new());
        let config = ControllerConfig { backoff_max_ms: 1_000, ..Default::default() };
        let ctx = Arc::new(Context::new(reconciler, Arc::new(FakeSourceClient::default()), config));
        let err = Error::Config("boom".into());
        let mut gone = zendesk_source();
        gone.metadata.name = Some("gone".into());
        error_policy(Arc::new(gone), &err, ctx.clone());

        tokio::time::advance(Duration::from_secs(3)).await;
        error_policy(Arc::new(zendesk_source()), &err, ctx.clone());

        let failures = ctx.failures.lock().unwrap();
        assert!(!failures.contains_key("dev/gone"));
        assert_eq!(failures["dev/tickets"].0, 1);
    }

    #[tokio::test]
    async fn failed_pass_still_writes_status() {
        let f = fixture();
        *f.reconciler.fail_with.lock().unwrap() = Some(503);

        let err = reconcile(Arc::new(zendesk_source()), f.ctx.clone()).await.unwrap_err();

        assert!(!err.is_permanent());
        let statuses = f.client.statuses.lock().unwrap();
        let ready = statuses[0]
            .status
            .as_ref()
            .and_then(|s| s.source_status.status.conditions.get(ZendeskCondition::Ready))
            .unwrap();
        assert!(ready.is_false());
        assert!(ready.message.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn finalization_releases_the_source() {
        let f = fixture();
        let src = deleted(zendesk_source(), &["other", FINALIZER]);

        let action = reconcile(Arc::new(src), f.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*f.reconciler.finalized.lock().unwrap(), 1);
        assert_eq!(*f.client.finalizers.lock().unwrap(), vec![vec!["other".to_string()]]);
        assert!(f.client.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_finalization_keeps_the_finalizer() {
        let f = fixture();
        *f.reconciler.fail_with.lock().unwrap() = Some(500);
        let src = deleted(zendesk_source(), &[FINALIZER]);

        assert!(reconcile(Arc::new(src), f.ctx.clone()).await.is_err());
        assert!(f.client.finalizers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalized_source_is_left_alone() {
        let f = fixture();
        let src = deleted(zendesk_source(), &[]);

        let action = reconcile(Arc::new(src), f.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*f.reconciler.finalized.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_errors_back_off() {
        let f = fixture();
        let src = Arc::new(zendesk_source());
        let err = Error::Config("boom".into());

        let delays: Vec<_> = (0..3)
            .map(|_| error_policy(src.clone(), &err, f.ctx.clone()))
            .collect();

        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(5)),
                Action::requeue(Duration::from_secs(10)),
                Action::requeue(Duration::from_secs(20)),
            ]
        );
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let f = fixture();
        let src = Arc::new(zendesk_source());
        let err = Error::Config("boom".into());
        error_policy(src.clone(), &err, f.ctx.clone());
        error_policy(src.clone(), &err, f.ctx.clone());

        reconcile(src.clone(), f.ctx.clone()).await.unwrap();

        assert_eq!(error_policy(src, &err, f.ctx.clone()), Action::requeue(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn permanent_errors_wait_for_changes() {
        let f = fixture();
        let err = Error::from(ZendeskError::Status { status: 401, body: String::new() }).permanent();

        assert_eq!(error_policy(Arc::new(zendesk_source()), &err, f.ctx.clone()), Action::await_change());
    }
}
