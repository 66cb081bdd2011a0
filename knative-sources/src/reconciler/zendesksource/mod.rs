//! Reconciler of [`ZendeskSource`]s: a Knative Service receiving webhook calls, and a
//! Zendesk Target and Trigger sending them.

mod adapter;
pub mod client;
mod sync;

use super::adapter::AdapterClient;
use super::event::EventRecorder;
use super::generic::GenericReconciler;
use super::secret::SecretGetter;
use super::SourceReconciler;
use crate::apis::sources::v1alpha1::{ZendeskCondition, ZendeskSource};
use crate::config::AdapterConfig;
use crate::error::Result;
use async_trait::async_trait;
use client::ApiFactory;
use knative::conditions::ConditionSet;
use knative::resolver::UriResolver;
use knative_serving::Service;
use std::sync::Arc;

pub use adapter::make_adapter;

pub struct Reconciler {
    base: GenericReconciler<ZendeskSource, Service>,
    secrets: Arc<dyn SecretGetter>,
    zendesk: Arc<dyn ApiFactory>,
    adapter_config: AdapterConfig,
}

impl Reconciler {
    pub fn new(
        resolver: Arc<dyn UriResolver>,
        adapters: Arc<dyn AdapterClient<Service>>,
        recorder: Arc<dyn EventRecorder>,
        secrets: Arc<dyn SecretGetter>,
        zendesk: Arc<dyn ApiFactory>,
        adapter_config: AdapterConfig,
    ) -> Self {
        Reconciler {
            base: GenericReconciler::new(resolver, adapters, recorder),
            secrets,
            zendesk,
            adapter_config,
        }
    }
}

#[async_trait]
impl SourceReconciler<ZendeskSource> for Reconciler {
    fn condition_set(&self) -> &ConditionSet<ZendeskCondition> {
        self.base.condition_set()
    }

    async fn reconcile_kind(&self, src: &mut ZendeskSource) -> Result<()> {
        let config = &self.adapter_config;
        self.base
            .reconcile_source(src, |src, sink| make_adapter(src, sink, config))
            .await
            .map_err(|e| e.context("failed to reconcile source"))?;

        self.ensure_target_and_trigger(src).await
    }

    async fn finalize_kind(&self, src: &mut ZendeskSource) -> Result<()> {
        // blocks the deletion of the source until no Target or Trigger is left behind
        self.ensure_no_target_and_trigger(src).await
    }
}
