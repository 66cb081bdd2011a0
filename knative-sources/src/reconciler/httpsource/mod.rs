//! Reconciler of [`HttpSource`]s, which run their adapter as a Knative Service.

mod adapter;

use super::adapter::AdapterClient;
use super::event::EventRecorder;
use super::generic::GenericReconciler;
use super::SourceReconciler;
use crate::apis::sources::v1alpha1::HttpSource;
use crate::config::AdapterConfig;
use crate::error::Result;
use async_trait::async_trait;
use knative::conditions::ConditionSet;
use knative::event_source_types::EventSourceCondition;
use knative::resolver::UriResolver;
use knative_serving::Service;
use std::sync::Arc;

pub use adapter::make_adapter;

pub struct Reconciler {
    base: GenericReconciler<HttpSource, Service>,
    adapter_config: AdapterConfig,
}

impl Reconciler {
    pub fn new(
        resolver: Arc<dyn UriResolver>,
        adapters: Arc<dyn AdapterClient<Service>>,
        recorder: Arc<dyn EventRecorder>,
        adapter_config: AdapterConfig,
    ) -> Self {
        Reconciler {
            base: GenericReconciler::new(resolver, adapters, recorder),
            adapter_config,
        }
    }
}

#[async_trait]
impl SourceReconciler<HttpSource> for Reconciler {
    fn condition_set(&self) -> &ConditionSet<EventSourceCondition> {
        self.base.condition_set()
    }

    async fn reconcile_kind(&self, src: &mut HttpSource) -> Result<()> {
        let config = &self.adapter_config;
        self.base
            .reconcile_source(src, |src, sink| make_adapter(src, sink, config))
            .await
    }
}
