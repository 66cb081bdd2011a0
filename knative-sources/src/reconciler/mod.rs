//! Reconcilers of the source kinds and their collaborators.

pub mod adapter;
pub mod event;
pub mod generic;
pub mod httpsource;
pub mod resources;
pub mod secret;
pub mod slacksource;
pub mod zendesksource;

#[cfg(test)]
pub(crate) mod testing;

use crate::apis::sources::v1alpha1::EventSource;
use crate::error::Result;
use async_trait::async_trait;
use knative::conditions::ConditionSet;

/// Reconciles one kind of source.
///
/// Implementations only mutate the status of the source they are handed; persisting it is
/// left to the caller.
#[async_trait]
pub trait SourceReconciler<S: EventSource>: Send + Sync {
    /// The condition set of the status of `S`.
    fn condition_set(&self) -> &ConditionSet<S::Condition>;

    /// Drives the world towards the spec of `src` and records the outcome in its status.
    async fn reconcile_kind(&self, src: &mut S) -> Result<()>;

    /// Cleans up external state before `src` is deleted. Only called for kinds with a
    /// finalizer.
    async fn finalize_kind(&self, _src: &mut S) -> Result<()> {
        Ok(())
    }
}
