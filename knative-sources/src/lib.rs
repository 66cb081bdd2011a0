//! Event sources for Zendesk, Slack and plain HTTP, and the controller reconciling them.
//!
//! Every source runs a receive adapter (a Knative [`Service`](knative_serving::Service) or a
//! Deployment) that forwards incoming events to the sink of the source. The Zendesk source
//! additionally registers its adapter with the Zendesk account it reads tickets from.

pub mod apis;
pub mod config;
pub mod controller;
pub mod error;
pub mod reconciler;

pub use error::{Error, Result};
