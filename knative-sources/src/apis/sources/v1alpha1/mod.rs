mod common;
mod httpsource;
mod slacksource;
mod zendesksource;

pub use common::{EventSource, SecretValueFromSource};
pub use httpsource::{HttpSource, HttpSourceSpec, HttpSourceStatus};
pub use slacksource::{SlackSource, SlackSourceSpec, SlackSourceStatus};
pub use zendesksource::{
    ZendeskCondition, ZendeskSource, ZendeskSourceSpec,
    ZendeskSourceStatus, TargetSyncManager, ZENDESK_REASON_FAILED_SYNC, ZENDESK_REASON_NO_SECRET,
    ZENDESK_REASON_NO_URL,
};
