//! Registration of the adapter with Zendesk as a Target and a Trigger.

use super::client::{Credential, Target, Trigger, TriggerAction, TriggerCondition, TriggerConditions, ZendeskApi, ZendeskError};
use super::Reconciler;
use crate::apis::sources::v1alpha1::{
    EventSource, SecretValueFromSource, TargetSyncManager, ZendeskSource, ZENDESK_REASON_FAILED_SYNC,
    ZENDESK_REASON_NO_SECRET, ZENDESK_REASON_NO_URL,
};
use crate::error::{Error, Result};
use crate::reconciler::event::Events;
use crate::reconciler::secret;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};
use url::Url;

pub const REASON_TARGET_CREATED: &str = "TargetCreated";
pub const REASON_TRIGGER_CREATED: &str = "TriggerCreated";
pub const REASON_TARGET_DELETED: &str = "TargetDeleted";
pub const REASON_FAILED_TARGET_DELETE: &str = "FailedTargetDelete";
pub const REASON_FAILED_TARGET_SYNC: &str = "FailedTargetSync";

/// A failed step of the forward sync.
struct SyncFailure {
    step: &'static str,
    error: ZendeskError,
}

fn failed(step: &'static str) -> impl FnOnce(ZendeskError) -> SyncFailure {
    move |error| SyncFailure { step, error }
}

impl Reconciler {
    async fn secret_value(&self, namespace: &str, value: &SecretValueFromSource, field: &'static str) -> Result<String> {
        let selector = value.secret_key_ref.as_ref().ok_or(Error::MissingSecretRef(field))?;
        secret::resolve(self.secrets.as_ref(), namespace, selector).await
    }

    /// Ensures a Target and a Trigger titled after `src` exist in Zendesk.
    ///
    /// Both are only created when missing: users may modify them once the integration is set up.
    pub(super) async fn ensure_target_and_trigger(&self, src: &mut ZendeskSource) -> Result<()> {
        let set = *self.base.condition_set();

        let adapter = match self.base.find_adapter(src).await {
            Ok(adapter) => adapter,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.context("finding receive adapter")),
        };

        // skip this cycle if the adapter URL wasn't yet determined
        let url = match (adapter.is_ready(), adapter.url()) {
            (Some(true), Some(url)) => url.clone(),
            _ => {
                src.source_status_mut().mark_target_sync_pending(
                    &set,
                    ZENDESK_REASON_NO_URL,
                    "The receive adapter did not report its public URL yet".to_string(),
                );
                return Ok(());
            }
        };

        let namespace = src.namespace().unwrap_or_default();
        let token = match self.secret_value(&namespace, &src.spec.token, "token").await {
            Ok(token) => token,
            Err(e) => {
                src.source_status_mut().mark_target_not_synced(
                    &set,
                    ZENDESK_REASON_NO_SECRET,
                    format!("Cannot obtain Zendesk API token: {e}"),
                );
                return Err(e.context("reading Zendesk API token"));
            }
        };
        let webhook_password = match self.secret_value(&namespace, &src.spec.webhook_password, "webhookPassword").await {
            Ok(password) => password,
            Err(e) => {
                src.source_status_mut().mark_target_not_synced(
                    &set,
                    ZENDESK_REASON_NO_SECRET,
                    format!("Cannot obtain webhook password: {e}"),
                );
                return Err(e.context("reading webhook password"));
            }
        };

        let events = Events::new(self.base.recorder(), src.object_ref(&()));
        let title = src.target_title();

        let result = match self.zendesk.build(&src.spec.subdomain, Credential { email: src.spec.email.clone(), token }) {
            Ok(api) => {
                let desired = desired_target(&title, &url, &src.spec.webhook_username, webhook_password);
                self.sync(api.as_ref(), &events, desired).await
            }
            Err(error) => Err(SyncFailure { step: "Unable to create Zendesk client", error }),
        };

        match result {
            Ok(()) => {
                debug!(source = %src.name_any(), %title, "Zendesk Target and Trigger in sync");
                src.source_status_mut().mark_target_synced(&set);
                Ok(())
            }
            Err(SyncFailure { step, error }) => {
                src.source_status_mut().mark_target_not_synced(
                    &set,
                    ZENDESK_REASON_FAILED_SYNC,
                    format!("{step}: {error}"),
                );
                events
                    .warn(REASON_FAILED_TARGET_SYNC, format!("{step} for {title:?}: {error}"))
                    .await;

                let err = Error::from(error).context(step);
                // retrying with credentials Zendesk refused will not help
                if err.is_denied() {
                    Err(err.permanent())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn sync(&self, api: &dyn ZendeskApi, events: &Events<'_>, desired: Target) -> std::result::Result<(), SyncFailure> {
        let title = desired.title.clone();

        let target = match find_target(api, &title).await.map_err(failed("Unable to list Targets"))? {
            Some(target) => target,
            None => {
                let target = match api.create_target(&desired).await {
                    Ok(target) => target,
                    // created concurrently, e.g. by a pass whose response was lost
                    Err(e) if e.is_conflict() => find_target(api, &title)
                        .await
                        .map_err(failed("Unable to list Targets"))?
                        .ok_or_else(|| SyncFailure { step: "Unable to create Target", error: e })?,
                    Err(e) => return Err(SyncFailure { step: "Unable to create Target", error: e }),
                };
                info!(%title, "created Zendesk Target");
                events
                    .normal(REASON_TARGET_CREATED, format!("Zendesk Target {title:?} was created"))
                    .await;
                target
            }
        };

        let target_id = target
            .id
            .ok_or_else(|| SyncFailure { step: "Unable to create Trigger", error: ZendeskError::MissingId("Target") })?;

        if find_trigger(api, &title).await.map_err(failed("Unable to list Triggers"))?.is_none() {
            let desired = desired_trigger(&title, target_id);
            match api.create_trigger(&desired).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    find_trigger(api, &title)
                        .await
                        .map_err(failed("Unable to list Triggers"))?
                        .ok_or_else(|| SyncFailure { step: "Unable to create Trigger", error: e })?;
                }
                Err(e) => return Err(SyncFailure { step: "Unable to create Trigger", error: e }),
            }
            info!(%title, "created Zendesk Trigger");
            events
                .normal(REASON_TRIGGER_CREATED, format!("Zendesk Trigger {title:?} was created"))
                .await;
        }

        Ok(())
    }

    /// Deletes the Trigger, then the Target, titled after `src`.
    ///
    /// Missing credentials and authorization errors are not recoverable here, so they are
    /// recorded as warnings and let the deletion proceed.
    pub(super) async fn ensure_no_target_and_trigger(&self, src: &ZendeskSource) -> Result<()> {
        let events = Events::new(self.base.recorder(), src.object_ref(&()));
        let title = src.target_title();
        let namespace = src.namespace().unwrap_or_default();

        let token = match self.secret_value(&namespace, &src.spec.token, "token").await {
            Ok(token) => token,
            Err(e) if e.is_not_found() => {
                warn!(source = %src.name_any(), error = %e, "secret missing during finalization");
                events
                    .warn(
                        REASON_FAILED_TARGET_DELETE,
                        format!("Secret missing while finalizing Zendesk Target {title:?}. Ignoring: {e}"),
                    )
                    .await;
                return Ok(());
            }
            Err(e) => return Err(e.context("reading Zendesk API token")),
        };

        let api = match self.zendesk.build(&src.spec.subdomain, Credential { email: src.spec.email.clone(), token }) {
            Ok(api) => api,
            Err(e) => return waive_or_fail(&events, &title, e, "creating Zendesk client").await,
        };

        let triggers = match api.list_triggers().await {
            Ok(triggers) => triggers,
            Err(e) => return waive_or_fail(&events, &title, e, "retrieving Zendesk Triggers").await,
        };
        if let Some(id) = triggers.iter().find(|t| t.title == title).and_then(|t| t.id) {
            if let Err(e) = api.delete_trigger(id).await {
                return waive_or_fail(&events, &title, e, "deleting Zendesk Trigger").await;
            }
            events
                .normal(REASON_TARGET_DELETED, format!("Zendesk Trigger {title:?} was deleted"))
                .await;
        }

        let targets = match api.list_targets().await {
            Ok(targets) => targets,
            Err(e) => return waive_or_fail(&events, &title, e, "retrieving Zendesk Targets").await,
        };
        if let Some(id) = targets.iter().find(|t| t.title == title).and_then(|t| t.id) {
            if let Err(e) = api.delete_target(id).await {
                return waive_or_fail(&events, &title, e, "deleting Zendesk Target").await;
            }
            events
                .normal(REASON_TARGET_DELETED, format!("Zendesk Target {title:?} was deleted"))
                .await;
        }

        Ok(())
    }
}

/// Lets finalization succeed on errors it can't recover from, fails it otherwise.
async fn waive_or_fail(events: &Events<'_>, title: &str, error: ZendeskError, step: &str) -> Result<()> {
    if error.is_denied() || matches!(error, ZendeskError::InvalidSubdomain(_)) {
        warn!(%title, %error, "giving up on Zendesk cleanup");
        events
            .warn(
                REASON_FAILED_TARGET_DELETE,
                format!("Authorization error finalizing Zendesk Target {title:?}. Ignoring: {error}"),
            )
            .await;
        return Ok(());
    }
    events
        .warn(REASON_FAILED_TARGET_DELETE, format!("Error {step} {title:?}: {error}"))
        .await;
    Err(Error::from(error).context(step.to_string()))
}

async fn find_target(api: &dyn ZendeskApi, title: &str) -> std::result::Result<Option<Target>, ZendeskError> {
    Ok(api.list_targets().await?.into_iter().find(|t| t.title == title))
}

async fn find_trigger(api: &dyn ZendeskApi, title: &str) -> std::result::Result<Option<Trigger>, ZendeskError> {
    Ok(api.list_triggers().await?.into_iter().find(|t| t.title == title))
}

fn desired_target(title: &str, url: &Url, username: &str, password: String) -> Target {
    Target {
        id: None,
        title: title.to_string(),
        type_: "http_target".to_string(),
        target_url: url.to_string(),
        method: "post".to_string(),
        username: Some(username.to_string()),
        password: Some(password),
        content_type: "application/json".to_string(),
    }
}

fn desired_trigger(title: &str, target_id: i64) -> Trigger {
    Trigger {
        id: None,
        title: title.to_string(),
        conditions: TriggerConditions {
            all: vec![TriggerCondition {
                field: "update_type".to_string(),
                operator: "is".to_string(),
                value: "Create".into(),
            }],
            any: vec![],
        },
        actions: vec![TriggerAction {
            field: "notification_target".to_string(),
            value: serde_json::json!([target_id.to_string(), TRIGGER_PAYLOAD_JSON]),
        }],
    }
}

const TRIGGER_PAYLOAD_JSON: &str = r#"{
  "ticket": {
    "id": {{ticket.id}},
    "external_id": "{{ticket.external_id}}",
    "title": "{{ticket.title}}",
    "url": "{{ticket.url}}",
    "description": "{{ticket.description}}",
    "via": "{{ticket.via}}",
    "status": "{{ticket.status}}",
    "priority": "{{ticket.priority}}",
    "ticket_type": "{{ticket.ticket_type}}",
    "group_name": "{{ticket.group.name}}",
    "brand_name": "{{ticket.brand.name}}",
    "due_date": "{{ticket.due_date}}",
    "account": "{{ticket.account}}",
    "assignee": {
      "email": "{{ticket.assignee.email}}",
      "name": "{{ticket.assignee.name}}",
      "first_name": "{{ticket.assignee.first_name}}",
      "last_name": "{{ticket.assignee.last_name}}"
    },
    "requester": {
      "name": "{{ticket.requester.name}}",
      "first_name": "{{ticket.requester.first_name}}",
      "last_name": "{{ticket.requester.last_name}}",
      "email": "{{ticket.requester.email}}",
      "language": "{{ticket.requester.language}}",
      "phone": "{{ticket.requester.phone}}",
      "external_id": "{{ticket.requester.external_id}}",
      "field": "{{ticket.requester_field}}",
      "details": "{{ticket.requester.details}}"
    },
    "organization": {
      "name": "{{ticket.organization.name}}",
      "external_id": "{{ticket.organization.external_id}}",
      "details": "{{ticket.organization.details}}",
      "notes": "{{ticket.organization.notes}}"
    },
    "ccs": "{{ticket.ccs}}",
    "cc_names": "{{ticket.cc_names}}",
    "tags": "{{ticket.tags}}",
    "current_holiday_name": "{{ticket.current_holiday_name}}",
    "ticket_field_id": "{{ticket.ticket_field_ID}}",
    "ticket_field_option_title_id": "{{ticket.ticket_field_option_title_ID}}"
  },
  "current_user": {
    "name": "{{current_user.name}}",
    "first_name": "{{current_user.first_name}}",
    "email": "{{current_user.email}}",
    "organization": {
      "name": "{{current_user.organization.name}}",
      "notes": "{{current_user.organization.notes}}",
      "details": "{{current_user.organization.details}}"
    },
    "external_id": "{{current_user.external_id}}",
    "phone": "{{current_user.phone}}",
    "details": "{{current_user.details}}",
    "notes": "{{current_user.notes}}",
    "language": "{{current_user.language}}"
  },
  "satisfaction": {
    "current_rating": "{{satisfaction.current_rating}}",
    "current_comment": "{{satisfaction.current_comment}}"
  }
}"#;
