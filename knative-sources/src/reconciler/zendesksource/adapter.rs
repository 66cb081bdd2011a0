use crate::apis::sources::v1alpha1::ZendeskSource;
use crate::config::AdapterConfig;
use crate::reconciler::resources::{common_env, env_secret, env_value, make_service, observability_env};
use k8s_openapi::api::core::v1::EnvVar;
use knative_serving::Service;
use url::Url;

/// The Knative Service receiving webhook calls from Zendesk.
pub fn make_adapter(src: &ZendeskSource, sink: Option<&Url>, config: &AdapterConfig) -> Service {
    let mut env = common_env(src, sink);
    env.extend(app_env(src));
    env.extend(observability_env(config, true));
    make_service(src, config, env)
}

fn app_env(src: &ZendeskSource) -> Vec<EnvVar> {
    let mut env = vec![env_value("ZENDESK_WEBHOOK_USERNAME", src.spec.webhook_username.clone())];
    if let Some(selector) = &src.spec.webhook_password.secret_key_ref {
        env.push(env_secret("ZENDESK_WEBHOOK_PASSWORD", selector));
    }
    env.push(env_value("ZENDESK_SUBDOMAIN", src.spec.subdomain.clone()));
    env
}
