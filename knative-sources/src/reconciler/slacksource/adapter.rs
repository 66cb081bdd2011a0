use crate::apis::sources::v1alpha1::SlackSource;
use crate::config::AdapterConfig;
use crate::reconciler::resources::{common_env, env_secret, env_value, make_deployment, observability_env};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::EnvVar;
use url::Url;

/// The Deployment receiving Slack events on behalf of `src`.
pub fn make_adapter(src: &SlackSource, sink: Option<&Url>, config: &AdapterConfig) -> Deployment {
    let mut env = common_env(src, sink);
    env.extend(app_env(src));
    env.extend(observability_env(config, false));
    make_deployment(src, config, env)
}

fn app_env(src: &SlackSource) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if let Some(selector) = src
        .spec
        .signing_secret
        .as_ref()
        .and_then(|secret| secret.secret_key_ref.as_ref())
    {
        env.push(env_secret("SLACK_SIGNING_SECRET", selector));
    }
    if let Some(app_id) = &src.spec.app_id {
        env.push(env_value("SLACK_APP_ID", app_id.clone()));
    }
    env
}
