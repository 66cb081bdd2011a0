use crate::apis::sources::v1alpha1::{EventSource, HttpSource};
use crate::config::AdapterConfig;
use crate::reconciler::resources::{common_env, env_secret, env_value, make_service, observability_env};
use k8s_openapi::api::core::v1::EnvVar;
use knative_serving::Service;
use url::Url;

/// The Knative Service accepting HTTP requests on behalf of `src`.
pub fn make_adapter(src: &HttpSource, sink: Option<&Url>, config: &AdapterConfig) -> Service {
    let mut env = common_env(src, sink);
    env.extend(app_env(src));
    env.extend(observability_env(config, true));
    make_service(src, config, env)
}

fn app_env(src: &HttpSource) -> Vec<EnvVar> {
    let mut env = vec![
        env_value("HTTP_EVENT_TYPE", src.spec.event_type.clone()),
        env_value("HTTP_EVENT_SOURCE", src.as_event_source()),
    ];
    if let Some(username) = &src.spec.basic_auth_username {
        env.push(env_value("HTTP_BASICAUTH_USERNAME", username.clone()));
    }
    if let Some(selector) = src
        .spec
        .basic_auth_password
        .as_ref()
        .and_then(|password| password.secret_key_ref.as_ref())
    {
        env.push(env_secret("HTTP_BASICAUTH_PASSWORD", selector));
    }
    env
}
