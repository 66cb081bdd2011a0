use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum ZendeskError {
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid subdomain {0:?}")]
    InvalidSubdomain(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0} returned without an id")]
    MissingId(&'static str),
    #[error("next page {0} is not served by the Zendesk API")]
    ForeignPage(Url),
}

impl ZendeskError {
    /// The request was rejected because of the credentials.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            ZendeskError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED.as_u16() || *status == StatusCode::FORBIDDEN.as_u16()
        )
    }

    /// The object to create exists already.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ZendeskError::Status { status, .. }
                if *status == StatusCode::CONFLICT.as_u16() || *status == StatusCode::UNPROCESSABLE_ENTITY.as_u16()
        )
    }
}

/// A Zendesk Target, the destination of notifications.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub target_url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub content_type: String,
}

/// A Zendesk Trigger, a rule firing actions when its conditions match.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub conditions: TriggerConditions,
    #[serde(default)]
    pub actions: Vec<TriggerAction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TriggerConditions {
    #[serde(default)]
    pub all: Vec<TriggerCondition>,
    #[serde(default)]
    pub any: Vec<TriggerCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TriggerCondition {
    pub field: String,
    pub operator: String,
    pub value: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TriggerAction {
    pub field: String,
    pub value: serde_json::Value,
}

/// The subset of the Zendesk API used to register the webhook of a source.
#[async_trait]
pub trait ZendeskApi: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<Target>, ZendeskError>;
    async fn create_target(&self, target: &Target) -> Result<Target, ZendeskError>;
    async fn delete_target(&self, id: i64) -> Result<(), ZendeskError>;
    async fn list_triggers(&self) -> Result<Vec<Trigger>, ZendeskError>;
    async fn create_trigger(&self, trigger: &Trigger) -> Result<Trigger, ZendeskError>;
    async fn delete_trigger(&self, id: i64) -> Result<(), ZendeskError>;
}

/// API token credential of a Zendesk user.
#[derive(Clone)]
pub struct Credential {
    pub email: String,
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Builds [`ZendeskApi`] clients for a subdomain and credential.
pub trait ApiFactory: Send + Sync {
    fn build(&self, subdomain: &str, credential: Credential) -> Result<Box<dyn ZendeskApi>, ZendeskError>;
}

/// Builds [`ZendeskClient`]s sharing one connection pool.
#[derive(Clone, Default)]
pub struct ClientFactory {
    http: reqwest::Client,
}

impl ApiFactory for ClientFactory {
    fn build(&self, subdomain: &str, credential: Credential) -> Result<Box<dyn ZendeskApi>, ZendeskError> {
        let client = ZendeskClient::new(self.http.clone(), subdomain, credential)?;
        Ok(Box::new(client))
    }
}

/// Client of the Zendesk Support API v2.
pub struct ZendeskClient {
    http: reqwest::Client,
    base: Url,
    credential: Credential,
}

#[derive(Deserialize)]
struct TargetPage {
    #[serde(default)]
    targets: Vec<Target>,
    next_page: Option<String>,
}

#[derive(Deserialize)]
struct TriggerPage {
    #[serde(default)]
    triggers: Vec<Trigger>,
    next_page: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TargetEnvelope<T> {
    target: T,
}

#[derive(Serialize, Deserialize)]
struct TriggerEnvelope<T> {
    trigger: T,
}

fn valid_subdomain(subdomain: &str) -> bool {
    !subdomain.is_empty()
        && !subdomain.starts_with('-')
        && !subdomain.ends_with('-')
        && subdomain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl ZendeskClient {
    pub fn new(http: reqwest::Client, subdomain: &str, credential: Credential) -> Result<Self, ZendeskError> {
        if !valid_subdomain(subdomain) {
            return Err(ZendeskError::InvalidSubdomain(subdomain.to_string()));
        }
        let base = Url::parse(&format!("https://{subdomain}.zendesk.com/api/v2/"))?;
        Ok(Self::with_base_url(http, base, credential))
    }

    /// A client talking to `base` instead of zendesk.com.
    pub fn with_base_url(http: reqwest::Client, base: Url, credential: Credential) -> Self {
        ZendeskClient { http, base, credential }
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(format!("{}/token", self.credential.email), Some(&self.credential.token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ZendeskError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ZendeskError::Status { status: status.as_u16(), body })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ZendeskError> {
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;
        Ok(response.json().await?)
    }

    /// Parses a `next_page` link, which must point back at the API the client talks to.
    fn next_page(&self, link: &str) -> Result<Url, ZendeskError> {
        let url = Url::parse(link)?;
        if url.origin() != self.base.origin() {
            return Err(ZendeskError::ForeignPage(url));
        }
        Ok(url)
    }

    /// Follows `next_page` links until the last page.
    async fn list_all<P, T>(&self, path: &str, split: impl Fn(P) -> (Vec<T>, Option<String>)) -> Result<Vec<T>, ZendeskError>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next = Some(self.base.join(path)?);
        while let Some(url) = next.take() {
            debug!(%url, "listing Zendesk objects");
            let (page, next_page) = split(self.get(url).await?);
            items.extend(page);
            next = next_page.map(|n| self.next_page(&n)).transpose()?;
        }
        Ok(items)
    }
}

#[async_trait]
impl ZendeskApi for ZendeskClient {
    async fn list_targets(&self) -> Result<Vec<Target>, ZendeskError> {
        self.list_all("targets.json", |page: TargetPage| (page.targets, page.next_page)).await
    }

    async fn create_target(&self, target: &Target) -> Result<Target, ZendeskError> {
        let url = self.base.join("targets.json")?;
        let request = self.request(reqwest::Method::POST, url).json(&TargetEnvelope { target });
        let created: TargetEnvelope<Target> = self.send(request).await?.json().await?;
        Ok(created.target)
    }

    async fn delete_target(&self, id: i64) -> Result<(), ZendeskError> {
        let url = self.base.join(&format!("targets/{id}.json"))?;
        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }

    async fn list_triggers(&self) -> Result<Vec<Trigger>, ZendeskError> {
        self.list_all("triggers.json", |page: TriggerPage| (page.triggers, page.next_page)).await
    }

    async fn create_trigger(&self, trigger: &Trigger) -> Result<Trigger, ZendeskError> {
        let url = self.base.join("triggers.json")?;
        let request = self.request(reqwest::Method::POST, url).json(&TriggerEnvelope { trigger });
        let created: TriggerEnvelope<Trigger> = self.send(request).await?.json().await?;
        Ok(created.trigger)
    }

    async fn delete_trigger(&self, id: i64) -> Result<(), ZendeskError> {
        let url = self.base.join(&format!("triggers/{id}.json"))?;
        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ZendeskClient {
        let base = Url::parse(&format!("{}/api/v2/", server.uri())).unwrap();
        ZendeskClient::with_base_url(reqwest::Client::new(), base, credential())
    }

    fn credential() -> Credential {
        Credential { email: "agent@example.com".into(), token: "s3cr3t".into() }
    }

    #[test]
    fn subdomain_is_validated() {
        assert!(ZendeskClient::new(reqwest::Client::new(), "acme", credential()).is_ok());
        assert!(ZendeskClient::new(reqwest::Client::new(), "my-company2", credential()).is_ok());
        for bad in ["", "-acme", "acme-", "acme.evil.com", "Acme"] {
            assert!(matches!(
                ZendeskClient::new(reqwest::Client::new(), bad, credential()),
                Err(ZendeskError::InvalidSubdomain(_))
            ), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn status_classification() {
        let status = |status| ZendeskError::Status { status, body: String::new() };
        assert!(status(401).is_denied());
        assert!(status(403).is_denied());
        assert!(!status(404).is_denied());
        assert!(status(409).is_conflict());
        assert!(status(422).is_conflict());
        assert!(!status(500).is_conflict());
    }

    #[test]
    fn credential_debug_hides_token() {
        assert!(!format!("{:?}", credential()).contains("s3cr3t"));
    }

    #[test]
    fn target_payload_shape() {
        let target = Target {
            title: "io.triggermesh.zendesksource.ns.name".into(),
            type_: "http_target".into(),
            target_url: "https://adapter.example.com".into(),
            method: "post".into(),
            username: Some("zendesk".into()),
            password: Some("hunter2".into()),
            content_type: "application/json".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(TargetEnvelope { target: &target }).unwrap();
        assert_eq!(value["target"]["type"], "http_target");
        assert_eq!(value["target"]["content_type"], "application/json");
        assert!(value["target"].get("id").is_none());
    }

    #[test]
    fn pages_deserialize() {
        let page: TriggerPage = serde_json::from_str(r#"{
            "triggers": [{
                "id": 7,
                "title": "io.triggermesh.zendesksource.ns.name",
                "active": true,
                "conditions": {"all": [{"field": "update_type", "operator": "is", "value": "Create"}], "any": []},
                "actions": [{"field": "notification_target", "value": ["42", "{}"]}]
            }],
            "next_page": "https://acme.zendesk.com/api/v2/triggers.json?page=2",
            "count": 101
        }"#).unwrap();
        assert_eq!(page.triggers[0].id, Some(7));
        assert_eq!(page.triggers[0].actions[0].value[0], "42");
        assert!(page.next_page.is_some());
    }

    #[tokio::test]
    async fn targets_are_listed_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/targets.json"))
            .and(basic_auth("agent@example.com/token", "s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "targets": [{"id": 1, "title": "first", "type": "http_target"}],
                "next_page": format!("{}/api/v2/targets.json?page=2", server.uri()),
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/targets.json"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "targets": [{"id": 2, "title": "second", "type": "http_target"}],
                "next_page": null,
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        let targets = client(&server).list_targets().await.unwrap();

        let titles: Vec<_> = targets.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(targets[1].id, Some(2));
    }

    #[tokio::test]
    async fn next_page_on_another_host_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/triggers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "triggers": [],
                "next_page": "https://collector.example.com/api/v2/triggers.json?page=2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).list_triggers().await.unwrap_err();

        assert!(matches!(err, ZendeskError::ForeignPage(ref url) if url.host_str() == Some("collector.example.com")));
    }

    #[tokio::test]
    async fn forbidden_is_denied() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/triggers/7.json"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;

        let err = client(&server).delete_trigger(7).await.unwrap_err();

        assert!(err.is_denied());
        assert!(matches!(err, ZendeskError::Status { status: 403, ref body } if body == "Forbidden"));
    }

    #[tokio::test]
    async fn created_target_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/targets.json"))
            .and(body_partial_json(json!({"target": {"title": "hook", "type": "http_target"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "target": {"id": 42, "title": "hook", "type": "http_target", "active": true},
            })))
            .expect(1)
            .mount(&server)
            .await;
        let target = Target {
            title: "hook".into(),
            type_: "http_target".into(),
            ..Default::default()
        };

        let created = client(&server).create_target(&target).await.unwrap();

        assert_eq!(created.id, Some(42));
    }

    #[tokio::test]
    async fn duplicate_title_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/triggers.json"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": "RecordInvalid",
                "description": "Record validation errors",
            })))
            .mount(&server)
            .await;
        let trigger = Trigger { title: "hook".into(), ..Default::default() };

        let err = client(&server).create_trigger(&trigger).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(!err.is_denied());
        assert!(err.to_string().contains("RecordInvalid"));
    }
}
