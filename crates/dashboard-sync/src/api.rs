//! REST client for the CRM backend.
//!
//! Reads go through [`ApiClient::fetch_or_fallback`], which never fails except
//! for a rejected session: timeouts, network errors and server errors are
//! answered with the demo payload for that resource.

use std::fmt;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value, json};
use telemetry::SecretString;
use tracing::{debug, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::fallback::demo_payload;
use dashboard_state::{Decision, keys};

pub const DEMO_MODE_HEADER: &str = "x-demo-mode";

type Result<T> = std::result::Result<T, ApiError>;

/// Dashboard slices the backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Summary,
    Applications,
    Queue,
    SlaAnalytics,
    InvestorMetrics,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Summary,
        Resource::Applications,
        Resource::Queue,
        Resource::SlaAnalytics,
        Resource::InvestorMetrics,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Resource::Summary => "dashboard/summary",
            Resource::Applications => "applications",
            Resource::Queue => "queue",
            Resource::SlaAnalytics => "sla/analytics",
            Resource::InvestorMetrics => "investor/metrics",
        }
    }

    fn segments(self) -> Vec<&'static str> {
        self.path().split('/').collect()
    }

    pub fn store_key(self) -> &'static str {
        match self {
            Resource::Summary => keys::DASHBOARD_SUMMARY,
            Resource::Applications => keys::APPLICATIONS,
            Resource::Queue => keys::QUEUE,
            Resource::SlaAnalytics => keys::SLA_ANALYTICS,
            Resource::InvestorMetrics => keys::INVESTOR_METRICS,
        }
    }

    /// List resources are stored as `{items, isDemo}`.
    fn is_list(self) -> bool {
        matches!(self, Resource::Applications | Resource::Queue)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A fetched slice and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced {
    pub value: Value,
    pub is_demo: bool,
    /// The backend failed and `value` is the local demo payload.
    pub fallback: bool,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: SecretString,
    http: Client,
    demo_fallback: bool,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .field("demo_fallback", &self.demo_fallback)
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &SyncConfig, token: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.api_base_url.clone(),
            token,
            http,
            demo_fallback: config.polling.demo_fallback,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|_| ApiError::Unauthorized)?;
        Ok(self
            .http
            .request(method, self.url(segments)?)
            .header(AUTHORIZATION, bearer))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Http(err)
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn json_body(response: Response) -> Result<(Value, bool)> {
        let header_demo = is_demo_header(response.headers());
        let bytes = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Http(err)
            }
        })?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((value, header_demo))
    }

    /// Fetch one slice from the backend.
    pub async fn fetch(&self, resource: Resource) -> Result<Sourced> {
        let response = self.send(self.request(Method::GET, &resource.segments())?).await?;
        let (body, header_demo) = Self::json_body(response).await?;
        let body_demo = body.get("isDemo").and_then(Value::as_bool).unwrap_or(false);
        let is_demo = header_demo || body_demo;
        debug!(%resource, is_demo, "fetched slice");
        Ok(Sourced {
            value: shape(resource, body, is_demo),
            is_demo,
            fallback: false,
        })
    }

    /// Fetch one slice, substituting the demo payload on any failure other
    /// than a rejected session.
    pub async fn fetch_or_fallback(&self, resource: Resource) -> Result<Sourced> {
        match self.fetch(resource).await {
            Ok(sourced) => Ok(sourced),
            Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized),
            Err(err) if self.demo_fallback && err.is_recoverable_read_failure() => {
                warn!(%resource, error = %err, "backend unavailable; using demo data");
                Ok(Sourced {
                    value: demo_payload(resource),
                    is_demo: true,
                    fallback: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn claim(&self, application_id: &str) -> Result<Value> {
        self.write(Method::POST, &["applications", application_id, "claim"], None)
            .await
    }

    pub async fn decide(&self, application_id: &str, decision: &Decision) -> Result<Value> {
        let body = serde_json::to_value(decision)?;
        self.write(
            Method::PATCH,
            &["applications", application_id, "decision"],
            Some(body),
        )
        .await
    }

    pub async fn add_note(&self, application_id: &str, body: &str) -> Result<Value> {
        self.write(
            Method::POST,
            &["applications", application_id, "notes"],
            Some(json!({ "body": body })),
        )
        .await
    }

    pub async fn request_documents(
        &self,
        application_id: &str,
        documents: &[String],
        message: Option<&str>,
    ) -> Result<Value> {
        let mut body = Map::new();
        body.insert("documents".to_string(), json!(documents));
        if let Some(message) = message {
            body.insert("message".to_string(), json!(message));
        }
        self.write(
            Method::POST,
            &["applications", application_id, "document-requests"],
            Some(Value::Object(body)),
        )
        .await
    }

    async fn write(&self, method: Method, segments: &[&str], body: Option<Value>) -> Result<Value> {
        let mut builder = self.request(method.clone(), segments)?;
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = self.send(builder).await?;
        let (value, _) = Self::json_body(response).await?;
        debug!(%method, path = %segments.join("/"), "write accepted");
        Ok(value)
    }
}

fn is_demo_header(headers: &HeaderMap) -> bool {
    headers
        .get(DEMO_MODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Store shape: list resources become `{items, isDemo}`, objects gain `isDemo`.
fn shape(resource: Resource, body: Value, is_demo: bool) -> Value {
    match body {
        Value::Array(items) if resource.is_list() => json!({ "items": items, "isDemo": is_demo }),
        Value::Object(mut obj) => {
            if resource.is_list() && !obj.contains_key("items") {
                let items = ["applications", "data", "queue"]
                    .iter()
                    .find_map(|k| obj.get(*k).filter(|v| v.is_array()).cloned());
                if let Some(items) = items {
                    obj.insert("items".to_string(), items);
                }
            }
            obj.insert("isDemo".to_string(), Value::Bool(is_demo));
            Value::Object(obj)
        }
        other => other,
    }
}
