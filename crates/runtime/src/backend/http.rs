//! reqwest implementation of [`BackendApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde_json::Value;
use stevedore_types::{EnvironmentInfo, ProjectRecord};
use tracing::debug;
use url::Url;

use super::{BackendApi, BackendError};

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTH_PATH: &str = "health";
const READY_PATH: &str = "api/v1/ready";
const ENVIRONMENT_PATH: &str = "api/v1/environment";
const PROJECTS_PATH: &str = "api/v1/projects";

#[derive(Debug, Clone)]
pub struct HttpBackendApi {
    client: Client,
    ping_client: Client,
}

impl HttpBackendApi {
    pub fn new() -> Result<Self, BackendError> {
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .user_agent(concat!("stevedore/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|error| BackendError::transport("<client>", format!("failed to create HTTP client: {error}")))
        };
        Ok(Self {
            client: build(REQUEST_TIMEOUT)?,
            ping_client: build(PING_TIMEOUT)?,
        })
    }

    async fn get(&self, base: &Url, path: &str, token: Option<&str>) -> Result<Response, BackendError> {
        let url = endpoint(base, path);
        debug!(%url, "backend request");

        let mut request = self.client.get(url.clone()).header(header::ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|error| BackendError::transport(url.as_str(), error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn ping(&self, base: &Url) -> Result<(), BackendError> {
        let url = endpoint(base, HEALTH_PATH);
        self.ping_client
            .get(url.clone())
            .send()
            .await
            .map(|response| debug!(%url, status = %response.status(), "ping answered"))
            .map_err(|error| BackendError::transport(url.as_str(), error.to_string()))
    }

    async fn is_ready(&self, base: &Url, token: Option<&str>) -> Result<bool, BackendError> {
        let response = self.get(base, READY_PATH, token).await?;
        let url = response.url().to_string();
        let body = response.text().await.map_err(|error| BackendError::transport(url, error.to_string()))?;
        Ok(is_truthy_body(&body))
    }

    async fn environment(&self, base: &Url, token: Option<&str>) -> Result<EnvironmentInfo, BackendError> {
        let response = self.get(base, ENVIRONMENT_PATH, token).await?;
        let url = response.url().to_string();
        response.json().await.map_err(|error| BackendError::decode(url, error.to_string()))
    }

    async fn projects(&self, base: &Url, token: Option<&str>) -> Result<Vec<ProjectRecord>, BackendError> {
        let response = self.get(base, PROJECTS_PATH, token).await?;
        let url = response.url().to_string();
        response.json().await.map_err(|error| BackendError::decode(url, error.to_string()))
    }
}

/// Resolves `path` against `base`, keeping any path prefix `base` carries.
fn endpoint(base: &Url, path: &str) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).unwrap_or(base)
}

/// Interprets a readiness response body.
///
/// Accepts `true`, `{"ready": true}`, non-zero numbers and non-empty text other
/// than `false`/`0`.
pub fn is_truthy_body(body: &str) -> bool {
    let trimmed = body.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Bool(ready)) => ready,
        Ok(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        Ok(Value::String(text)) => !text.is_empty() && text != "false",
        Ok(Value::Object(object)) => object.get("ready").is_some_and(|ready| ready.as_bool().unwrap_or(false)),
        Ok(Value::Array(items)) => !items.is_empty(),
        Ok(Value::Null) => false,
        Err(_) => !trimmed.is_empty() && trimmed != "false" && trimmed != "0",
    }
}
