//! [`DirectoryClient`] over the directory's REST API.
//!
//! Every request carries the `X-API-KEY` header and the configured per-request
//! timeout. `GET` calls are retried with exponential backoff when the
//! directory answers `200` with an empty body, or when the transport fails.
//! Writes are issued exactly once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stargazer_core::{DirectoryConfig, Endpoint};

use crate::directory::{Agent, AgentUpdate, DirectoryClient, Namespace};
use crate::error::transport_err;
use crate::SyncError;

const API_KEY_HEADER: &str = "X-API-KEY";

/// First backoff delay between two `GET` attempts.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound for the backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Shortest body accepted as a payload; anything shorter counts as empty.
const MIN_BODY_LEN: usize = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MiddlewareResponse {
    #[serde(default)]
    kafka_prefix: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Serialize)]
struct EndpointRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

/// HTTP client for one directory agent and middleware.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    http: Client,
    base_url: String,
    api_key: String,
    agent_id: String,
    middleware_id: String,
    retry_count: u32,
    initial_backoff: Duration,
}

impl HttpDirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| transport_err("building HTTP client", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            agent_id: config.agent_id.clone(),
            middleware_id: config.middleware_id.clone(),
            retry_count: config.retry_count,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// Override the first backoff delay. Tests use this to keep retries fast.
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// One `GET` attempt. `Ok(None)` means `200` with an empty body.
    async fn get_once(&self, url: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| transport_err(format!("GET {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DirectoryStatus {
                method: "GET",
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_err(format!("reading GET {url}"), e))?;
        if body.len() < MIN_BODY_LEN {
            return Ok(None);
        }
        Ok(Some(body.to_vec()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = self.url(path);
        let mut delay = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let retries_left = attempt <= self.retry_count;

            match self.get_once(&url).await {
                Ok(Some(body)) => {
                    if attempt > 1 {
                        debug!(url = %url, retries = attempt - 1, "GET succeeded after retry");
                    }
                    return serde_json::from_slice(&body)
                        .map_err(|source| SyncError::Decode { url, source });
                }
                Ok(None) if retries_left => {
                    warn!(url = %url, attempt, "directory returned an empty body; retrying");
                }
                Ok(None) => {
                    return Err(SyncError::EmptyResponse {
                        url,
                        attempts: attempt,
                    });
                }
                Err(err @ SyncError::DirectoryUnavailable { .. }) if retries_left => {
                    warn!(url = %url, attempt, error = %err, "GET failed; retrying");
                }
                Err(err) => return Err(err),
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// Send a prepared write once and return its body on success.
    async fn send_write(
        &self,
        method_name: &'static str,
        url: String,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_err(format!("{method_name} {url}"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DirectoryStatus {
                method: method_name,
                url,
                status: status.as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_err(format!("reading {method_name} {url}"), e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn get_agent(&self) -> Result<Agent, SyncError> {
        self.get_json(&format!("/agents/{}", self.agent_id)).await
    }

    async fn get_namespace(&self) -> Result<Namespace, SyncError> {
        let middleware: MiddlewareResponse = self
            .get_json(&format!("/middlewares/{}", self.middleware_id))
            .await?;

        let prefix = middleware.kafka_prefix.trim().to_string();
        let endpoints = middleware
            .endpoints
            .into_iter()
            .map(|e| Endpoint {
                id: e.id,
                name: e.name.trim().to_string(),
            })
            .filter(|e| e.name.starts_with(&prefix))
            .collect();

        Ok(Namespace { prefix, endpoints })
    }

    async fn create_endpoint(&self, name: &str) -> Result<Endpoint, SyncError> {
        let url = self.url(&format!("/middlewares/{}/endpoints", self.middleware_id));
        let request = self
            .request(Method::POST, &url)
            .json(&EndpointRequest { name });
        let body = self.send_write("POST", url, request).await?;

        // The id is informational; an unparseable body is not an error.
        let created = serde_json::from_slice::<EndpointResponse>(&body).ok();
        Ok(match created {
            Some(e) if !e.name.is_empty() => Endpoint {
                id: e.id,
                name: e.name,
            },
            Some(e) => Endpoint {
                id: e.id,
                name: name.to_string(),
            },
            None => Endpoint {
                id: String::new(),
                name: name.to_string(),
            },
        })
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), SyncError> {
        let url = self.url(&format!("/endpoints/{}", endpoint.id));
        let request = self.request(Method::DELETE, &url);
        self.send_write("DELETE", url, request).await.map(|_| ())
    }

    async fn update_agent(&self, update: &AgentUpdate) -> Result<(), SyncError> {
        let url = self.url(&format!("/agents/{}", self.agent_id));
        let request = self.request(Method::PATCH, &url).json(update);
        self.send_write("PATCH", url, request).await.map(|_| ())
    }
}
