//! HTTP controller client

use std::time::Duration;

use async_trait::async_trait;
use openapi_client::models::{InstallFlowRequest, InstallFlowResponse};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, warn};
use url::Url;

use crate::controller::Controller;
use crate::errors::EnvError;
use crate::storage::settings::ControllerSettings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// HTTP controller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Controller API base URL
    pub base_url: Url,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retries after the first attempt, for transient failures only
    pub max_retries: u32,

    /// Backoff between retries
    pub cooldown: CooldownOptions,

    /// Optional bearer token
    pub token: Option<String>,
}

impl Options {
    pub fn from_settings(settings: &ControllerSettings) -> Result<Self, EnvError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| {
            EnvError::ConfigError(format!("invalid controller URL {}: {}", settings.base_url, e))
        })?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
                multiplier: 2.0,
            },
            token: settings.token.clone(),
        })
    }
}

/// Controller client speaking JSON over HTTP
pub struct HttpController {
    client: Client,
    base_url: Url,
    token: Option<SecretString>,
    max_retries: u32,
    cooldown: CooldownOptions,
}

impl HttpController {
    /// Create a new controller client
    pub fn new(options: Options) -> Result<Self, EnvError> {
        if options.base_url.cannot_be_a_base() {
            return Err(EnvError::ConfigError(format!(
                "controller URL cannot be a base: {}",
                options.base_url
            )));
        }

        let client = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            client,
            base_url: options.base_url,
            token: options.token.map(SecretString::from),
            max_retries: options.max_retries,
            cooldown: options.cooldown,
        })
    }

    fn flows_url(&self, environment_id: u64, flow_id: Option<&str>) -> Result<Url, EnvError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                EnvError::ConfigError(format!("controller URL cannot be a base: {}", self.base_url))
            })?;
            segments
                .pop_if_empty()
                .push("environments")
                .push(&environment_id.to_string())
                .push("flows");
            if let Some(flow_id) = flow_id {
                segments.push(flow_id);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// Send a request, retrying the failures `retry` allows with backoff
    async fn send<F>(&self, what: &str, retry: Retry, build: F) -> Result<Response, EnvError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;

        loop {
            let (transient, detail) = match self.authorize(build()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || (retry.missing_ok() && status == StatusCode::NOT_FOUND) {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    (
                        retry.status_is_transient(status),
                        format!("{} failed: {} - {}", what, status, body),
                    )
                }
                Err(e) => (retry.error_is_transient(&e), format!("{} failed: {}", what, e)),
            };

            if !transient || attempt >= self.max_retries {
                error!("Controller call gave up after {} attempt(s): {}", attempt + 1, detail);
                return Err(EnvError::Upstream(detail));
            }

            let delay = calc_exp_backoff(&self.cooldown, attempt);
            warn!("{} (attempt {}), retrying in {:?}", detail, attempt + 1, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Which failures a controller call may be repeated after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Repeating the call cannot create anything: timeouts and any 5xx or
    /// 429 are retried, and 404 means already done
    Idempotent,

    /// The call creates a flow; only retried when the controller provably
    /// did not act on it (connection refused, 429, 503)
    Create,
}

impl Retry {
    fn missing_ok(self) -> bool {
        self == Retry::Idempotent
    }

    fn status_is_transient(self, status: StatusCode) -> bool {
        match self {
            Retry::Idempotent => status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            Retry::Create => {
                status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }

    fn error_is_transient(self, e: &reqwest::Error) -> bool {
        match self {
            Retry::Idempotent => e.is_timeout() || e.is_connect() || e.is_request(),
            // A timed out POST may still have been applied
            Retry::Create => e.is_connect() && !e.is_timeout(),
        }
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn install(
        &self,
        environment_id: u64,
        flow: &serde_json::Value,
    ) -> Result<String, EnvError> {
        let url = self.flows_url(environment_id, None)?;
        debug!("POST {}", url);

        let body = InstallFlowRequest { flow: flow.clone() };
        let what = format!("install on environment {}", environment_id);
        let response = self
            .send(&what, Retry::Create, || self.client.post(url.clone()).json(&body))
            .await?;

        let installed: InstallFlowResponse = response
            .json()
            .await
            .map_err(|e| EnvError::Upstream(format!("{}: bad response body: {}", what, e)))?;
        Ok(installed.flow_id)
    }

    async fn remove(&self, environment_id: u64, flow_id: &str) -> Result<(), EnvError> {
        let url = self.flows_url(environment_id, Some(flow_id))?;
        debug!("DELETE {}", url);

        let what = format!("remove of flow {} on environment {}", flow_id, environment_id);
        let response = self
            .send(&what, Retry::Idempotent, || self.client.delete(url.clone()))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Flow {} already absent on controller", flow_id);
        }
        Ok(())
    }
}
