use crate::model::PowerState;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Request, StatusCode, Url,
};
use serde::Serialize;
use std::{fmt, time::Duration};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client for the Home Assistant state API.
#[derive(Clone, Debug)]
pub struct HomeAssistantClient {
    http: Client,
    base_url: Url,
    token: String,
    entity_prefix: String,
}

#[derive(Clone, Debug)]
pub struct HomeAssistantClientBuilder {
    base_url: String,
    token: String,
    entity_prefix: String,
    timeout: Duration,
}

impl HomeAssistantClientBuilder {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            entity_prefix: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn entity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entity_prefix = prefix.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HomeAssistantClient, SinkError> {
        let mut parsed =
            Url::parse(self.base_url.trim()).map_err(|err| SinkError::Url(err.to_string()))?;
        if !parsed.path().ends_with('/') {
            let new_path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&new_path);
        }

        let http = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(SinkError::Http)?;

        Ok(HomeAssistantClient {
            http,
            base_url: parsed,
            token: self.token,
            entity_prefix: self.entity_prefix,
        })
    }
}

#[derive(Debug, Serialize)]
struct StateBody<'a> {
    state: &'a str,
}

impl HomeAssistantClient {
    pub fn builder(base_url: impl Into<String>, token: impl Into<String>) -> HomeAssistantClientBuilder {
        HomeAssistantClientBuilder::new(base_url, token)
    }

    /// Posts `state` for `entity_id`; only 200 and 201 count as success.
    pub async fn push_state(&self, entity_id: &str, state: PowerState) -> Result<(), SinkError> {
        let req = self.build_state_request(entity_id, state)?;
        let resp = self.http.execute(req).await.map_err(SinkError::Http)?;
        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Api { status, body })
    }

    pub fn build_state_request(
        &self,
        entity_id: &str,
        state: PowerState,
    ) -> Result<Request, SinkError> {
        if entity_id.trim().is_empty() {
            return Err(SinkError::Config("entity id must not be empty"));
        }
        let path = format!("api/states/{}{}", self.entity_prefix, entity_id);
        let url = self
            .base_url
            .join(&path)
            .map_err(|err| SinkError::Url(err.to_string()))?;
        let body = serde_json::to_vec(&StateBody {
            state: state.as_str(),
        })
        .map_err(SinkError::Json)?;

        self.http
            .request(Method::POST, url)
            .headers(self.common_headers()?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .build()
            .map_err(SinkError::Http)
    }

    fn common_headers(&self) -> Result<HeaderMap, SinkError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(SinkError::InvalidHeaderValue)?,
        );
        Ok(headers)
    }
}

#[derive(Debug)]
pub enum SinkError {
    Config(&'static str),
    Url(String),
    Http(reqwest::Error),
    Json(serde_json::Error),
    InvalidHeaderValue(reqwest::header::InvalidHeaderValue),
    Api { status: StatusCode, body: String },
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::InvalidHeaderValue(err) => write!(f, "invalid header value: {err}"),
            Self::Api { status, body } => write!(f, "api error {}: {}", status.as_u16(), body),
        }
    }
}

impl std::error::Error for SinkError {}
