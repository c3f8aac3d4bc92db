use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

const VIEW_STATE_FIELD: &str = "javax.faces.ViewState";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Token GET failed or the page carried no view-state
    #[error("portal unreachable: {0}")]
    Unreachable(String),

    /// Data POST failed or returned an unusable body
    #[error("timetable fetch failed: {0}")]
    FetchFailed(String),
}

/// Response body of a data POST that passed the payload check
#[derive(Debug, Clone)]
pub struct RawPayload(pub String);

impl RawPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where timetable payloads come from.
///
/// `fetch_token` must complete before `submit`, and both must run against
/// the same server-side session.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String, FetchError>;

    async fn submit(&self, token: &str) -> Result<RawPayload, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub min_payload_bytes: usize,
    pub page_rows: u32,
    pub timeout: Duration,
}

/// HTTP session against the timetable portal. Cookies persist between the
/// token GET and the data POST.
pub struct SessionClient {
    client: reqwest::Client,
    config: SessionConfig,
}

impl SessionClient {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("EdugateBot/1.0 (Timetable Lookup)")
            .cookie_store(true)
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl TimetableSource for SessionClient {
    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn fetch_token(&self) -> Result<String, FetchError> {
        debug!("Requesting view-state token");

        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        debug!(status = %status, bytes = html.len(), "Received portal page");

        extract_view_state(&html).ok_or_else(|| {
            FetchError::Unreachable(format!(
                "no {} input in response (status {})",
                VIEW_STATE_FIELD, status
            ))
        })
    }

    #[instrument(skip(self, token), fields(url = %self.config.url))]
    async fn submit(&self, token: &str) -> Result<RawPayload, FetchError> {
        let form = build_form(token, self.config.page_rows);
        let started = Instant::now();

        let response = self
            .client
            .post(&self.config.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| FetchError::FetchFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::FetchFailed(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis();

        if !is_complete_payload(&body, self.config.min_payload_bytes) {
            error!(
                status = %status,
                response_len = body.len(),
                elapsed_ms = elapsed_ms,
                "Data retrieval failed"
            );
            return Err(FetchError::FetchFailed(format!(
                "response too short: {} bytes (status {})",
                body.len(),
                status
            )));
        }

        info!(
            status = %status,
            response_len = body.len(),
            elapsed_ms = elapsed_ms,
            "Data retrieval succeeded"
        );

        Ok(RawPayload(body))
    }
}

/// Whether a POST body is a real timetable rather than an error page or an
/// expired-session reply. The portal answers those with HTTP 200 too, so
/// only the size tells them apart.
pub fn is_complete_payload(body: &str, min_bytes: usize) -> bool {
    body.len() >= min_bytes
}

/// Pull the view-state value out of the portal page
pub fn extract_view_state(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector =
        Selector::parse(r#"input[name="javax.faces.ViewState"]"#).expect("Invalid view-state selector");

    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.to_string())
}

/// Partial-AJAX form that asks for the whole schedule table in one page
pub fn build_form(token: &str, rows: u32) -> Vec<(&'static str, String)> {
    let rows = rows.to_string();
    vec![
        ("javax.faces.partial.ajax", "true".to_string()),
        (
            "javax.faces.source",
            "serviceContents:scheduleDtl::j_idt68".to_string(),
        ),
        ("javax.faces.partial.execute", "@all".to_string()),
        (
            "javax.faces.partial.render",
            "serviceContents:scheduleDtl serviceContents:msgs".to_string(),
        ),
        (
            "serviceContents:scheduleDtl:j_idt68",
            "serviceContents:scheduleDtl:j_idt68".to_string(),
        ),
        ("serviceContents", "serviceContents".to_string()),
        ("serviceContents:scheduleDtl_pagination", "true".to_string()),
        ("serviceContents:scheduleDtl_first", "0".to_string()),
        ("serviceContents:scheduleDtl_rows", rows.clone()),
        ("serviceContents:scheduleDtl_rppDD", rows),
        ("serviceContents:scheduleDtl_encodeFeature", "true".to_string()),
        (VIEW_STATE_FIELD, token.to_string()),
    ]
}
