//! A bounded-retry HTTP session shared by everything that talks to the
//! outside world. Retries a forcelist of status codes with exponential
//! backoff and consults FlareSolverr on CloudFlare blocks, once per URL.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Method, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{KapowarrError, Result};
use crate::flaresolverr::FlareSolverr;

pub const TOTAL_RETRIES: u32 = 5;
const BACKOFF_FACTOR: f64 = 0.5;
const STATUS_FORCELIST: [u16; 5] = [429, 500, 502, 503, 504];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A prepared request the session can (re)send.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub basic_auth: Option<(String, Option<String>)>,
    pub headers: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: vec![],
            json: None,
            basic_auth: None,
            headers: vec![],
        }
    }

    pub fn with_query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_json(mut self, json: serde_json::Value) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_basic_auth(
        mut self,
        username: &str,
        password: Option<&str>,
    ) -> Self {
        self.basic_auth =
            Some((username.to_string(), password.map(|p| p.to_string())));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// The shared HTTP session.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    solver: Arc<FlareSolverr>,
}

impl HttpSession {
    pub fn new(solver: Arc<FlareSolverr>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()
            .expect("building the HTTP client can not fail");
        Self { client, solver }
    }

    fn build(&self, spec: &RequestSpec) -> reqwest::RequestBuilder {
        let credentials = self.solver.get_ua_cookies(&spec.url);
        let mut builder = self
            .client
            .request(spec.method.clone(), &spec.url)
            .header(reqwest::header::USER_AGENT, credentials.user_agent);

        if !credentials.cookies.is_empty() {
            let cookie_header = credentials
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie_header);
        }
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        if let Some(json) = &spec.json {
            builder = builder.json(json);
        }
        if let Some((username, password)) = &spec.basic_auth {
            builder = builder.basic_auth(username, password.as_deref());
        }
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    /// Send a request with retries and challenge handling.
    pub async fn request(&self, spec: RequestSpec) -> Result<Response> {
        let mut backoff = BACKOFF_FACTOR;
        let mut solved_challenge = false;

        for round in 1..=TOTAL_RETRIES {
            let response = match self.build(&spec).send().await {
                Ok(response) => response,
                Err(error) => {
                    if round == TOTAL_RETRIES {
                        return Err(error.into());
                    }
                    warn!(
                        "{} request failed for url {}. Retrying for round {}...",
                        spec.method,
                        spec.url,
                        round + 1
                    );
                    tokio::time::sleep(Duration::from_secs_f64(backoff))
                        .await;
                    backoff *= 2.0;
                    continue;
                }
            };

            if response.status() == StatusCode::FORBIDDEN
                && !solved_challenge
                && FlareSolverr::is_cf_block(response.headers())
            {
                solved_challenge = true;
                if self.solver.handle_cf_block(&spec.url).await? {
                    // Fresh UA and cookies; retry right away.
                    continue;
                }
            }

            if STATUS_FORCELIST.contains(&response.status().as_u16()) {
                if round == TOTAL_RETRIES {
                    return Ok(response);
                }
                warn!(
                    "{} request to {} returned with code {}. Retrying...",
                    spec.method,
                    spec.url,
                    response.status()
                );
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                backoff *= 2.0;
                continue;
            }

            if response.status().is_client_error() {
                warn!(
                    "{} request to {} returned with code {}",
                    spec.method,
                    spec.url,
                    response.status()
                );
            }

            return Ok(response);
        }

        unreachable!("the retry loop always returns")
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.request(RequestSpec::get(url)).await?.text().await?)
    }

    pub async fn get_content(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self
            .request(RequestSpec::get(url))
            .await?
            .bytes()
            .await?
            .to_vec())
    }

    /// Stream a response body to disk, reporting progress in bytes. The
    /// callback returning `false` aborts the download.
    pub async fn download_to_file(
        &self,
        url: &str,
        target: &Path,
        mut on_progress: impl FnMut(u64, Option<u64>) -> bool,
    ) -> Result<()> {
        let response = self.request(RequestSpec::get(url)).await?;
        if !response.status().is_success() {
            return Err(KapowarrError::LinkBroken(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(target).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if !on_progress(downloaded, total) {
                debug!("Download of {url} aborted");
                break;
            }
        }
        file.flush().await?;
        debug!("Downloaded {url} to {}", target.display());
        Ok(())
    }
}
