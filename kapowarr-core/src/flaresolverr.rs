//! Adapter for a FlareSolverr instance, used to get past CloudFlare
//! challenges by borrowing its solved user agent and cookies.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::Result;

pub const DEFAULT_USERAGENT: &str = "Kapowarr";

#[derive(Debug, Deserialize)]
struct SolverResponse {
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    cookies: Option<Vec<SolverCookie>>,
}

#[derive(Debug, Deserialize)]
struct SolverCookie {
    name: String,
    value: String,
}

/// Per-host user agent and cookies handed out by FlareSolverr.
#[derive(Debug, Clone, Default)]
pub struct UaCookies {
    pub user_agent: String,
    pub cookies: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct FlareSolverr {
    base_url: std::sync::RwLock<Option<String>>,
    client: reqwest::Client,
    /// Host -> solved UA and cookies. Solved once per host; cleared when
    /// the instance is disabled.
    solutions: DashMap<String, UaCookies>,
}

impl FlareSolverr {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: std::sync::RwLock::new(base_url),
            client: reqwest::Client::new(),
            solutions: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.read().unwrap().is_some()
    }

    /// Point at a (new) FlareSolverr instance; `None` disables solving.
    pub fn set_base_url(&self, base_url: Option<String>) {
        if base_url.is_none() {
            self.solutions.clear();
        }
        *self.base_url.write().unwrap() = base_url;
    }

    fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default()
    }

    /// The user agent and cookies to use for a URL.
    pub fn get_ua_cookies(&self, url: &str) -> UaCookies {
        self.solutions
            .get(&Self::host_of(url))
            .map(|entry| entry.clone())
            .unwrap_or_else(|| UaCookies {
                user_agent: DEFAULT_USERAGENT.to_string(),
                cookies: vec![],
            })
    }

    /// Whether a 403 response is a CloudFlare challenge worth solving.
    pub fn is_cf_block(headers: &HeaderMap) -> bool {
        headers.contains_key("cf-mitigated")
    }

    /// Ask FlareSolverr to solve the challenge for a URL. Returns whether
    /// fresh credentials are now available.
    pub async fn handle_cf_block(&self, url: &str) -> Result<bool> {
        let base_url = self.base_url.read().unwrap().clone();
        let Some(base_url) = base_url else {
            debug!("Hit a CF block but FlareSolverr is not enabled");
            return Ok(false);
        };

        info!("Asking FlareSolverr to solve the challenge for {url}");
        let response = self
            .client
            .post(format!("{base_url}/v1"))
            .json(&serde_json::json!({
                "cmd": "request.get",
                "url": url,
                "maxTimeout": 60_000,
            }))
            .send()
            .await?;

        let solver: SolverResponse = response.json().await?;
        let Some(solution) = solver.solution else {
            warn!("FlareSolverr could not solve the challenge for {url}");
            return Ok(false);
        };

        self.solutions.insert(
            Self::host_of(url),
            UaCookies {
                user_agent: solution
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USERAGENT.to_string()),
                cookies: solution
                    .cookies
                    .unwrap_or_default()
                    .into_iter()
                    .map(|cookie| (cookie.name, cookie.value))
                    .collect(),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_returns_default_ua() {
        let solver = FlareSolverr::new(None);
        let creds = solver.get_ua_cookies("https://example.com/page");
        assert_eq!(creds.user_agent, DEFAULT_USERAGENT);
        assert!(creds.cookies.is_empty());
    }

    #[test]
    fn test_cf_block_detection() {
        let mut headers = HeaderMap::new();
        assert!(!FlareSolverr::is_cf_block(&headers));
        headers.insert("cf-mitigated", "challenge".parse().unwrap());
        assert!(FlareSolverr::is_cf_block(&headers));
    }
}
