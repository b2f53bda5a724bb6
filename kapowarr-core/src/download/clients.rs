//! External download client adapters. Implementations are stateless
//! across restarts: handles are reconstructed from stored ids.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use kapowarr_model::{ClientStatus, DownloadState, DownloadType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{error, warn};

use crate::error::{KapowarrError, Result};
use crate::session::{HttpSession, RequestSpec};

/// Outcome of a status lookup for one client handle.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    /// The client knows the download and reports on it.
    Known(ClientStatus),
    /// The client no longer has a download we added earlier.
    Gone,
    /// The client has no record of the handle at all.
    Unknown,
}

/// The contract every external download client implements.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    fn client_type(&self) -> &'static str;

    fn download_type(&self) -> DownloadType;

    /// Hand a link to the client. Returns the client-side handle.
    async fn add_download(
        &self,
        download_link: &str,
        target_folder: &Path,
        download_name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<String>;

    /// The current status of a download previously added.
    async fn get_download(&self, download_id: &str) -> Result<StatusLookup>;

    /// Remove a download from the client, optionally with its files.
    async fn delete_download(
        &self,
        download_id: &str,
        delete_files: bool,
    ) -> Result<()>;
}

static MAGNET_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&dn=[^&]*").unwrap());

/// Transmission state numbers to download states.
fn transmission_state(status: i64) -> DownloadState {
    match status {
        0 => DownloadState::Paused,      // Stopped
        1 => DownloadState::Downloading, // CheckWait
        2 => DownloadState::Downloading, // Checking
        3 => DownloadState::Queued,      // DownloadWait
        4 => DownloadState::Downloading, // Downloading
        5 => DownloadState::Seeding,     // SeedWait
        6 => DownloadState::Seeding,     // Seeding
        _ => DownloadState::Importing,
    }
}

/// Apply the stall rule to one observation: the first stalled look gets
/// stamped; once the stamp is older than the timeout, the download is
/// failed. Any healthy observation clears the stamp.
fn apply_stall_detection(
    potential_stall: bool,
    state: DownloadState,
    stamp: &mut Option<i64>,
    now: i64,
    timeout: u64,
) -> DownloadState {
    if !potential_stall
        || matches!(state, DownloadState::Failed | DownloadState::Seeding)
    {
        *stamp = None;
        return state;
    }

    match *stamp {
        None => {
            *stamp = Some(now);
            DownloadState::Downloading
        }
        Some(failing_since) => {
            if timeout > 0 && now - failing_since > timeout as i64 {
                DownloadState::Failed
            } else {
                state
            }
        }
    }
}

/// Client adapter for a Transmission instance, via its RPC interface.
#[derive(Debug)]
pub struct TransmissionClient {
    session: HttpSession,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    /// Seconds a download may look stalled before it is failed; 0
    /// disables the check.
    failing_timeout: u64,
    /// RPC session id, refreshed on 409 responses.
    session_id: Mutex<Option<String>>,
    /// Stall stamps per torrent hash. Mutated under the lock only,
    /// never while iterating.
    torrent_stamps: Mutex<HashMap<String, Option<i64>>>,
}

impl TransmissionClient {
    pub fn new(
        session: HttpSession,
        base_url: String,
        username: Option<String>,
        password: Option<String>,
        failing_timeout: u64,
    ) -> Self {
        Self {
            session,
            base_url,
            username,
            password,
            failing_timeout,
            session_id: Mutex::new(None),
            torrent_stamps: Mutex::new(HashMap::new()),
        }
    }

    async fn api_request(
        &self,
        method: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        for round in 0..2 {
            let mut spec = RequestSpec::post(format!(
                "{}/transmission/rpc",
                self.base_url
            ))
            .with_json(json!({ "method": method, "arguments": arguments }));

            if let Some(username) = &self.username {
                spec = spec
                    .with_basic_auth(username, self.password.as_deref());
            }
            if let Some(session_id) = self.session_id.lock().unwrap().clone()
            {
                spec = spec
                    .with_header("X-Transmission-Session-Id", &session_id);
            }

            let response =
                self.session.request(spec).await.map_err(|error| {
                    error!("Can't connect to Transmission instance: {error}");
                    KapowarrError::ClientNotWorking(
                        "connection error".to_string(),
                    )
                })?;

            if response.status().as_u16() == 409 {
                // We need to pick up the (new) session id and try again.
                let session_id = response
                    .headers()
                    .get("X-Transmission-Session-Id")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string())
                    .ok_or_else(|| {
                        KapowarrError::ClientNotWorking(
                            "failed processing response".to_string(),
                        )
                    })?;
                *self.session_id.lock().unwrap() = Some(session_id);
                if round == 0 {
                    continue;
                }
                return Err(KapowarrError::ClientNotWorking(
                    "session id handshake failed".to_string(),
                ));
            }

            if response.status().as_u16() == 401
                || response.status().as_u16() == 403
            {
                return Err(KapowarrError::CredentialInvalid);
            }

            return Ok(response.json().await?);
        }

        unreachable!("the handshake loop always returns")
    }

    /// Check whether the instance is reachable and the credentials work.
    pub async fn test(
        session: &HttpSession,
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let client = TransmissionClient::new(
            session.clone(),
            base_url.to_string(),
            username.map(|u| u.to_string()),
            password.map(|p| p.to_string()),
            0,
        );
        client.api_request("session-get", json!({})).await?;
        Ok(())
    }
}

#[async_trait]
impl ExternalClient for TransmissionClient {
    fn client_type(&self) -> &'static str {
        "Transmission"
    }

    fn download_type(&self) -> DownloadType {
        DownloadType::Torrent
    }

    async fn add_download(
        &self,
        download_link: &str,
        target_folder: &Path,
        download_name: Option<&str>,
        _filename: Option<&str>,
    ) -> Result<String> {
        let download_link = match download_name {
            Some(name) => MAGNET_NAME_REGEX
                .replace(download_link, format!("&dn={name}"))
                .to_string(),
            None => download_link.to_string(),
        };

        let result = self
            .api_request(
                "torrent-add",
                json!({
                    "filename": download_link,
                    "paused": false,
                    "download-dir": target_folder.to_string_lossy(),
                }),
            )
            .await?;

        let arguments = &result["arguments"];
        let added = arguments
            .get("torrent-added")
            .or_else(|| arguments.get("torrent-duplicate"))
            .ok_or_else(|| {
                KapowarrError::ClientNotWorking(
                    "torrent was not accepted".to_string(),
                )
            })?;
        let hash = added["hashString"]
            .as_str()
            .ok_or_else(|| {
                KapowarrError::ClientNotWorking(
                    "failed processing response".to_string(),
                )
            })?
            .to_string();

        self.torrent_stamps
            .lock()
            .unwrap()
            .insert(hash.clone(), None);
        Ok(hash)
    }

    async fn get_download(&self, download_id: &str) -> Result<StatusLookup> {
        let result = self
            .api_request(
                "torrent-get",
                json!({
                    "ids": [download_id],
                    "fields": [
                        "hashString", "totalSize", "percentDone",
                        "rateDownload", "status", "error", "errorString",
                    ],
                }),
            )
            .await?;

        let torrents = result["arguments"]["torrents"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let Some(torrent) = torrents.first() else {
            let known = self
                .torrent_stamps
                .lock()
                .unwrap()
                .contains_key(download_id);
            return Ok(if known {
                StatusLookup::Gone
            } else {
                StatusLookup::Unknown
            });
        };

        let status = torrent["status"].as_i64().unwrap_or(0);
        let speed = torrent["rateDownload"].as_i64().unwrap_or(0);
        let state = if torrent["error"].as_i64().unwrap_or(0) != 0 {
            DownloadState::Failed
        } else {
            transmission_state(status)
        };

        // CheckWait, Checking and DownloadWait, or downloading at zero
        // rate, point at a stall.
        let potential_stall =
            matches!(status, 1 | 2 | 3) || (status == 4 && speed == 0);

        let state = {
            let mut stamps = self.torrent_stamps.lock().unwrap();
            let stamp =
                stamps.entry(download_id.to_string()).or_insert(None);
            apply_stall_detection(
                potential_stall,
                state,
                stamp,
                Utc::now().timestamp(),
                self.failing_timeout,
            )
        };

        Ok(StatusLookup::Known(ClientStatus {
            size: torrent["totalSize"].as_i64().unwrap_or(0),
            progress: (torrent["percentDone"].as_f64().unwrap_or(0.0)
                * 100.0 * 100.0)
                .round()
                / 100.0,
            speed,
            state,
        }))
    }

    async fn delete_download(
        &self,
        download_id: &str,
        delete_files: bool,
    ) -> Result<()> {
        self.api_request(
            "torrent-remove",
            json!({
                "ids": [download_id],
                "delete-local-data": delete_files,
            }),
        )
        .await?;
        self.torrent_stamps.lock().unwrap().remove(download_id);
        Ok(())
    }
}

/// Build the client adapter for a stored client row.
pub fn build_client(
    session: &HttpSession,
    client: &kapowarr_model::ExternalClientData,
    failing_timeout: u64,
) -> Result<std::sync::Arc<dyn ExternalClient>> {
    match client.client_type.as_str() {
        "Transmission" => Ok(std::sync::Arc::new(TransmissionClient::new(
            session.clone(),
            client.base_url.clone(),
            client.username.clone(),
            client.password.clone(),
            failing_timeout,
        ))),
        other => {
            warn!("Unknown external client type: {other}");
            Err(KapowarrError::ExternalClientNotWorking(format!(
                "unknown client type {other}"
            )))
        }
    }
}

/// The client types that can be configured, per download type.
pub fn client_options() -> Vec<(&'static str, DownloadType)> {
    vec![("Transmission", DownloadType::Torrent)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(transmission_state(0), DownloadState::Paused);
        assert_eq!(transmission_state(3), DownloadState::Queued);
        assert_eq!(transmission_state(4), DownloadState::Downloading);
        assert_eq!(transmission_state(6), DownloadState::Seeding);
    }

    #[test]
    fn test_magnet_name_replacement() {
        let link = "magnet:?xt=urn:btih:abc&dn=old+name&tr=udp://x";
        let replaced =
            MAGNET_NAME_REGEX.replace(link, "&dn=new-name").to_string();
        assert_eq!(
            replaced,
            "magnet:?xt=urn:btih:abc&dn=new-name&tr=udp://x"
        );
    }

    #[test]
    fn test_stall_detection_times_out() {
        let mut stamp = None;

        // First stalled observation: stamped, still downloading.
        let state = apply_stall_detection(
            true,
            DownloadState::Downloading,
            &mut stamp,
            1_000,
            30,
        );
        assert_eq!(state, DownloadState::Downloading);
        assert_eq!(stamp, Some(1_000));

        // Still stalled within the timeout.
        let state = apply_stall_detection(
            true,
            DownloadState::Downloading,
            &mut stamp,
            1_020,
            30,
        );
        assert_eq!(state, DownloadState::Downloading);

        // 40 seconds of stalling with a 30 second timeout: failed.
        let state = apply_stall_detection(
            true,
            DownloadState::Downloading,
            &mut stamp,
            1_040,
            30,
        );
        assert_eq!(state, DownloadState::Failed);
    }

    #[test]
    fn test_stall_detection_clears_on_recovery() {
        let mut stamp = Some(1_000);
        let state = apply_stall_detection(
            false,
            DownloadState::Downloading,
            &mut stamp,
            1_040,
            30,
        );
        assert_eq!(state, DownloadState::Downloading);
        assert_eq!(stamp, None);
    }

    #[test]
    fn test_stall_detection_disabled_timeout() {
        let mut stamp = Some(1_000);
        let state = apply_stall_detection(
            true,
            DownloadState::Downloading,
            &mut stamp,
            9_999,
            0,
        );
        assert_eq!(state, DownloadState::Downloading);
    }
}
