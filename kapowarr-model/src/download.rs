use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::ids::{
    BlocklistEntryId, ClientId, CredentialId, DownloadId, IssueId, VolumeId,
};

/// The lifecycle state of a download.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Queued,
    Downloading,
    /// The downloaded file is being imported into the library.
    Importing,
    Done,
    Paused,
    /// Torrent finished downloading and is seeding.
    Seeding,
    Failed,
    Canceled,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Queued => "queued",
            DownloadState::Downloading => "downloading",
            DownloadState::Importing => "importing",
            DownloadState::Done => "done",
            DownloadState::Paused => "paused",
            DownloadState::Seeding => "seeding",
            DownloadState::Failed => "failed",
            DownloadState::Canceled => "canceled",
        }
    }

    /// States in which the download no longer occupies the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Done
                | DownloadState::Failed
                | DownloadState::Canceled
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport a download client uses.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    Direct,
    Torrent,
}

/// Where a search result (and thus a download) came from.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct DownloadSource(pub String);

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A download as tracked by the queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DownloadData {
    pub id: DownloadId,
    pub url: String,
    /// Explicit filename override, when the source dictates one.
    pub filename: Option<String>,
    pub volume_id: VolumeId,
    pub issue_id: Option<IssueId>,
    pub source: DownloadSource,
    pub client_id: Option<ClientId>,
    pub state: DownloadState,
    /// Total size in bytes; `None` when the client doesn't know yet.
    pub size: Option<i64>,
    /// Completion percentage, 0–100.
    pub progress: f64,
    /// Download speed in bytes per second.
    pub speed: i64,
    pub started_at: Option<DateTime<Utc>>,
    /// First observation of a stalled state, for the failing timeout.
    pub failing_since: Option<DateTime<Utc>>,
}

/// A status snapshot reported by a download client for one handle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClientStatus {
    pub size: i64,
    pub progress: f64,
    pub speed: i64,
    pub state: DownloadState,
}

/// Why a link was blocklisted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BlocklistReason {
    LinkBroken,
    SourceNotSupported,
    DownloadFailed,
    AddedByUser,
}

impl BlocklistReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlocklistReason::LinkBroken => "link_broken",
            BlocklistReason::SourceNotSupported => "source_not_supported",
            BlocklistReason::DownloadFailed => "download_failed",
            BlocklistReason::AddedByUser => "added_by_user",
        }
    }
}

impl fmt::Display for BlocklistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlocklistReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link_broken" => Ok(BlocklistReason::LinkBroken),
            "source_not_supported" => Ok(BlocklistReason::SourceNotSupported),
            "download_failed" => Ok(BlocklistReason::DownloadFailed),
            "added_by_user" => Ok(BlocklistReason::AddedByUser),
            other => Err(format!("unknown blocklist reason: {other}")),
        }
    }
}

/// A blocklist entry. First insertion wins; lookups key on the download
/// link, then the web link.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlocklistEntry {
    pub id: BlocklistEntryId,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: Option<String>,
    pub source: Option<DownloadSource>,
    pub volume_id: Option<VolumeId>,
    pub issue_id: Option<IssueId>,
    pub reason: BlocklistReason,
    pub added_at: DateTime<Utc>,
}

/// An external download client as configured by the user.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExternalClientData {
    pub id: ClientId,
    pub client_type: String,
    pub download_type: DownloadType,
    pub title: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
}

/// A stored credential for a download source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CredentialData {
    pub id: CredentialId,
    pub source: DownloadSource,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
}
