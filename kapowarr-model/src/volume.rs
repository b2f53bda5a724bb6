use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

use crate::ids::{ComicvineId, IssueId, RootFolderId, VolumeId};

/// How a volume (or file) deviates from the normal sequential-issue shape.
///
/// `Cover` and `Metadata` only ever apply to files, the rest also to
/// volumes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialVersion {
    Normal,
    TradePaperBack,
    OneShot,
    HardCover,
    Omnibus,
    VolumeAsIssue,
    Cover,
    Metadata,
}

impl SpecialVersion {
    /// The string form used in the database and the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialVersion::Normal => "normal",
            SpecialVersion::TradePaperBack => "trade-paper-back",
            SpecialVersion::OneShot => "one-shot",
            SpecialVersion::HardCover => "hard-cover",
            SpecialVersion::Omnibus => "omnibus",
            SpecialVersion::VolumeAsIssue => "volume-as-issue",
            SpecialVersion::Cover => "cover",
            SpecialVersion::Metadata => "metadata",
        }
    }
}

impl fmt::Display for SpecialVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(SpecialVersion::Normal),
            "trade-paper-back" | "tpb" => Ok(SpecialVersion::TradePaperBack),
            "one-shot" => Ok(SpecialVersion::OneShot),
            "hard-cover" => Ok(SpecialVersion::HardCover),
            "omnibus" => Ok(SpecialVersion::Omnibus),
            "volume-as-issue" => Ok(SpecialVersion::VolumeAsIssue),
            "cover" => Ok(SpecialVersion::Cover),
            "metadata" => Ok(SpecialVersion::Metadata),
            other => Err(format!("unknown special version: {other}")),
        }
    }
}

/// Which issues get monitored when a volume is added.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MonitorScheme {
    #[default]
    All,
    Missing,
    None,
}

/// A volume as stored in the library.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VolumeData {
    pub id: VolumeId,
    pub comicvine_id: ComicvineId,
    pub title: String,
    pub alt_title: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub volume_number: i32,
    pub description: Option<String>,
    pub site_url: String,
    pub monitored: bool,
    pub monitor_new_issues: bool,
    pub root_folder: RootFolderId,
    /// Absolute path of the volume folder, derived or user-overridden.
    pub folder: String,
    pub custom_folder: bool,
    pub special_version: SpecialVersion,
    pub special_version_locked: bool,
    /// Unix timestamp of the last metadata fetch from ComicVine.
    pub last_cv_fetch: i64,
}

impl VolumeData {
    /// Whether the volume title marks it as an annual series.
    pub fn is_annual(&self) -> bool {
        self.title.to_lowercase().contains("annual")
    }
}

/// An issue of a volume as stored in the library.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IssueData {
    pub id: IssueId,
    pub volume_id: VolumeId,
    pub comicvine_id: ComicvineId,
    /// The literal issue number, e.g. `"3b"` or `"4½"`.
    pub issue_number: String,
    /// Float normal form of `issue_number`, used for matching.
    pub calculated_issue_number: f64,
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub monitored: bool,
}

/// Volume metadata as returned by the catalog, before it is a library row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VolumeMetadata {
    pub comicvine_id: ComicvineId,
    pub title: String,
    pub year: Option<i32>,
    pub volume_number: i32,
    pub cover_link: String,
    pub description: Option<String>,
    pub site_url: String,
    pub aliases: Vec<String>,
    pub publisher: Option<String>,
    pub issue_count: i32,
    /// Whether the description marks this as a non-English publication.
    pub translated: bool,
    /// Set on search results when the volume is already in the library.
    pub already_added: Option<VolumeId>,
    /// Only populated by full volume fetches.
    pub issues: Option<Vec<IssueMetadata>>,
    pub folder_name: String,
}

/// Issue metadata as returned by the catalog.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IssueMetadata {
    pub comicvine_id: ComicvineId,
    pub volume_comicvine_id: ComicvineId,
    pub issue_number: String,
    pub calculated_issue_number: f64,
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
}
