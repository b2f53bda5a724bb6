use std::fmt;

use crate::numbers::{IssueRange, VolumeRange};
use crate::volume::SpecialVersion;

/// A single candidate returned by a search source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResultData {
    pub series: String,
    pub year: Option<i32>,
    pub volume_number: Option<VolumeRange>,
    pub special_version: Option<SpecialVersion>,
    pub issue_number: Option<IssueRange>,
    pub annual: bool,
    /// The download link; search results are deduplicated on this.
    pub link: String,
    pub display_title: String,
    pub source: String,
    pub filesize: i64,
    pub pages: i32,
    pub releaser: Option<String>,
    pub scan_type: Option<String>,
    pub resolution: Option<String>,
    pub dpi: Option<String>,
}

/// Why a search result failed the match filter.
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
pub enum MatchRejection {
    Blocklisted,
    Annual,
    Title,
    VolumeNumber,
    SpecialVersion,
    Year,
    IssueNumber,
}

impl fmt::Display for MatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchRejection::Blocklisted => "blocklisted",
            MatchRejection::Annual => "annual",
            MatchRejection::Title => "title",
            MatchRejection::VolumeNumber => "volume_number",
            MatchRejection::SpecialVersion => "special_version",
            MatchRejection::Year => "year",
            MatchRejection::IssueNumber => "issue_number",
        };
        f.write_str(s)
    }
}

/// A search result annotated with the outcome of the match filter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchedSearchResult {
    #[serde(flatten)]
    pub result: SearchResultData,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub match_rejections: Vec<MatchRejection>,
    /// The issue range the result was admitted for during auto search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covered_issues: Option<IssueRange>,
}
