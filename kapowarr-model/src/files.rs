use std::fmt;
use std::str::FromStr;

use crate::ids::FileId;
use crate::numbers::{IssueRange, VolumeRange};
use crate::volume::SpecialVersion;

/// The data that the filename extractor can recover from a file or group
/// title.
#[derive(
    Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize,
)]
pub struct FilenameData {
    pub series: String,
    pub year: Option<i32>,
    pub volume_number: Option<VolumeRange>,
    pub issue_number: Option<IssueRange>,
    pub annual: bool,
    pub special_version: Option<SpecialVersion>,
}

/// A file row, with the optional provenance recorded at download time.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    sqlx::FromRow,
)]
pub struct FileData {
    pub id: FileId,
    pub filepath: String,
    pub size: i64,
    pub releaser: Option<String>,
    pub scan_type: Option<String>,
    pub resolution: Option<String>,
    pub dpi: Option<String>,
}

/// The type of a volume-level file that is not bound to any one issue.
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
pub enum GeneralFileType {
    Cover,
    Metadata,
}

impl GeneralFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneralFileType::Cover => "cover",
            GeneralFileType::Metadata => "metadata",
        }
    }
}

impl fmt::Display for GeneralFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneralFileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cover" => Ok(GeneralFileType::Cover),
            "metadata" => Ok(GeneralFileType::Metadata),
            other => Err(format!("unknown general file type: {other}")),
        }
    }
}

/// A volume-level file together with its type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneralFileData {
    #[serde(flatten)]
    pub file: FileData,
    pub file_type: GeneralFileType,
}

/// File extensions the scanner considers part of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannableExt {
    Archive,
    Image,
    Metadata,
    Torrent,
}

impl ScannableExt {
    /// All extensions the scanner picks up, lowercase and dotless.
    pub const ALL: &'static [&'static str] = &[
        "zip", "cbz", "rar", "cbr", "jpg", "jpeg", "png", "webp", "gif",
        "xml", "torrent",
    ];

    /// Extensions of issue content (archives), excluding sidecar files.
    pub const CONTENT: &'static [&'static str] =
        &["zip", "cbz", "rar", "cbr"];

    /// Image extensions, used for covers and extracted pages.
    pub const IMAGE: &'static [&'static str] =
        &["jpg", "jpeg", "png", "webp", "gif"];

    /// Classify a lowercase, dotless extension.
    pub fn classify(ext: &str) -> Option<ScannableExt> {
        if Self::CONTENT.contains(&ext) {
            Some(ScannableExt::Archive)
        } else if Self::IMAGE.contains(&ext) {
            Some(ScannableExt::Image)
        } else if ext == "xml" {
            Some(ScannableExt::Metadata)
        } else if ext == "torrent" {
            Some(ScannableExt::Torrent)
        } else {
            None
        }
    }
}
