//! Core data model definitions shared across Kapowarr crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod download;
pub mod events;
pub mod files;
pub mod ids;
pub mod numbers;
pub mod rootfolder;
pub mod search;
pub mod task;
pub mod volume;

// Intentionally curated re-exports for downstream consumers.
pub use download::{
    BlocklistEntry, BlocklistReason, ClientStatus, CredentialData,
    DownloadData, DownloadSource, DownloadState, DownloadType,
    ExternalClientData,
};
pub use events::Event;
pub use files::{
    FileData, FilenameData, GeneralFileData, GeneralFileType, ScannableExt,
};
pub use ids::{
    BlocklistEntryId, ClientId, ComicvineId, CredentialId, DownloadId, FileId,
    IssueId, RootFolderId, TaskId, VolumeId,
};
pub use numbers::{IssueRange, VolumeRange};
pub use rootfolder::{DiskUsage, RootFolderData};
pub use search::{MatchRejection, MatchedSearchResult, SearchResultData};
pub use task::{TaskData, TaskHistoryEntry, TaskPlanEntry};
pub use volume::{
    IssueData, IssueMetadata, MonitorScheme, SpecialVersion, VolumeData,
    VolumeMetadata,
};
