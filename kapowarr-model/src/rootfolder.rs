use crate::ids::RootFolderId;

/// Observed disk usage of the filesystem a root folder lives on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// A user-declared directory that holds volume folders.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RootFolderData {
    pub id: RootFolderId,
    /// Absolute, canonical path with a trailing separator.
    pub folder: String,
    /// `None` when the filesystem could not be statted.
    pub size: Option<DiskUsage>,
}
