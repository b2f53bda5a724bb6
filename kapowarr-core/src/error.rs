use kapowarr_model::{
    BlocklistEntryId, ClientId, CredentialId, DownloadId, DownloadSource,
    IssueId, RootFolderId, TaskId, VolumeId,
};
use thiserror::Error;

/// All error kinds of the core library. The variant names double as the
/// user-visible error strings of the API envelope.
#[derive(Error, Debug)]
pub enum KapowarrError {
    // Not found
    #[error("Volume with ID {0} not found")]
    VolumeNotFound(VolumeId),

    #[error("Issue with ID {0} not found")]
    IssueNotFound(IssueId),

    #[error("File not found")]
    FileNotFound,

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Rootfolder with ID {0} not found")]
    RootFolderNotFound(RootFolderId),

    #[error("Task with ID {0} not found")]
    TaskNotFound(TaskId),

    #[error("Download with ID {0} not found")]
    DownloadNotFound(DownloadId),

    #[error("Blocklist entry with ID {0} not found")]
    BlocklistEntryNotFound(BlocklistEntryId),

    #[error("Credential with ID {0} not found")]
    CredentialNotFound(CredentialId),

    #[error("External client with ID {0} not found")]
    ExternalClientNotFound(ClientId),

    #[error("Log file not found")]
    LogFileNotFound,

    // Conflict / in use
    #[error("Rootfolder with ID {0} is still in use by a volume")]
    RootFolderInUse(RootFolderId),

    #[error("Rootfolder is a parent or child of an existing rootfolder or the download folder: {0}")]
    RootFolderInvalid(String),

    #[error("The volume is already added")]
    VolumeAlreadyAdded,

    #[error("Volume not matched with the ComicVine database")]
    VolumeNotMatched,

    #[error("There is an active download for volume {0}")]
    VolumeDownloadedFor(VolumeId),

    #[error("There is a task running for volume {0}")]
    TaskForVolumeRunning(VolumeId),

    #[error("The task is running and can not be deleted")]
    TaskNotDeletable,

    #[error("The external client still has downloads assigned to it")]
    ClientDownloading(ClientId),

    #[error("The download can not be moved to that position")]
    DownloadUnmovable,

    // Input
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid value for key {key}: {value}")]
    InvalidKeyValue { key: String, value: String },

    #[error("No setting matched the key: {0}")]
    InvalidSettingKey(String),

    #[error("Invalid value for setting {key}: {value}")]
    InvalidSettingValue { key: String, value: String },

    #[error("The setting can not be changed this way: {0}")]
    InvalidSettingModification(String),

    // External
    #[error("ComicVine API rate limit reached")]
    CVRateLimitReached,

    #[error("No ComicVine API key is set or it is invalid")]
    InvalidComicVineApiKey,

    #[error("The credentials for the client are invalid")]
    CredentialInvalid,

    #[error("The download client is not working: {0}")]
    ClientNotWorking(String),

    #[error("The external client is not working: {0}")]
    ExternalClientNotWorking(String),

    #[error("The download link does not work: {0}")]
    LinkBroken(String),

    #[error("Failed to process the download page: {0}")]
    FailedGCPage(String),

    #[error("The download limit of the source is reached: {0}")]
    DownloadLimitReached(DownloadSource),

    // Infrastructure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KapowarrError {
    /// The error name as exposed in the API envelope's `error` field.
    pub fn api_name(&self) -> &'static str {
        use KapowarrError::*;
        match self {
            VolumeNotFound(_) => "VolumeNotFound",
            IssueNotFound(_) => "IssueNotFound",
            FileNotFound => "FileNotFound",
            FolderNotFound(_) => "FolderNotFound",
            RootFolderNotFound(_) => "RootFolderNotFound",
            TaskNotFound(_) => "TaskNotFound",
            DownloadNotFound(_) => "DownloadNotFound",
            BlocklistEntryNotFound(_) => "BlocklistEntryNotFound",
            CredentialNotFound(_) => "CredentialNotFound",
            ExternalClientNotFound(_) => "ExternalClientNotFound",
            LogFileNotFound => "LogFileNotFound",
            RootFolderInUse(_) => "RootFolderInUse",
            RootFolderInvalid(_) => "RootFolderInvalid",
            VolumeAlreadyAdded => "VolumeAlreadyAdded",
            VolumeNotMatched => "VolumeNotMatched",
            VolumeDownloadedFor(_) => "VolumeDownloadedFor",
            TaskForVolumeRunning(_) => "TaskForVolumeRunning",
            TaskNotDeletable => "TaskNotDeletable",
            ClientDownloading(_) => "ClientDownloading",
            DownloadUnmovable => "DownloadUnmovable",
            KeyNotFound(_) => "KeyNotFound",
            InvalidKeyValue { .. } => "InvalidKeyValue",
            InvalidSettingKey(_) => "InvalidSettingKey",
            InvalidSettingValue { .. } => "InvalidSettingValue",
            InvalidSettingModification(_) => "InvalidSettingModification",
            CVRateLimitReached => "CVRateLimitReached",
            InvalidComicVineApiKey => "InvalidComicVineApiKey",
            CredentialInvalid => "CredentialInvalid",
            ClientNotWorking(_) => "ClientNotWorking",
            ExternalClientNotWorking(_) => "ExternalClientNotWorking",
            LinkBroken(_) => "LinkBroken",
            FailedGCPage(_) => "FailedGCPage",
            DownloadLimitReached(_) => "DownloadLimitReached",
            Io(_) => "IoError",
            Database(_) | Migration(_) => "DatabaseError",
            Request(_) => "RequestError",
            Serialization(_) => "SerializationError",
            Archive(_) => "ArchiveError",
            Internal(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, KapowarrError>;
