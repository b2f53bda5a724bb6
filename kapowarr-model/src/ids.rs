use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Strongly typed ID for volumes
    VolumeId
);
id_type!(
    /// Strongly typed ID for issues
    IssueId
);
id_type!(
    /// Strongly typed ID for files
    FileId
);
id_type!(
    /// Strongly typed ID for root folders
    RootFolderId
);
id_type!(
    /// Strongly typed ID for queued downloads
    DownloadId
);
id_type!(
    /// Strongly typed ID for blocklist entries
    BlocklistEntryId
);
id_type!(
    /// Strongly typed ID for external download clients
    ClientId
);
id_type!(
    /// Strongly typed ID for stored credentials
    CredentialId
);
id_type!(
    /// Strongly typed ID for tasks in the task queue
    TaskId
);
id_type!(
    /// The ID of a volume or issue on ComicVine
    ComicvineId
);
