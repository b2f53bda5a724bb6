use crate::download::{DownloadData, DownloadState};
use crate::ids::{DownloadId, IssueId, VolumeId};

/// A typed notification broadcast to all subscribers (e.g. the websocket
/// writer). The `event` tag and payload shapes are part of the API
/// contract.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A download was added to the queue.
    QueueAdded(DownloadData),
    /// Progress of a download in the queue.
    QueueStatus {
        id: DownloadId,
        status: DownloadState,
        size: Option<i64>,
        speed: i64,
        progress: f64,
    },
    /// A download left the queue, finished or canceled.
    QueueEnded { id: DownloadId },
    TaskAdded {
        action: String,
        volume_id: Option<VolumeId>,
        issue_id: Option<IssueId>,
    },
    TaskStatus { message: String },
    TaskEnded {
        action: String,
        volume_id: Option<VolumeId>,
        issue_id: Option<IssueId>,
    },
    MassEditorStatus {
        identifier: String,
        current_item: usize,
        total_items: usize,
    },
    /// The set of downloaded issues of a volume changed after a scan.
    DownloadedStatus {
        volume_id: VolumeId,
        downloaded_issues: Vec<IssueId>,
        not_downloaded_issues: Vec<IssueId>,
    },
    SettingsUpdated,
    VolumeUpdated { volume_id: VolumeId },
    VolumeDeleted { volume_id: VolumeId },
    IssueUpdated { issue_id: IssueId },
    IssueDeleted { issue_id: IssueId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = Event::TaskStatus {
            message: "Converted 1/3".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_status");
        assert_eq!(json["data"]["message"], "Converted 1/3");
    }

    #[test]
    fn test_downloaded_status_shape() {
        let event = Event::DownloadedStatus {
            volume_id: VolumeId(4),
            downloaded_issues: vec![IssueId(1), IssueId(2)],
            not_downloaded_issues: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "downloaded_status");
        assert_eq!(json["data"]["volume_id"], 4);
    }
}
