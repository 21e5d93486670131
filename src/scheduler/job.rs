//! Dispatch job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channels::Payload;
use crate::contacts::RecipientAddress;

/// Scheduler-assigned job identifier, increasing in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Jobs only move forward: `Pending -> Firing -> Sent | Failed`, or
/// `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Firing,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Firing => "firing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recipient that could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    pub recipient: RecipientAddress,
    pub reason: String,
}

/// A deferred send of one payload to several recipients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    pub id: JobId,
    pub recipients: Vec<RecipientAddress>,
    pub payload: Payload,
    pub fire_at: DateTime<Utc>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecipientFailure>,
    /// The media file was uploaded for this job and is deleted with it
    #[serde(skip)]
    pub(crate) owns_media: bool,
}

impl DispatchJob {
    /// Short human-readable outcome for operator display.
    pub fn summary(&self) -> String {
        match self.status {
            JobStatus::Sent => format!("Delivered to {} recipient(s)", self.recipients.len()),
            JobStatus::Failed => {
                let failed: Vec<String> = self
                    .failures
                    .iter()
                    .map(|f| format!("{} ({})", f.recipient, f.reason))
                    .collect();
                format!(
                    "{} of {} recipient(s) failed: {}",
                    self.failures.len(),
                    self.recipients.len(),
                    failed.join(", ")
                )
            }
            status => format!("Job is {}", status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&JobStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(JobStatus::Firing.to_string(), "firing");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Firing.is_terminal());
    }

    #[test]
    fn test_failed_summary_names_recipients() {
        let ana = RecipientAddress::parse("51974672423").unwrap();
        let job = DispatchJob {
            id: JobId::from(3),
            recipients: vec![ana.clone()],
            payload: Payload::text("hola"),
            fire_at: Utc::now(),
            status: JobStatus::Failed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            failures: vec![RecipientFailure {
                recipient: ana,
                reason: "timeout".to_string(),
            }],
            owns_media: false,
        };
        assert_eq!(
            job.summary(),
            "1 of 1 recipient(s) failed: 51974672423@c.us (timeout)"
        );

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["recipients"][0], "51974672423@c.us");
        assert!(json.get("ownsMedia").is_none());
    }
}
