use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// Lifecycle of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// What a polling client gets to see.
    pub fn progress_status(&self) -> ProgressStatus {
        match self {
            JobStatus::Created | JobStatus::Processing => ProgressStatus::Processing,
            JobStatus::Done => ProgressStatus::Done,
            JobStatus::Failed | JobStatus::Cancelled => ProgressStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Done,
    Failed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Processing => write!(f, "processing"),
            ProgressStatus::Done => write!(f, "done"),
            ProgressStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The snapshot handed to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
    pub status: ProgressStatus,
    #[serde(default)]
    pub failures: u64,
}

impl Progress {
    /// Percentage complete. An empty job counts as finished.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 / self.total as f64) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ProgressStatus::Processing
    }
}

/// A source item that did not make it into the output, or the reason the
/// whole job stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    /// Cursor position of the item, when the failure concerns one.
    pub position: Option<u64>,
    pub source_id: Option<String>,
    pub reason: String,
}

/// Where the job's document goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRecord {
    Buffer,
    File { path: PathBuf },
    Stream,
}

/// One conversion run. Everything needed to resume it is persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub label: String,
    pub status: JobStatus,
    pub state_history: Vec<JobStatus>,
    /// Source items consumed so far, written or skipped.
    pub cursor: u64,
    /// `None` when the source could not report its size.
    pub total: Option<u64>,
    pub written: u64,
    pub failures: Vec<ItemFailure>,
    pub fatal: Option<ItemFailure>,
    /// Source ids already emitted; a repeat is skipped as a duplicate.
    pub emitted_ids: BTreeSet<String>,
    pub next_comment_id: u64,
    pub output: OutputRecord,
    /// Byte length of the output at the end of the last persisted batch.
    pub output_offset: u64,
    pub batches: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(label: String, output: OutputRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            label,
            status: JobStatus::Created,
            state_history: Vec::new(),
            cursor: 0,
            total: None,
            written: 0,
            failures: Vec::new(),
            fatal: None,
            emitted_ids: BTreeSet::new(),
            next_comment_id: 1,
            output,
            output_offset: 0,
            batches: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            processed: self.cursor,
            total: self.total.unwrap_or(0),
            status: self.status.progress_status(),
            failures: self.failures.len() as u64,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.unwrap_or(0).saturating_sub(self.cursor)
    }

    pub(crate) fn record_written(&mut self, source_id: &str, comments: usize) {
        self.emitted_ids.insert(source_id.to_string());
        self.next_comment_id += comments as u64;
        self.written += 1;
    }

    pub(crate) fn record_failure(&mut self, position: u64, source_id: Option<String>, reason: String) {
        self.failures.push(ItemFailure {
            kind: FailureKind::Item,
            position: Some(position),
            source_id,
            reason,
        });
    }

    /// Forget all progress so the job can run again from the first item.
    pub(crate) fn reset_progress(&mut self) {
        self.cursor = 0;
        self.written = 0;
        self.failures.clear();
        self.emitted_ids.clear();
        self.next_comment_id = 1;
        self.output_offset = 0;
        self.batches = 0;
    }
}

/// Structured record produced when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub job_id: String,
    pub label: String,
    pub status: JobStatus,
    pub state_transitions: Vec<JobStatus>,
    pub total: u64,
    pub written: u64,
    pub failures: Vec<ItemFailure>,
    pub fatal: Option<ItemFailure>,
    pub batches: u32,
    pub output: OutputRecord,
    pub output_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ConversionReport {
    pub fn from_job(job: &Job) -> Self {
        let completed = job.updated_at;
        let mut transitions = job.state_history.clone();
        transitions.push(job.status);

        Self {
            job_id: job.id.clone(),
            label: job.label.clone(),
            status: job.status,
            state_transitions: transitions,
            total: job.total.unwrap_or(0),
            written: job.written,
            failures: job.failures.clone(),
            fatal: job.fatal.clone(),
            batches: job.batches,
            output: job.output.clone(),
            output_bytes: job.output_offset,
            started_at: job.created_at,
            completed_at: completed,
            duration_ms: (completed - job.created_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("export.jsonl".into(), OutputRecord::Buffer);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.cursor, 0);
        assert_eq!(job.next_comment_id, 1);
        assert!(job.state_history.is_empty());
        assert!(job.failures.is_empty());
    }

    #[test]
    fn progress_projection() {
        let mut job = Job::new("x".into(), OutputRecord::Buffer);
        job.total = Some(4);
        job.cursor = 1;
        job.record_failure(0, Some("a".into()), "bad".into());
        let p = job.progress();
        assert_eq!(p.processed, 1);
        assert_eq!(p.total, 4);
        assert_eq!(p.status, ProgressStatus::Processing);
        assert_eq!(p.failures, 1);
        assert_eq!(p.percent(), 25.0);
        assert_eq!(job.remaining(), 3);

        job.status = JobStatus::Cancelled;
        assert_eq!(job.progress().status, ProgressStatus::Failed);
    }

    #[test]
    fn empty_job_percent_is_complete() {
        let p = Progress {
            processed: 0,
            total: 0,
            status: ProgressStatus::Done,
            failures: 0,
        };
        assert_eq!(p.percent(), 100.0);
        assert!(p.is_terminal());
    }

    #[test]
    fn progress_wire_format() {
        let p = Progress {
            processed: 2,
            total: 5,
            status: ProgressStatus::Processing,
            failures: 0,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"processed":2,"total":5,"status":"processing","failures":0}"#);

        // Older endpoints do not send a failure count.
        let parsed: Progress =
            serde_json::from_str(r#"{"processed":5,"total":5,"status":"done"}"#).unwrap();
        assert_eq!(parsed.status, ProgressStatus::Done);
        assert_eq!(parsed.failures, 0);
    }

    #[test]
    fn report_from_job() {
        let mut job = Job::new("Import".into(), OutputRecord::Buffer);
        job.total = Some(2);
        job.record_written("a", 3);
        assert_eq!(job.next_comment_id, 4);
        let report = ConversionReport::from_job(&job);
        assert_eq!(report.job_id, job.id);
        assert_eq!(report.written, 1);
        assert_eq!(report.total, 2);
        assert_eq!(report.state_transitions, vec![JobStatus::Created]);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let mut job = Job::new(
            "Serialize me".into(),
            OutputRecord::File {
                path: PathBuf::from("/tmp/out.xml"),
            },
        );
        job.record_written("p1", 0);
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""kind":"file""#));
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.output, job.output);
        assert!(back.emitted_ids.contains("p1"));
    }

    #[test]
    fn reset_clears_progress() {
        let mut job = Job::new("x".into(), OutputRecord::Buffer);
        job.cursor = 3;
        job.record_written("a", 2);
        job.record_failure(1, None, "bad".into());
        job.output_offset = 900;
        job.reset_progress();
        assert_eq!(job.cursor, 0);
        assert_eq!(job.written, 0);
        assert!(job.failures.is_empty());
        assert!(job.emitted_ids.is_empty());
        assert_eq!(job.next_comment_id, 1);
        assert_eq!(job.output_offset, 0);
    }
}
