use chrono::Utc;

use crate::error::{ConvertError, FailureKind, Result};

use super::job::{ItemFailure, Job, JobStatus};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First batch is about to run.
    Start,
    /// A batch consumed `consumed` source items, written or skipped.
    Batch { consumed: u64 },
    /// The job cannot continue.
    Fatal(String),
    /// The caller gave up on the job.
    Cancel,
    /// Throw away progress and run again from the first item.
    Restart,
}

/// The result of applying an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Moved to a new non-terminal status.
    Next(JobStatus),
    /// Still processing; only the cursor moved.
    Stay,
    /// Reached a terminal status.
    Complete(JobStatus),
}

/// Drives a [`Job`] through `Created → Processing → {Done, Failed, Cancelled}`.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job`.
    ///
    /// - `Start` moves `Created` to `Processing`.
    /// - `Batch` advances the cursor while `Processing` and completes with
    ///   `Done` once it reaches the total. Overrunning the total is rejected.
    /// - `Fatal` and `Cancel` end any non-terminal job.
    /// - `Restart` returns a non-terminal job to `Created` with progress cleared.
    /// - Terminal jobs reject every event and are left untouched.
    pub fn next(job: &mut Job, event: Event) -> Result<Transition> {
        if job.status.is_terminal() {
            return Err(ConvertError::invalid_state(
                &job.id,
                format!("job is {} and accepts no further events", job.status),
            ));
        }

        let current = job.status;
        let transition = match (current, event) {
            (JobStatus::Created, Event::Start) => Transition::Next(JobStatus::Processing),
            (JobStatus::Processing, Event::Batch { consumed }) => {
                let total = job
                    .total
                    .ok_or_else(|| ConvertError::invalid_state(&job.id, "total is unknown"))?;
                let cursor = job.cursor + consumed;
                if cursor > total {
                    return Err(ConvertError::invalid_state(
                        &job.id,
                        format!("cursor {cursor} would pass total {total}"),
                    ));
                }
                job.cursor = cursor;
                if cursor == total {
                    Transition::Complete(JobStatus::Done)
                } else {
                    Transition::Stay
                }
            }
            (_, Event::Fatal(reason)) => {
                job.fatal = Some(ItemFailure {
                    kind: FailureKind::Fatal,
                    position: job.total.is_some().then_some(job.cursor),
                    source_id: None,
                    reason,
                });
                Transition::Complete(JobStatus::Failed)
            }
            (_, Event::Cancel) => Transition::Complete(JobStatus::Cancelled),
            (_, Event::Restart) => {
                job.reset_progress();
                Transition::Next(JobStatus::Created)
            }
            (status, event) => {
                return Err(ConvertError::invalid_state(
                    &job.id,
                    format!("{event:?} not allowed while {status}"),
                ));
            }
        };

        match &transition {
            Transition::Next(status) | Transition::Complete(status) => {
                job.state_history.push(job.status);
                job.status = *status;
            }
            Transition::Stay => {}
        }
        job.updated_at = Utc::now();

        Ok(transition)
    }
}
