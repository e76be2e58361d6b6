mod job;
mod state;

pub use job::{
    ConversionReport, ItemFailure, Job, JobStatus, OutputRecord, Progress, ProgressStatus,
};
pub use state::{Event, StateMachine, Transition};
