//! Server side of the progress protocol.
//!
//! A client repeatedly sends `action=substack_progress`, form-encoded the way
//! an admin-ajax call is, or the same fields as JSON. Every request runs at
//! most one batch of the job and answers with its snapshot
//! `{processed, total, status, failures}`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::converter::Converter;
use crate::error::{ConvertError, Result};
use crate::source::SourceCollection;
use crate::state_machine::{Progress, ProgressStatus};
use crate::store::JobStore;

pub const PROGRESS_ACTION: &str = "substack_progress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub action: String,
    /// Defaults to the converter's active job.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Defaults to the configured batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl ProgressRequest {
    pub fn for_job(job_id: Option<String>) -> Self {
        Self {
            action: PROGRESS_ACTION.to_string(),
            job_id,
            batch_size: None,
        }
    }
}

pub struct ProgressEndpoint<S, J> {
    converter: Converter<S, J>,
}

impl<S: SourceCollection, J: JobStore> ProgressEndpoint<S, J> {
    pub fn new(converter: Converter<S, J>) -> Self {
        Self { converter }
    }

    pub fn converter(&self) -> &Converter<S, J> {
        &self.converter
    }

    /// Run one batch and report where the job stands.
    ///
    /// A request that arrives while another batch is running gets the current
    /// snapshot instead of an error. A job that failed, now or earlier,
    /// answers with its `failed` snapshot.
    pub fn handle(&self, request: &ProgressRequest) -> Result<Progress> {
        if request.action != PROGRESS_ACTION {
            return Err(ConvertError::BadRequest(format!(
                "unknown action {:?}",
                request.action
            )));
        }
        let id = match &request.job_id {
            Some(id) => id.clone(),
            None => self
                .converter
                .active_job()
                .ok_or_else(|| ConvertError::JobNotFound("no active job".into()))?,
        };
        let batch_size = request
            .batch_size
            .unwrap_or(self.converter.config().batch_size);

        match self.converter.advance(&id, batch_size) {
            Ok(progress) => Ok(progress),
            Err(ConvertError::Busy(_)) => {
                debug!(job = %id, "batch in flight, answering with snapshot");
                self.converter.progress(&id)
            }
            Err(e @ ConvertError::JobNotFound(_)) => Err(e),
            Err(e) => {
                let progress = self.converter.progress(&id)?;
                if progress.status == ProgressStatus::Failed {
                    warn!(job = %id, "reporting failed job: {e}");
                    Ok(progress)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// [`handle`](Self::handle) for an `application/x-www-form-urlencoded`
    /// body such as `action=substack_progress&job_id=...`, answering with JSON.
    pub fn handle_form(&self, body: &str) -> Result<String> {
        let mut request = ProgressRequest {
            action: String::new(),
            job_id: None,
            batch_size: None,
        };
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            match key.as_ref() {
                "action" => request.action = value.into_owned(),
                "job_id" if !value.is_empty() => request.job_id = Some(value.into_owned()),
                "batch_size" => {
                    let size = value.parse().map_err(|_| {
                        ConvertError::BadRequest(format!("batch_size {value:?} is not a number"))
                    })?;
                    request.batch_size = Some(size);
                }
                _ => {}
            }
        }
        let progress = self.handle(&request)?;
        Ok(serde_json::to_string(&progress)?)
    }

    /// [`handle`](Self::handle) for a JSON request body, answering with JSON.
    pub fn handle_json(&self, body: &str) -> Result<String> {
        let request: ProgressRequest = serde_json::from_str(body)
            .map_err(|e| ConvertError::BadRequest(format!("unreadable request: {e}")))?;
        let progress = self.handle(&request)?;
        Ok(serde_json::to_string(&progress)?)
    }
}
