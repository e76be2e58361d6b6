//! Persistence of job progress.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::state_machine::Job;

/// Where the converter keeps `(cursor, total, status, ...)` between calls
/// and across restarts.
pub trait JobStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<Job>>;
    fn save(&self, job: &Job) -> Result<()>;
    fn list(&self) -> Result<Vec<Job>>;
}

impl<T: JobStore + ?Sized> JobStore for std::sync::Arc<T> {
    fn load(&self, id: &str) -> Result<Option<Job>> {
        (**self).load(id)
    }

    fn save(&self, job: &Job) -> Result<()> {
        (**self).save(job)
    }

    fn list(&self) -> Result<Vec<Job>> {
        (**self).list()
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn load(&self, id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get(id).cloned())
    }

    fn save(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by_key(|j| j.created_at);
        Ok(all)
    }
}

/// One pretty-printed JSON file per job under `dir`.
///
/// Saves go through a temporary file and a rename, so a crash mid-save
/// leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(ConvertError::JobNotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl JobStore for FileJobStore {
    fn load(&self, id: &str) -> Result<Option<Job>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save(&self, job: &Job) -> Result<()> {
        let path = self.path_for(&job.id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(job)?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        debug!(job = %job.id, cursor = job.cursor, "saved job state");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        let mut all = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = std::fs::read_to_string(&path)?;
            all.push(serde_json::from_str::<Job>(&json)?);
        }
        all.sort_by_key(|j| j.created_at);
        Ok(all)
    }
}
