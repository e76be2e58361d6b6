use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::{error, info, warn};

use crate::config::{ConverterConfig, ResumeMode};
use crate::error::{ConvertError, Result};
use crate::mapping::Mapper;
use crate::source::{Entry, SourceCollection};
use crate::state_machine::{
    ConversionReport, Event, Job, JobStatus, OutputRecord, Progress, StateMachine,
};
use crate::store::JobStore;
use crate::wxr::{ChannelMeta, Target, Writer, WxrGenerator};

/// A job together with the generator that owns its output.
pub(crate) struct JobRun {
    job: Job,
    generator: Option<WxrGenerator>,
}

pub(crate) struct JobSlot {
    /// Held for the whole of a batch. Never waited on: a second caller gets `Busy`.
    pub(crate) run: Mutex<JobRun>,
    /// Last published progress, readable while a batch is in flight.
    snapshot: Mutex<Progress>,
}

/// What one batch did, applied to the job only after its output is flushed.
#[derive(Default)]
struct BatchTally {
    consumed: u64,
    comments: u64,
    ids: HashSet<String>,
    written: Vec<(String, usize)>,
    failures: Vec<(u64, Option<String>, String)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn output_record(target: &Target) -> OutputRecord {
    match target {
        Target::Buffer => OutputRecord::Buffer,
        Target::File(path) | Target::Resume { path, .. } => OutputRecord::File { path: path.clone() },
        Target::Stream(_) => OutputRecord::Stream,
    }
}

/// Drives conversion jobs one bounded batch at a time.
///
/// Every public operation is a short synchronous call; progress only moves
/// when a caller invokes [`advance`](Converter::advance).
pub struct Converter<S, J> {
    config: ConverterConfig,
    mapper: Mapper,
    source: S,
    store: J,
    jobs: Mutex<HashMap<String, Arc<JobSlot>>>,
    active: Mutex<Option<String>>,
}

impl<S: SourceCollection, J: JobStore> Converter<S, J> {
    pub fn new(config: ConverterConfig, source: S, store: J) -> Self {
        Self {
            mapper: config.mapper(),
            config,
            source,
            store,
            jobs: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// The most recently created or resumed job.
    pub fn active_job(&self) -> Option<String> {
        lock(&self.active).clone()
    }

    /// Create a job writing to `output_dir/<id>.xml`, or to memory when no
    /// output directory is configured.
    pub fn create_job(&self, label: &str) -> Result<String> {
        let output_dir = self.config.output_dir.clone();
        self.start_job(label, move |id| match output_dir {
            Some(dir) => Target::File(dir.join(format!("{id}.xml"))),
            None => Target::Buffer,
        })
    }

    pub fn create_job_with_target(&self, label: &str, target: Target) -> Result<String> {
        self.start_job(label, move |_| target)
    }

    fn start_job(&self, label: &str, target_for: impl FnOnce(&str) -> Target) -> Result<String> {
        let mut job = Job::new(label.to_string(), OutputRecord::Buffer);
        let target = target_for(&job.id);
        job.output = output_record(&target);

        match self.source.total() {
            Ok(Some(total)) => job.total = Some(total),
            Ok(None) => {
                return self.register_failed(job, "source cannot report its item count".into());
            }
            Err(e) => return self.register_failed(job, e.to_string()),
        }

        let mut generator = match Writer::open(target) {
            Ok(writer) => WxrGenerator::new(writer),
            Err(e) => {
                self.register_failed(job, e.to_string())?;
                return Err(e);
            }
        };
        if let Err(e) = self.open_channel(&mut job, &mut generator) {
            drop(generator);
            self.register_failed(job, e.to_string())?;
            return Err(e);
        }
        job.output_offset = generator.writer().bytes_written();
        self.store.save(&job)?;

        info!(
            job = %job.id,
            label = %job.label,
            total = job.total.unwrap_or(0),
            "conversion job created"
        );
        let id = job.id.clone();
        self.insert(job, Some(generator));
        Ok(id)
    }

    /// Write the channel header. A job with nothing to convert is closed and
    /// finished on the spot, so no later `advance` has anything to write.
    fn open_channel(&self, job: &mut Job, generator: &mut WxrGenerator) -> Result<()> {
        generator.begin_channel(&self.channel_meta(job))?;
        if job.total != Some(0) {
            return generator.flush();
        }
        StateMachine::next(job, Event::Start)?;
        generator.end_channel()?;
        generator.close()?;
        StateMachine::next(job, Event::Batch { consumed: 0 })?;
        Ok(())
    }

    fn register_failed(&self, mut job: Job, reason: String) -> Result<String> {
        warn!(job = %job.id, "job cannot start: {reason}");
        StateMachine::next(&mut job, Event::Fatal(reason))?;
        self.store.save(&job)?;
        let id = job.id.clone();
        self.insert(job, None);
        Ok(id)
    }

    fn channel_meta(&self, job: &Job) -> ChannelMeta {
        ChannelMeta {
            pub_date: Some(job.created_at),
            ..self.config.site.clone()
        }
    }

    fn insert(&self, job: Job, generator: Option<WxrGenerator>) {
        let id = job.id.clone();
        let slot = Arc::new(JobSlot {
            snapshot: Mutex::new(job.progress()),
            run: Mutex::new(JobRun { job, generator }),
        });
        lock(&self.jobs).insert(id.clone(), slot);
        *lock(&self.active) = Some(id);
    }

    pub(crate) fn slot(&self, id: &str) -> Result<Arc<JobSlot>> {
        lock(&self.jobs)
            .get(id)
            .cloned()
            .ok_or_else(|| ConvertError::JobNotFound(id.to_string()))
    }

    fn try_run<'a>(&self, slot: &'a JobSlot, id: &str) -> Result<MutexGuard<'a, JobRun>> {
        match slot.run.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(ConvertError::Busy(id.to_string())),
            Err(TryLockError::Poisoned(_)) => Err(ConvertError::invalid_state(
                id,
                "a previous batch panicked; resume the job from its persisted state",
            )),
        }
    }

    /// Process the next batch of at most `batch_size` items (0 counts as 1).
    ///
    /// On a finished job this returns the unchanged snapshot without touching
    /// the output. A concurrent call for the same job fails with `Busy`.
    pub fn advance(&self, id: &str, batch_size: usize) -> Result<Progress> {
        let slot = self.slot(id)?;
        let mut guard = self.try_run(&slot, id)?;
        let run = &mut *guard;
        let result = self.run_batch(run, batch_size);
        *lock(&slot.snapshot) = run.job.progress();
        result
    }

    fn run_batch(&self, run: &mut JobRun, batch_size: usize) -> Result<Progress> {
        match run.job.status {
            JobStatus::Done => return Ok(run.job.progress()),
            JobStatus::Failed | JobStatus::Cancelled => {
                return Err(ConvertError::invalid_state(
                    &run.job.id,
                    format!("job is {}", run.job.status),
                ));
            }
            JobStatus::Created => {
                StateMachine::next(&mut run.job, Event::Start)?;
            }
            JobStatus::Processing => {}
        }

        let outcome = match run.generator.as_mut() {
            Some(generator) => self.process(&mut run.job, generator, batch_size),
            None => Err(ConvertError::invalid_state(
                &run.job.id,
                "output is not open; resume the job",
            )),
        };
        match outcome {
            Ok(()) => {
                let progress = run.job.progress();
                info!(
                    job = %run.job.id,
                    processed = progress.processed,
                    total = progress.total,
                    failures = progress.failures,
                    status = %progress.status,
                    "batch complete"
                );
                Ok(progress)
            }
            Err(e) => Err(self.fail(run, e)),
        }
    }

    fn process(&self, job: &mut Job, generator: &mut WxrGenerator, batch_size: usize) -> Result<()> {
        let total = job
            .total
            .ok_or_else(|| ConvertError::invalid_state(&job.id, "total is unknown"))?;
        let limit = (batch_size.max(1) as u64).min(job.remaining()) as usize;
        let entries = if limit == 0 {
            Vec::new()
        } else {
            self.source.read(job.cursor, limit)?
        };
        if entries.len() < limit {
            return Err(ConvertError::Source(format!(
                "source returned {} of {limit} items at position {}",
                entries.len(),
                job.cursor
            )));
        }

        let mut tally = BatchTally::default();
        for entry in entries.into_iter().take(limit) {
            let position = job.cursor + tally.consumed;
            let source_id = entry.as_ref().ok().and_then(|item| item.id.clone());
            match self.emit(job, &mut tally, generator, entry, position) {
                Ok(()) => {}
                Err(e) if e.is_item_level() => {
                    warn!(job = %job.id, position, "item skipped: {e}");
                    tally.failures.push((position, source_id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
            tally.consumed += 1;
        }

        if job.cursor + tally.consumed == total {
            generator.end_channel()?;
            generator.close()?;
        } else {
            generator.flush()?;
        }

        // Counters only move once the whole batch is on the sink.
        let consumed = tally.consumed;
        for (source_id, comments) in tally.written {
            job.record_written(&source_id, comments);
        }
        for (position, source_id, reason) in tally.failures {
            job.record_failure(position, source_id, reason);
        }
        job.output_offset = generator.writer().bytes_written();
        StateMachine::next(job, Event::Batch { consumed })?;
        job.batches += 1;
        self.store.save(job)
    }

    fn emit(
        &self,
        job: &Job,
        tally: &mut BatchTally,
        generator: &mut WxrGenerator,
        entry: Entry,
        position: u64,
    ) -> Result<()> {
        let source = entry?;
        let first_comment_id = job.next_comment_id + tally.comments;
        let item = self.mapper.map(&source, position, first_comment_id)?;
        if job.emitted_ids.contains(&item.source_id) || tally.ids.contains(&item.source_id) {
            return Err(ConvertError::schema(&item.source_id, "duplicate source id"));
        }
        generator.write_item(&item)?;
        tally.comments += item.comments.len() as u64;
        tally.ids.insert(item.source_id.clone());
        tally.written.push((item.source_id, item.comments.len()));
        Ok(())
    }

    /// Mark the job failed, release its output and persist what is known.
    fn fail(&self, run: &mut JobRun, err: ConvertError) -> ConvertError {
        error!(job = %run.job.id, "job failed: {err}");
        if !run.job.status.is_terminal()
            && let Err(e) = StateMachine::next(&mut run.job, Event::Fatal(err.to_string()))
        {
            warn!(job = %run.job.id, "could not record failure: {e}");
        }
        if let Some(generator) = run.generator.as_mut()
            && let Err(e) = generator.close()
        {
            warn!(job = %run.job.id, "output not closed cleanly: {e}");
        }
        if let Err(e) = self.store.save(&run.job) {
            error!(job = %run.job.id, "could not persist failed job: {e}");
        }
        err
    }

    /// Stop a job that has not finished and close its output.
    pub fn cancel(&self, id: &str) -> Result<Progress> {
        let slot = self.slot(id)?;
        let mut guard = self.try_run(&slot, id)?;
        let run = &mut *guard;
        StateMachine::next(&mut run.job, Event::Cancel)?;
        if let Some(generator) = run.generator.as_mut()
            && let Err(e) = generator.close()
        {
            warn!(job = %id, "output not closed cleanly: {e}");
        }
        let progress = run.job.progress();
        *lock(&slot.snapshot) = progress.clone();
        self.store.save(&run.job)?;
        info!(job = %id, processed = progress.processed, "job cancelled");
        Ok(progress)
    }

    /// Latest snapshot. Never blocks on an in-flight batch.
    pub fn progress(&self, id: &str) -> Result<Progress> {
        if let Ok(slot) = self.slot(id) {
            return Ok(lock(&slot.snapshot).clone());
        }
        self.store
            .load(id)?
            .map(|job| job.progress())
            .ok_or_else(|| ConvertError::JobNotFound(id.to_string()))
    }

    /// Bring a persisted job back after the process that ran it went away.
    ///
    /// With [`ResumeMode::Resume`] the output file is cut back to the offset
    /// saved with the last complete batch and processing continues from the
    /// saved cursor. With [`ResumeMode::Restart`] the job starts over.
    pub fn resume(&self, id: &str) -> Result<Progress> {
        if let Ok(slot) = self.slot(id) {
            return Ok(lock(&slot.snapshot).clone());
        }
        let mut job = self
            .store
            .load(id)?
            .ok_or_else(|| ConvertError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            let progress = job.progress();
            self.insert(job, None);
            return Ok(progress);
        }
        let total = self.source.total()?;
        if total != job.total {
            return Err(ConvertError::invalid_state(
                id,
                format!(
                    "job was created for {} items but the source now holds {}",
                    job.total.unwrap_or(0),
                    total.map_or_else(|| "an unknown number of".to_string(), |t| t.to_string())
                ),
            ));
        }
        let path = match &job.output {
            OutputRecord::File { path } => path.clone(),
            other => {
                return Err(ConvertError::invalid_state(
                    id,
                    format!("{other:?} output cannot be resumed"),
                ));
            }
        };

        let generator = match self.config.resume_mode {
            ResumeMode::Resume => {
                let writer = Writer::open(Target::Resume {
                    path,
                    offset: job.output_offset,
                })?;
                info!(job = %id, cursor = job.cursor, offset = job.output_offset, "resuming job");
                WxrGenerator::resume(writer)
            }
            ResumeMode::Restart => {
                StateMachine::next(&mut job, Event::Restart)?;
                let mut generator = WxrGenerator::new(Writer::open(Target::File(path))?);
                generator.begin_channel(&self.channel_meta(&job))?;
                generator.flush()?;
                job.output_offset = generator.writer().bytes_written();
                self.store.save(&job)?;
                info!(job = %id, "restarting job from the first item");
                generator
            }
        };

        let progress = job.progress();
        self.insert(job, Some(generator));
        Ok(progress)
    }

    /// Drop a finished job from memory, along with any buffered output.
    /// Its persisted state stays in the store.
    pub fn forget(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        {
            let run = self.try_run(&slot, id)?;
            if !run.job.status.is_terminal() {
                return Err(ConvertError::invalid_state(
                    id,
                    format!("job is {} and still owns its output", run.job.status),
                ));
            }
        }
        lock(&self.jobs).remove(id);
        let mut active = lock(&self.active);
        if active.as_deref() == Some(id) {
            *active = None;
        }
        Ok(())
    }

    /// Output accumulated so far, for in-memory targets.
    pub fn contents(&self, id: &str) -> Result<Option<String>> {
        let slot = self.slot(id)?;
        let run = self.try_run(&slot, id)?;
        Ok(run
            .generator
            .as_ref()
            .and_then(|g| g.writer().contents())
            .map(str::to_string))
    }

    /// Copy of the full job record.
    pub fn job(&self, id: &str) -> Result<Job> {
        let slot = self.slot(id)?;
        let run = self.try_run(&slot, id)?;
        Ok(run.job.clone())
    }

    pub fn report(&self, id: &str) -> Result<ConversionReport> {
        match self.slot(id) {
            Ok(slot) => {
                let run = self.try_run(&slot, id)?;
                Ok(ConversionReport::from_job(&run.job))
            }
            Err(_) => self
                .store
                .load(id)?
                .map(|job| ConversionReport::from_job(&job))
                .ok_or_else(|| ConvertError::JobNotFound(id.to_string())),
        }
    }
}
