mod cli;
mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use substack_wxr::config::ConverterConfig;
use substack_wxr::converter::Converter;
use substack_wxr::endpoint::ProgressEndpoint;
use substack_wxr::poller::{HttpProgressSource, LocalSource, PollOutcome, Poller};
use substack_wxr::source::{JsonLinesSource, SourceCollection};
use substack_wxr::state_machine::ProgressStatus;
use substack_wxr::store::{FileJobStore, JobStore};
use substack_wxr::wxr::Target;
use ui::ConversionProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ConverterConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConverterConfig::load()?,
    };
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    match cli.command {
        Command::Convert { input, output } => convert(config, &input, output).await,
        Command::Resume {
            job_id,
            input,
            mode,
        } => {
            if let Some(mode) = mode {
                config.resume_mode = mode.into();
            }
            resume(config, &job_id, &input).await
        }
        Command::Status { job_id } => status(&config, job_id.as_deref()),
        Command::Poll { url, job_id } => poll(&config, url, job_id).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "substack_wxr=debug" } else { "substack_wxr=warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn label_for(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

async fn convert(config: ConverterConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let source = JsonLinesSource::open(input)?;
    let label = label_for(source.path());
    let store = FileJobStore::new(&config.state_dir)?;
    let target = match (output, &config.output_dir) {
        (Some(path), _) => Some(Target::File(path)),
        (None, Some(_)) => None,
        (None, None) => Some(Target::File(input.with_extension("xml"))),
    };

    let endpoint = ProgressEndpoint::new(Converter::new(config, source, store));
    let id = match target {
        Some(target) => endpoint.converter().create_job_with_target(&label, target)?,
        None => endpoint.converter().create_job(&label)?,
    };
    info!(job = %id, input = %input.display(), "conversion started");
    println!("Job {id}");
    drive(&endpoint, &id, &label).await
}

async fn resume(config: ConverterConfig, id: &str, input: &Path) -> Result<()> {
    let source = JsonLinesSource::open(input)?;
    let label = label_for(source.path());
    let store = FileJobStore::new(&config.state_dir)?;
    let endpoint = ProgressEndpoint::new(Converter::new(config, source, store));
    let progress = endpoint.converter().resume(id)?;
    println!(
        "Job {id} resumed at {}/{}",
        progress.processed, progress.total
    );
    drive(&endpoint, id, &label).await
}

/// Run the job to the end by polling the in-process endpoint.
async fn drive<S: SourceCollection, J: JobStore>(
    endpoint: &ProgressEndpoint<S, J>,
    id: &str,
    label: &str,
) -> Result<()> {
    let mut poller_config = endpoint.converter().config().poller.clone();
    poller_config.interval_ms = 0;

    let bar = ConversionProgress::start(label);
    let source = LocalSource::new(endpoint, Some(id.to_string()));
    let outcome = Poller::new(poller_config)
        .run(&source, |p| bar.update(p))
        .await?;
    bar.complete(&outcome.last);
    bar.print_report(&endpoint.converter().report(id)?);
    finish(outcome)
}

async fn poll(config: &ConverterConfig, url: String, job_id: Option<String>) -> Result<()> {
    let source = HttpProgressSource::new(url, job_id)?;
    let bar = ConversionProgress::start(source.url());
    let outcome = Poller::new(config.poller.clone())
        .run(&source, |p| bar.update(p))
        .await?;
    bar.complete(&outcome.last);
    finish(outcome)
}

fn finish(outcome: PollOutcome) -> Result<()> {
    if outcome.last.status == ProgressStatus::Failed {
        bail!("conversion failed");
    }
    if let Some(url) = outcome.redirect {
        println!("Next: {url}");
    }
    Ok(())
}

fn status(config: &ConverterConfig, job_id: Option<&str>) -> Result<()> {
    let store = FileJobStore::new(&config.state_dir)?;
    match job_id {
        Some(id) => {
            let job = store
                .load(id)?
                .with_context(|| format!("no job {id} in {}", store.dir().display()))?;
            ui::print_report(&substack_wxr::state_machine::ConversionReport::from_job(&job));
        }
        None => ui::print_jobs(&store.list()?),
    }
    Ok(())
}
