//! Client side of the progress protocol: ask for a snapshot, report it,
//! wait, repeat until the job is no longer processing.

pub mod error;
pub mod http;

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::endpoint::{ProgressEndpoint, ProgressRequest};
use crate::source::SourceCollection;
use crate::state_machine::Progress;
use crate::store::JobStore;

pub use error::PollError;
pub use http::HttpProgressSource;

/// Parâmetros do polling (`[poller]` em `substack-wxr.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Intervalo entre consultas bem-sucedidas.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Atraso base do backoff exponencial após uma falha transitória.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Teto do backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Falhas transitórias toleradas em sequência antes de desistir.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Para onde seguir quando o job terminar (a tela de importação do WordPress).
    #[serde(default)]
    pub redirect_url: Option<String>,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            redirect_url: None,
        }
    }
}

impl PollerConfig {
    /// Exponential backoff: `base_delay_ms * 2^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Anything that can report a job's progress snapshot.
pub trait ProgressSource {
    fn poll(&self) -> impl Future<Output = Result<Progress, PollError>> + Send;
}

/// Polls an in-process endpoint. Each poll may run one batch, the same way
/// a remote endpoint does.
pub struct LocalSource<'a, S, J> {
    endpoint: &'a ProgressEndpoint<S, J>,
    request: ProgressRequest,
}

impl<'a, S, J> LocalSource<'a, S, J> {
    pub fn new(endpoint: &'a ProgressEndpoint<S, J>, job_id: Option<String>) -> Self {
        Self {
            endpoint,
            request: ProgressRequest::for_job(job_id),
        }
    }
}

impl<S: SourceCollection, J: JobStore> ProgressSource for LocalSource<'_, S, J> {
    async fn poll(&self) -> Result<Progress, PollError> {
        Ok(self.endpoint.handle(&self.request)?)
    }
}

/// What a finished polling loop saw.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub last: Progress,
    pub polls: u32,
    pub redirect: Option<String>,
}

pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Poll until the status leaves `processing`, handing every snapshot to
    /// `on_progress`. Transient failures are retried with backoff; anything
    /// else ends the loop.
    pub async fn run<P: ProgressSource>(
        &self,
        source: &P,
        mut on_progress: impl FnMut(&Progress),
    ) -> Result<PollOutcome, PollError> {
        let mut polls = 0u32;
        let mut failures = 0u32;
        loop {
            polls += 1;
            match source.poll().await {
                Ok(progress) => {
                    failures = 0;
                    on_progress(&progress);
                    if progress.is_terminal() {
                        info!(
                            status = %progress.status,
                            processed = progress.processed,
                            total = progress.total,
                            polls,
                            "polling finished"
                        );
                        return Ok(PollOutcome {
                            last: progress,
                            polls,
                            redirect: self.config.redirect_url.clone(),
                        });
                    }
                    sleep(self.config.interval()).await;
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures > self.config.max_consecutive_errors {
                        return Err(PollError::GaveUp {
                            attempts: failures,
                            last: e.to_string(),
                        });
                    }
                    let delay_ms = e
                        .retry_after_ms()
                        .map(|ms| ms.min(self.config.max_delay_ms))
                        .unwrap_or_else(|| self.config.delay_for_attempt(failures));
                    warn!(
                        attempt = failures,
                        max = self.config.max_consecutive_errors,
                        delay_ms,
                        "poll failed: {e}"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;
    use crate::converter::Converter;
    use crate::error::ConvertError;
    use crate::source::{SourceItem, VecSource};
    use crate::state_machine::ProgressStatus;
    use crate::store::MemoryJobStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn fast() -> PollerConfig {
        PollerConfig {
            interval_ms: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
            max_consecutive_errors: 2,
            redirect_url: Some("https://blog.example.com/wp-admin/admin.php?import=wordpress".into()),
        }
    }

    fn progress(processed: u64, total: u64, status: ProgressStatus) -> Progress {
        Progress {
            processed,
            total,
            status,
            failures: 0,
        }
    }

    struct Scripted {
        replies: Mutex<VecDeque<Result<Progress, PollError>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Progress, PollError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl ProgressSource for Scripted {
        async fn poll(&self) -> Result<Progress, PollError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("polled past the script")
        }
    }

    fn items(n: usize) -> Vec<SourceItem> {
        (1..=n)
            .map(|i| SourceItem {
                id: Some(format!("{i}.post-{i}")),
                title: Some(format!("Post {i}")),
                is_published: Some(false),
                ..SourceItem::default()
            })
            .collect()
    }

    fn busy() -> PollError {
        PollError::Convert(ConvertError::Busy("j".into()))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PollerConfig {
            base_delay_ms: 500,
            max_delay_ms: 3000,
            ..PollerConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), 500);
        assert_eq!(config.delay_for_attempt(2), 1000);
        assert_eq!(config.delay_for_attempt(3), 2000);
        assert_eq!(config.delay_for_attempt(4), 3000);
        assert_eq!(config.delay_for_attempt(60), 3000);
    }

    #[tokio::test]
    async fn polls_until_done() {
        let source = Scripted::new(vec![
            Ok(progress(0, 4, ProgressStatus::Processing)),
            Ok(progress(2, 4, ProgressStatus::Processing)),
            Ok(progress(4, 4, ProgressStatus::Done)),
        ]);
        let mut seen = Vec::new();
        let outcome = Poller::new(fast())
            .run(&source, |p| seen.push(p.percent()))
            .await
            .unwrap();
        assert_eq!(seen, vec![0.0, 50.0, 100.0]);
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.last.status, ProgressStatus::Done);
        assert!(outcome.redirect.unwrap().contains("import=wordpress"));
    }

    #[tokio::test]
    async fn failed_status_also_stops() {
        let source = Scripted::new(vec![Ok(progress(1, 4, ProgressStatus::Failed))]);
        let outcome = Poller::new(fast()).run(&source, |_| {}).await.unwrap();
        assert_eq!(outcome.last.status, ProgressStatus::Failed);
        assert_eq!(outcome.polls, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let source = Scripted::new(vec![
            Err(busy()),
            Err(busy()),
            Ok(progress(1, 2, ProgressStatus::Processing)),
            Err(busy()),
            Ok(progress(2, 2, ProgressStatus::Done)),
        ]);
        let outcome = Poller::new(fast()).run(&source, |_| {}).await.unwrap();
        assert_eq!(outcome.polls, 5);
    }

    #[tokio::test]
    async fn server_retry_after_is_capped() {
        let source = Scripted::new(vec![
            Err(PollError::RateLimited {
                retry_after_ms: u64::MAX,
            }),
            Ok(progress(1, 1, ProgressStatus::Done)),
        ]);
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            Poller::new(fast()).run(&source, |_| {}),
        )
        .await
        .expect("retry-after was not capped")
        .unwrap();
        assert_eq!(outcome.polls, 2);
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_failures() {
        let source = Scripted::new(vec![Err(busy()), Err(busy()), Err(busy())]);
        let err = Poller::new(fast()).run(&source, |_| {}).await.unwrap_err();
        assert!(matches!(err, PollError::GaveUp { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let source = Scripted::new(vec![Err(PollError::Convert(ConvertError::JobNotFound(
            "gone".into(),
        )))]);
        let err = Poller::new(fast()).run(&source, |_| {}).await.unwrap_err();
        assert!(matches!(err, PollError::Convert(ConvertError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn local_source_drives_the_job() {
        let config = ConverterConfig {
            batch_size: 2,
            ..ConverterConfig::default()
        };
        let converter = Converter::new(config, VecSource::new(items(5)), MemoryJobStore::new());
        let endpoint = ProgressEndpoint::new(converter);
        let id = endpoint.converter().create_job("local").unwrap();

        let mut processed = Vec::new();
        let outcome = Poller::new(fast())
            .run(&LocalSource::new(&endpoint, None), |p| processed.push(p.processed))
            .await
            .unwrap();
        assert_eq!(processed, vec![2, 4, 5]);
        assert_eq!(outcome.last.status, ProgressStatus::Done);
        let xml = endpoint.converter().contents(&id).unwrap().unwrap();
        assert_eq!(xml.matches("<item>").count(), 5);
    }

    #[tokio::test]
    async fn http_source_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "processed": 3, "total": 6, "status": "processing"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "processed": 6, "total": 6, "status": "done", "failures": 1
            })))
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), None).unwrap();
        let mut seen = Vec::new();
        let outcome = Poller::new(fast())
            .run(&source, |p| seen.push(p.processed))
            .await
            .unwrap();
        assert_eq!(seen, vec![3, 6]);
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.last.failures, 1);
    }

    /// Serves a real endpoint over HTTP, the way admin-ajax would.
    struct Served(Arc<ProgressEndpoint<VecSource, MemoryJobStore>>);

    impl Respond for Served {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            match self.0.handle_form(&String::from_utf8_lossy(&request.body)) {
                Ok(json) => ResponseTemplate::new(200).set_body_string(json),
                Err(ConvertError::BadRequest(msg)) => ResponseTemplate::new(400).set_body_string(msg),
                Err(ConvertError::JobNotFound(msg)) => {
                    ResponseTemplate::new(404).set_body_string(msg)
                }
                Err(e) => ResponseTemplate::new(500).set_body_string(e.to_string()),
            }
        }
    }

    #[tokio::test]
    async fn http_source_drives_a_served_endpoint() {
        let config = ConverterConfig {
            batch_size: 2,
            ..ConverterConfig::default()
        };
        let endpoint = Arc::new(ProgressEndpoint::new(Converter::new(
            config,
            VecSource::new(items(5)),
            MemoryJobStore::new(),
        )));
        let id = endpoint.converter().create_job("served").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(Served(Arc::clone(&endpoint)))
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), Some(id.clone())).unwrap();
        let mut seen = Vec::new();
        let outcome = Poller::new(fast())
            .run(&source, |p| seen.push(p.processed))
            .await
            .unwrap();
        assert_eq!(seen, vec![2, 4, 5]);
        assert_eq!(outcome.last.status, ProgressStatus::Done);
        assert_eq!(endpoint.converter().report(&id).unwrap().written, 5);
    }
}
