use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::ProgressSource;
use super::error::PollError;
use crate::endpoint::PROGRESS_ACTION;
use crate::state_machine::Progress;

/// Polls a remote progress endpoint with form-encoded POSTs.
pub struct HttpProgressSource {
    client: Client,
    url: String,
    job_id: Option<String>,
}

impl HttpProgressSource {
    /// Without `job_id` the endpoint reports its active job.
    pub fn new(url: impl Into<String>, job_id: Option<String>) -> Result<Self, PollError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            job_id,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Progress, PollError> {
        let mut form = vec![("action", PROGRESS_ACTION)];
        if let Some(id) = &self.job_id {
            form.push(("job_id", id.as_str()));
        }
        let response = self.client.post(&self.url).form(&form).send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000);
            return Err(PollError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(PollError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let progress: Progress = serde_json::from_str(&body)
            .map_err(|e| PollError::Malformed(format!("{e}: {}", preview(&body))))?;
        debug!(url = %self.url, processed = progress.processed, total = progress.total, "polled");
        Ok(progress)
    }
}

impl ProgressSource for HttpProgressSource {
    async fn poll(&self) -> Result<Progress, PollError> {
        self.fetch().await
    }
}

fn preview(body: &str) -> String {
    const MAX: usize = 120;
    match body.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ProgressStatus;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot(processed: u64, total: u64, status: &str) -> serde_json::Value {
        serde_json::json!({ "processed": processed, "total": total, "status": status })
    }

    #[tokio::test]
    async fn posts_action_and_parses_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-admin/admin-ajax.php"))
            .and(body_string_contains("action=substack_progress"))
            .and(body_string_contains("job_id=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot(2, 5, "processing")))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(
            format!("{}/wp-admin/admin-ajax.php", server.uri()),
            Some("abc".into()),
        )
        .unwrap();
        let progress = source.fetch().await.unwrap();
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.total, 5);
        assert_eq!(progress.status, ProgressStatus::Processing);
        assert_eq!(progress.failures, 0);
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), None).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, PollError::RateLimited { retry_after_ms: 3000 }));
    }

    #[tokio::test]
    async fn huge_retry_after_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "18446744073709551615"),
            )
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), None).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.retry_after_ms(), Some(u64::MAX));
    }

    #[tokio::test]
    async fn error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("-1"))
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), None).unwrap();
        match source.fetch().await.unwrap_err() {
            PollError::Status { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0"))
            .mount(&server)
            .await;

        let source = HttpProgressSource::new(server.uri(), None).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, PollError::Malformed(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn preview_truncates_long_bodies() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(500);
        assert_eq!(preview(&long).len(), 123);
    }
}
