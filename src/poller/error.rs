//! Tipos de erro do cliente de polling.
//!
//! Define [`PollError`] com variantes para rate limiting, erros HTTP,
//! respostas malformadas e erros do conversor local. Usa `thiserror` para
//! derivar `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

use crate::error::ConvertError;

/// Erros que podem ocorrer ao consultar o progresso de um job.
#[derive(Debug, Error)]
pub enum PollError {
    /// O servidor retornou HTTP 429.
    /// O campo `retry_after_ms` indica quantos milissegundos esperar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outra resposta HTTP sem sucesso (4xx/5xx).
    #[error("endpoint error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// O corpo da resposta não é um snapshot de progresso.
    #[error("malformed progress response: {0}")]
    Malformed(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Erro do conversor quando o progresso é consultado localmente.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// Muitas falhas transitórias seguidas.
    #[error("gave up after {attempts} consecutive failures: {last}")]
    GaveUp { attempts: u32, last: String },
}

impl PollError {
    /// Se vale a pena tentar de novo após uma espera.
    pub fn is_transient(&self) -> bool {
        match self {
            PollError::RateLimited { .. } | PollError::Network(_) => true,
            PollError::Status { status, .. } => *status >= 500,
            PollError::Convert(e) => e.is_retryable(),
            PollError::Malformed(_) | PollError::GaveUp { .. } => false,
        }
    }

    /// Espera sugerida pelo servidor, quando houver.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PollError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = PollError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
        assert_eq!(err.retry_after_ms(), Some(5000));
    }

    #[test]
    fn status_display() {
        let err = PollError::Status {
            status: 403,
            message: "-1".into(),
        };
        assert_eq!(err.to_string(), "endpoint error (status 403): -1");
    }

    #[test]
    fn transient_classification() {
        let server = PollError::Status {
            status: 502,
            message: String::new(),
        };
        let client = PollError::Status {
            status: 400,
            message: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(PollError::Convert(ConvertError::Busy("j".into())).is_transient());
        assert!(!PollError::Convert(ConvertError::JobNotFound("j".into())).is_transient());
        assert!(!PollError::Malformed("0".into()).is_transient());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PollError>();
    }
}
