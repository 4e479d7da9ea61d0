use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Outbound HTTP failure (spec index lookups, OpenAPI document fetches)
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {0}")]
    Status(StatusCode),
    #[error("request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(e) => e.status(),
            Self::Status(status) => Some(*status),
            Self::Timeout(_) => None,
        }
    }
}

/// Whether a failure is worth retrying
///
/// ## Transient (returns true):
/// - Connection failures (refused, DNS)
/// - Timeouts
/// - HTTP 5xx
///
/// ## Not transient (returns false):
/// - HTTP 4xx, including 404 from the index
/// - Body decoding errors
pub fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Http(e) => {
            if e.is_connect() || e.is_timeout() {
                return true;
            }
            e.status().is_some_and(|status| status.is_server_error())
        }
        FetchError::Status(status) => status.is_server_error(),
        FetchError::Timeout(_) => true,
    }
}

/// Run `request_fn` with a per-attempt timeout, retrying transient failures
///
/// Makes at most `max_retries + 1` attempts with exponential backoff
/// starting at 100ms.
pub async fn execute_with_retry<F, Fut, T>(
    operation: &str,
    max_retries: u32,
    attempt_timeout: Duration,
    request_fn: F,
) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match timeout(attempt_timeout, request_fn()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(attempt_timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && is_transient(&e) => {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                tracing::warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
