//! Fixed-interval, never-give-up retries for the upstream and sink clients.
use reqwest::StatusCode;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A failed attempt. Every variant is retried the same way.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("unexpected status {status}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response body: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl TransientError {
    /// Response body for the log line, or `n/a` when there is none to show.
    pub fn body(&self) -> &str {
        match self {
            TransientError::Status { body, .. } if !body.trim().is_empty() => body,
            _ => "n/a",
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransientError::Status { status, .. } => Some(*status),
            TransientError::Transport(err) => err.status(),
            TransientError::Malformed(_) => None,
        }
    }
}

/// Returned instead of a result once shutdown has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("watch cancelled")]
pub struct Cancelled;

/// Remote service a client talks to, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    GitHub,
    Discord,
}

impl Service {
    pub fn status_page(&self) -> &'static str {
        match self {
            Service::GitHub => "https://www.githubstatus.com/",
            Service::Discord => "https://discordstatus.com/",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::GitHub => f.write_str("GitHub"),
            Service::Discord => f.write_str("Discord"),
        }
    }
}

/// Retry schedule: a constant pause between attempts and no attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    /// Zero-interval policy for tests.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `attempt` until it succeeds. Only cancellation ends the loop early:
    /// it is checked before every attempt and interrupts the pause between
    /// attempts, but never an attempt already in flight.
    pub async fn run<T, F, Fut>(
        &self,
        service: Service,
        what: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, Cancelled>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransientError>>,
    {
        let mut failures: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            match attempt().await {
                Ok(value) => {
                    if failures > 0 {
                        info!(%service, what, failures, "recovered after failed attempts");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    failures += 1;
                    let status = err
                        .status()
                        .map(|s| format!("{} ({})", s.as_u16(), s.canonical_reason().unwrap_or("unknown")))
                        .unwrap_or_else(|| "n/a".to_string());
                    warn!(
                        %service,
                        what,
                        status = %status,
                        body = err.body(),
                        error = %err,
                        status_page = service.status_page(),
                        wait_secs = self.interval.as_secs(),
                        attempt = failures,
                        "something went wrong with the {} API; blocking before trying again",
                        service
                    );
                    cooldown(cancel, self.interval).await?;
                }
            }
        }
    }
}

/// Sleep for `duration` unless cancellation arrives first.
pub async fn cooldown(cancel: &CancellationToken, duration: Duration) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn server_error() -> TransientError {
        TransientError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_fixed_spacing() {
        let policy = RetryPolicy::fixed(Duration::from_secs(300));
        let cancel = CancellationToken::new();
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));

        let log = calls.clone();
        let result = policy
            .run(Service::GitHub, "list", &cancel, || {
                let log = log.clone();
                async move {
                    let mut guard = log.lock().unwrap();
                    guard.push(Instant::now());
                    if guard.len() <= 3 {
                        Err(server_error())
                    } else {
                        Ok(guard.len())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(4));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_outage_wait() {
        let policy = RetryPolicy::fixed(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let counter = attempts.clone();
        let started = Instant::now();
        let result: Result<(), Cancelled> = policy
            .run(Service::Discord, "deliver", &cancel, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn already_cancelled_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicUsize::new(0);
        let result: Result<(), Cancelled> = RetryPolicy::immediate()
            .run(Service::GitHub, "list", &cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn body_falls_back_to_na() {
        assert_eq!(server_error().body(), "n/a");
        let err = TransientError::Status {
            status: StatusCode::NOT_FOUND,
            body: "{\"message\":\"Not Found\"}".into(),
        };
        assert_eq!(err.body(), "{\"message\":\"Not Found\"}");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }
}
