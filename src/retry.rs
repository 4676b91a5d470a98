use std::{
    fmt,
    future::Future,
    time::Duration,
};
use tokio::time;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_DELAY_CAP: Duration = Duration::from_secs(10);
pub const DEFAULT_TRANSPORT_STEP: Duration = Duration::from_secs(1);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub enum RequestError {
    Status { code: u16, body: String },
    Network(String),
    Timeout(Duration),
    MalformedPayload(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Status { code, body } => {
                if body.is_empty() {
                    write!(f, "server responded with status {code}")
                } else {
                    write!(f, "server responded with status {code}: {body}")
                }
            }
            RequestError::Network(msg) => write!(f, "network error: {msg}"),
            RequestError::Timeout(limit) => {
                write!(f, "request exceeded {}s timeout", limit.as_secs())
            }
            RequestError::MalformedPayload(msg) => {
                write!(f, "malformed response payload: {msg}")
            }
        }
    }
}

impl std::error::Error for RequestError {}

fn status_is_transient(code: u16) -> bool {
    code == 500
}

/// One policy per call site; never shared or mutated across operations.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub delay_cap: Duration,
    pub transport_step: Duration,
    pub attempt_timeout: Duration,
    pub retryable_status: fn(u16) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            delay_cap: DEFAULT_DELAY_CAP,
            transport_step: DEFAULT_TRANSPORT_STEP,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retryable_status: status_is_transient,
        }
    }
}

impl RetryPolicy {
    // attempt is zero-based: the delay scheduled after the (attempt+1)-th failure.
    pub fn server_delay(&self, attempt: u32) -> Duration {
        let shifted = self
            .base_delay
            .checked_mul(1u32 << attempt.min(16))
            .unwrap_or(self.delay_cap);
        shifted.min(self.delay_cap)
    }

    pub fn transport_delay(&self, attempt: u32) -> Duration {
        self.transport_step.saturating_mul(attempt + 1)
    }

    fn delay_for(&self, err: &RequestError, attempt: u32) -> Duration {
        match err {
            RequestError::Status { code, .. } if (self.retryable_status)(*code) => {
                self.server_delay(attempt)
            }
            _ => self.transport_delay(attempt),
        }
    }
}

#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last_error: RequestError,
}

impl fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "giving up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for RetryFailure {}

/// Runs `op` until it succeeds or the policy's attempt cap is exhausted.
/// Each attempt is bounded by `attempt_timeout`; an attempt that overruns it
/// is dropped and counted as a transport failure. Dropping the returned
/// future cancels the in-flight attempt and any pending backoff sleep.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match time::timeout(policy.attempt_timeout, op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RequestError::Timeout(policy.attempt_timeout)),
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= policy.max_attempts {
            return Err(RetryFailure {
                attempts: attempt,
                last_error: err,
            });
        }
        let delay = policy.delay_for(&err, attempt - 1);
        tracing::warn!(
            error = %err,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "request failed; retrying"
        );
        time::sleep(delay).await;
    }
}
