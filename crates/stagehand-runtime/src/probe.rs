use crate::backend::RuntimeBackend;
use crate::RuntimeError;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with linear back-off: attempt `n` (1-based) that fails is
/// followed by a sleep of `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub fn retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let attempts = self.attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last = e.to_string();
                    if attempt < attempts {
                        let delay = self.delay_after(attempt);
                        warn!("{what} not ready (attempt {attempt}/{attempts}): {e}; retrying in {delay:?}");
                        thread::sleep(delay);
                    }
                }
            }
        }
        Err(RuntimeError::Unreachable {
            what: what.to_owned(),
            attempts,
            last,
        })
    }
}

/// Run `argv` until it exits successfully or the policy is exhausted.
pub fn probe(
    backend: &dyn RuntimeBackend,
    argv: &[String],
    policy: &RetryPolicy,
) -> Result<(), RuntimeError> {
    let what = argv.first().map_or("probe", String::as_str);
    policy.retry(what, || backend.run_checked(argv).map(|_| ()))
}
