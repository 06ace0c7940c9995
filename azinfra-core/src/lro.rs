//! Long-running operations.
//!
//! Every create call against the control plane answers with a handle that has to be polled
//! until it reaches a terminal state. [`Poller`] owns that loop; the transport specific part
//! (what to GET, how to read the status) lives behind [`Operation`].

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CloudError;

/// Outcome of a single status check.
#[derive(Debug)]
pub enum PollStatus<T> {
    InProgress {
        /// Provider requested delay before the next check.
        retry_after: Option<Duration>,
    },
    Succeeded(T),
}

/// One status check of an in-flight operation. A terminal failure is reported as `Err`.
#[async_trait]
pub trait Operation<T>: Send {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError>;
}

enum State<T> {
    Ready(T),
    Pending(Box<dyn Operation<T>>),
}

pub struct Poller<T> {
    state: State<T>,
    interval: Duration,
    fixed_interval: bool,
}

impl<T: Send + 'static> Poller<T> {
    pub fn new(operation: impl Operation<T> + 'static, default_interval: Duration) -> Self {
        Self {
            state: State::Pending(Box::new(operation)),
            interval: default_interval,
            fixed_interval: false,
        }
    }

    /// An operation that already finished.
    pub fn ready(value: T) -> Self {
        Self {
            state: State::Ready(value),
            interval: Duration::ZERO,
            fixed_interval: false,
        }
    }

    /// Poll at `interval` regardless of what the provider asks for.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.fixed_interval = true;
        self
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Blocks until the operation succeeds, fails, or `cancel` fires.
    pub async fn await_terminal(self, cancel: &CancellationToken) -> Result<T, CloudError> {
        let mut operation = match self.state {
            State::Ready(value) => return Ok(value),
            State::Pending(operation) => operation,
        };

        loop {
            let status = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CloudError::Cancelled),
                status = operation.poll() => status?,
            };

            let retry_after = match status {
                PollStatus::Succeeded(value) => return Ok(value),
                PollStatus::InProgress { retry_after } => retry_after,
            };

            let delay = if self.fixed_interval {
                self.interval
            } else {
                retry_after.unwrap_or(self.interval)
            };
            trace!(?delay, "operation still in progress");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CloudError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl<T> std::fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Ready(_) => "ready",
            State::Pending(_) => "pending",
        };
        f.debug_struct("Poller")
            .field("state", &state)
            .field("interval", &self.interval)
            .field("fixed_interval", &self.fixed_interval)
            .finish()
    }
}
