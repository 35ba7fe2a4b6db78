//! Readiness polling.
//!
//! The health check is polled until it succeeds or the [`WaitToken`] fires.
//! Explicit cancellation and the configured deadline are folded into the same
//! token; whichever fires first decides the error. A failing check never
//! determines the outcome on its own, it is only retried.

use crate::container::{BoxError, BoxFuture, Container, ContainerError, Protocol, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Readiness predicate. Called with a token that fires together with the
/// wait, and a clone of the container under test.
pub type HealthCheckFn = Arc<
    dyn Fn(CancellationToken, Container) -> BoxFuture<'static, std::result::Result<(), BoxError>>
        + Send
        + Sync,
>;

/// Wrap an async closure into a [`HealthCheckFn`].
pub fn health_check<F, Fut>(check: F) -> HealthCheckFn
where
    F: Fn(CancellationToken, Container) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    Arc::new(
        move |token: CancellationToken,
              container: Container|
              -> BoxFuture<'static, std::result::Result<(), BoxError>> {
            Box::pin(check(token, container))
        },
    )
}

/// Health check used when none is configured: every TCP port accepts a
/// connection.
pub fn tcp_health_check() -> HealthCheckFn {
    health_check(|_token, container: Container| async move {
        for binding in container.ports.iter() {
            if binding.protocol != Protocol::Tcp {
                continue;
            }
            TcpStream::connect(binding.address()).await?;
        }
        Ok::<(), BoxError>(())
    })
}

/// Cancellation token combined with an optional deadline.
#[derive(Debug, Clone)]
pub struct WaitToken {
    caller: CancellationToken,
    combined: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl WaitToken {
    /// Token that fires on `caller` cancellation or once `timeout` elapsed
    /// from now.
    pub fn new(caller: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            combined: caller.child_token(),
            caller,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
        }
    }

    /// Token observing both cancellation and the deadline, handed to callbacks.
    ///
    /// It is cancelled once [`WaitToken::fired`] observed the deadline.
    pub fn cancellation(&self) -> CancellationToken {
        self.combined.clone()
    }

    /// Whether cancellation or the deadline already happened.
    pub fn is_fired(&self) -> bool {
        self.caller.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token fires.
    pub async fn fired(&self) {
        tokio::select! {
            biased;
            _ = self.caller.cancelled() => {}
            _ = sleep_until(self.deadline) => {}
        }
        self.combined.cancel();
    }

    /// The error describing why the token fired.
    ///
    /// Explicit cancellation wins over an elapsed deadline.
    pub fn error(&self, last_error: Option<String>) -> ContainerError {
        if self.caller.is_cancelled() {
            ContainerError::Cancelled
        } else {
            ContainerError::HealthCheckTimeout {
                timeout: self.timeout.unwrap_or_default(),
                last_error,
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Polls a health check until it passes or the wait token fires.
pub struct HealthCheckCoordinator {
    interval: Duration,
}

impl HealthCheckCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Wait until `check` passes for `container`.
    ///
    /// Success returns immediately. A failed attempt is followed by a pause of
    /// one interval. The token is observed before, during and after every
    /// attempt, so firing aborts the wait within one in-flight check plus one
    /// interval.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Cancelled`] or
    /// [`ContainerError::HealthCheckTimeout`] when the token fires.
    pub async fn wait_until_ready(
        &self,
        container: &Container,
        check: &HealthCheckFn,
        token: &WaitToken,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        let mut last_error: Option<String> = None;

        loop {
            if token.is_fired() {
                token.combined.cancel();
                return Err(token.error(last_error));
            }

            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = token.fired() => return Err(token.error(last_error)),
                outcome = check(token.cancellation(), container.clone()) => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!(
                        container_id = %container.id,
                        attempts = attempt,
                        "Container is ready"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        container_id = %container.id,
                        attempt,
                        error = %e,
                        "Health check failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            tokio::select! {
                biased;
                _ = token.fired() => return Err(token.error(last_error)),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
