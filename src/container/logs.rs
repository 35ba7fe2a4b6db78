//! Container log relay.
//!
//! When the caller supplies a sink, a single background task copies the
//! container's combined output into it for the container's lifetime. Teardown
//! drains the relay after the container stopped, so everything the container
//! wrote before stopping has reached the sink when `stop` returns.

use crate::container::ContainerRuntime;
use crate::container::lifecycle::short_id;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination for combined container output.
pub type LogSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Copies container output into a sink until the stream ends.
#[derive(Debug)]
pub struct LogRelay {
    container_id: String,
    task: Option<JoinHandle<u64>>,
    stop: CancellationToken,
}

impl LogRelay {
    /// A relay that does nothing.
    pub fn disabled() -> Self {
        Self {
            container_id: String::new(),
            task: None,
            stop: CancellationToken::new(),
        }
    }

    /// Start relaying output of `container_id` into `sink`.
    ///
    /// Without a sink this returns [`LogRelay::disabled`].
    pub fn attach(
        runtime: &Arc<dyn ContainerRuntime>,
        container_id: &str,
        sink: Option<LogSink>,
    ) -> Self {
        let Some(mut sink) = sink else {
            return Self::disabled();
        };

        let mut stream = runtime.logs(container_id);
        let stop = CancellationToken::new();
        let loop_stop = stop.clone();
        let id = container_id.to_string();

        let task = tokio::spawn(async move {
            let mut copied = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = loop_stop.cancelled() => break,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        if let Err(e) = sink.write_all(&chunk).await {
                            warn!(container_id = %short_id(&id), error = %e, "Log sink rejected output");
                            break;
                        }
                        copied += chunk.len() as u64;
                    }
                    Some(Err(e)) => {
                        warn!(container_id = %short_id(&id), error = %e, "Log stream failed");
                        break;
                    }
                    None => break,
                }
            }

            if let Err(e) = sink.flush().await {
                debug!(container_id = %short_id(&id), error = %e, "Failed to flush log sink");
            }
            copied
        });

        debug!(container_id = %short_id(container_id), "Attached log relay");

        Self {
            container_id: container_id.to_string(),
            task: Some(task),
            stop,
        }
    }

    /// Whether a copy loop is running or waiting to be drained.
    pub fn is_attached(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the copy loop to reach end of stream.
    ///
    /// If the stream does not end within `bound` the loop is cancelled. A
    /// second drain is a no-op.
    pub async fn drain(&mut self, bound: Duration) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        let id = short_id(&self.container_id);
        match tokio::time::timeout(bound, &mut task).await {
            Ok(Ok(copied)) => debug!(container_id = %id, bytes = copied, "Log relay drained"),
            Ok(Err(e)) => warn!(container_id = %id, error = %e, "Log relay task failed"),
            Err(_) => {
                warn!(
                    container_id = %id,
                    "Log stream did not end within {:?}, cancelling relay", bound
                );
                self.stop.cancel();
                if let Err(e) = task.await {
                    warn!(container_id = %id, error = %e, "Log relay task failed");
                }
            }
        }
    }

    /// Stop copying without waiting for end of stream.
    pub fn cancel(&mut self) {
        self.stop.cancel();
        self.task = None;
    }
}
