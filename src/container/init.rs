//! Post-readiness init hook.

use crate::container::lifecycle::short_id;
use crate::container::{BoxError, BoxFuture, Container, ContainerError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One-shot setup callback, run once the container passed its health check.
pub type InitFn = Arc<
    dyn Fn(CancellationToken, Container) -> BoxFuture<'static, std::result::Result<(), BoxError>>
        + Send
        + Sync,
>;

/// Wrap an async closure into an [`InitFn`].
pub fn init_fn<F, Fut>(init: F) -> InitFn
where
    F: Fn(CancellationToken, Container) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    Arc::new(
        move |token: CancellationToken,
              container: Container|
              -> BoxFuture<'static, std::result::Result<(), BoxError>> {
            Box::pin(init(token, container))
        },
    )
}

/// Run `init` exactly once against a ready container.
///
/// # Errors
///
/// Returns [`ContainerError::InitHook`] wrapping the callback's own error.
pub async fn run_init_hook(
    token: CancellationToken,
    container: &Container,
    init: &InitFn,
) -> Result<()> {
    debug!(container_id = %short_id(&container.id), "Running init hook");

    init(token, container.clone()).await.map_err(|e| {
        warn!(container_id = %short_id(&container.id), error = %e, "Init hook failed");
        ContainerError::InitHook(e)
    })
}
