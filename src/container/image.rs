//! Image acquisition.
//!
//! Decides whether an image has to be pulled or a local copy can be reused.
//! A failed pull is never papered over with a possibly stale local image; the
//! local store is only consulted when the caller asked for it.

use crate::container::{ContainerError, ContainerRuntime, RegistryCredential, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Pull-or-reuse policy for images.
pub struct ImageAcquisition {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageAcquisition {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Make sure `image` is available to the runtime.
    ///
    /// With `prefer_local` set and the image present locally, no pull happens.
    /// Otherwise the image is pulled with `credential`; an absent or empty
    /// credential means an anonymous pull.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ImageAcquisition`] if the local lookup or the
    /// pull fails.
    pub async fn ensure(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        prefer_local: bool,
    ) -> Result<()> {
        let failed = |source| ContainerError::ImageAcquisition {
            image: image.to_string(),
            source,
        };

        if prefer_local {
            if self.runtime.image_exists(image).await.map_err(failed)? {
                debug!(image = %image, "Image already exists locally, skipping pull");
                return Ok(());
            }
            debug!(image = %image, "Image not found locally");
        }

        let credential = credential.filter(|c| !c.is_anonymous());
        info!(
            image = %image,
            authenticated = credential.is_some(),
            "Pulling image"
        );

        self.runtime
            .pull_image(image, credential)
            .await
            .map_err(failed)?;

        info!(image = %image, "Successfully pulled image");
        Ok(())
    }
}

/// Add the implicit `latest` tag to references that carry neither a tag nor a
/// digest.
pub fn normalize_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }

    let last_component = image.rsplit('/').next().unwrap_or(image);
    if last_component.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
