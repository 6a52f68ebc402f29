//! On-demand image builds

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument};

use crate::engine::{ContainerEngine, EngineError};
use crate::sandbox::SandboxError;

/// Makes sure sandbox images exist, building missing ones.
///
/// Builds of the same image are serialized; a caller arriving while a build
/// is running waits for it and then finds the image present.
#[derive(Debug, Default)]
pub struct ImageProvisioner {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImageProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, image: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(image.to_string()).or_default())
    }

    /// Ensure `image` exists, building it from `context` if it does not
    #[instrument(skip(self, engine))]
    pub async fn ensure<E: ContainerEngine>(
        &self,
        engine: &E,
        image: &str,
        context: &Path,
    ) -> Result<(), SandboxError> {
        let lock = self.lock_for(image);
        let _guard = lock.lock().await;

        if engine.image_exists(image).await? {
            debug!("image present");
            return Ok(());
        }

        info!(context = %context.display(), "image missing, building");
        engine
            .build_image(image, context)
            .await
            .map_err(|e| match e {
                EngineError::BuildFailed { image, message } => {
                    SandboxError::ImageBuildFailure { image, message }
                }
                other => SandboxError::ImageBuildFailure {
                    image: image.to_string(),
                    message: other.to_string(),
                },
            })?;
        info!("image built");
        Ok(())
    }
}
