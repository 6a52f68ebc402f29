//! Sandbox creation and recovery
//!
//! Recreation is the only cleanup primitive: the old container is removed
//! outright and a new one started from the image, so no process or file from
//! an earlier run survives.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::sandbox::{
    ImageProvisioner, Lease, RecycleStart, RecycleTicket, SandboxError, SandboxRegistry,
};

/// Interval between running-state checks after a start
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct Lifecycle<E> {
    engine: Arc<E>,
    config: Arc<Config>,
    provisioner: ImageProvisioner,
}

impl<E: ContainerEngine> Lifecycle<E> {
    pub fn new(engine: Arc<E>, config: Arc<Config>) -> Self {
        Self {
            engine,
            config,
            provisioner: ImageProvisioner::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Replace a language's container with a fresh, running one.
    ///
    /// Safe to call whether or not a container currently exists. Returns the
    /// new container's engine handle.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, language: &str) -> Result<String, SandboxError> {
        let lang = self
            .config
            .get_language(language)
            .map_err(|_| SandboxError::NotRegistered(language.to_string()))?;
        let name = self.config.sandbox_name(language);
        let context = self.config.build_context(language, lang);

        self.provisioner
            .ensure(self.engine.as_ref(), &lang.image, &context)
            .await?;

        self.engine.remove_container(&name).await?;

        let spec = ContainerSpec::sandbox(&name, &lang.image, &self.config.working_dir);
        let handle = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| SandboxError::ContainerStartFailure {
                name: name.clone(),
                message: e.to_string(),
            })?;

        self.engine
            .start_container(&name)
            .await
            .map_err(|e| SandboxError::ContainerStartFailure {
                name: name.clone(),
                message: e.to_string(),
            })?;
        self.wait_running(&name).await?;

        info!(%name, %handle, "sandbox ready");
        Ok(handle)
    }

    /// Poll until the container reports running, within the start timeout
    async fn wait_running(&self, name: &str) -> Result<(), SandboxError> {
        let limit = self.config.start_wait();
        let deadline = Instant::now() + limit;

        loop {
            match self.engine.inspect_container(name).await? {
                Some(status) if status.running => return Ok(()),
                Some(_) => debug!(name, "waiting for container to run"),
                None => {
                    return Err(SandboxError::ContainerStartFailure {
                        name: name.to_string(),
                        message: "container disappeared after start".to_string(),
                    });
                }
            }

            if Instant::now() + START_POLL_INTERVAL > deadline {
                return Err(SandboxError::ContainerStartFailure {
                    name: name.to_string(),
                    message: format!("not running within {limit:?}"),
                });
            }
            sleep(START_POLL_INTERVAL).await;
        }
    }

    /// Make sure a leased sandbox has a running container, rebuilding it if not.
    ///
    /// On failure the lease is left in place; dropping it marks the sandbox
    /// for a rebuild on next use.
    #[instrument(skip(self, lease), fields(language = lease.language()))]
    pub async fn ensure_ready(&self, lease: &Lease) -> Result<String, SandboxError> {
        if let Some(handle) = lease.handle() {
            let name = self.config.sandbox_name(lease.language());
            match self.engine.inspect_container(&name).await? {
                Some(status) if status.running && status.id == handle => return Ok(handle),
                Some(status) if status.running => {
                    debug!(%name, "container replaced outside the registry");
                }
                _ => info!(%name, "container not running, recreating"),
            }
        }

        let handle = self.rebuild(lease.language()).await?;
        lease.attach(handle.clone());
        Ok(handle)
    }

    /// Recreate after a failed or overrun execution.
    ///
    /// Does nothing if the lease was already revoked by a stop request, since
    /// the stopper performs the recreation.
    pub async fn recycle(&self, lease: Lease) -> Result<(), SandboxError> {
        match lease.recycle() {
            RecycleStart::Started(ticket) => self.complete(ticket).await,
            RecycleStart::InProgress | RecycleStart::Stale => {
                debug!("recovery already owned by a stop request");
                Ok(())
            }
        }
    }

    /// Force-recreate a language's sandbox, interrupting any execution.
    ///
    /// Returns once the sandbox is idle again. A concurrent caller joins the
    /// recreation already underway instead of starting another.
    #[instrument(skip(self, registry))]
    pub async fn stop(
        &self,
        registry: &SandboxRegistry,
        language: &str,
    ) -> Result<(), SandboxError> {
        match registry.begin_recycle(language)? {
            RecycleStart::Started(ticket) => {
                info!("stopping sandbox");
                self.complete(ticket).await
            }
            RecycleStart::InProgress | RecycleStart::Stale => {
                debug!("recreation already underway, waiting for it");
                registry
                    .wait_settled(language, self.config.acquire_wait())
                    .await
            }
        }
    }

    /// Rebuild under a recycle ticket, one attempt only
    async fn complete(&self, ticket: RecycleTicket) -> Result<(), SandboxError> {
        match self.rebuild(ticket.language()).await {
            Ok(handle) => {
                ticket.finish(Some(handle));
                Ok(())
            }
            Err(e) => {
                warn!(language = ticket.language(), error = %e, "sandbox recreation failed");
                ticket.finish(None);
                Err(e)
            }
        }
    }

    /// Adopt containers that are already running under the registry's names.
    ///
    /// Returns how many sandboxes were adopted.
    #[instrument(skip(self, registry))]
    pub async fn sync(&self, registry: &SandboxRegistry) -> Result<usize, SandboxError> {
        let mut adopted = 0;
        for language in registry.languages() {
            let name = self.config.sandbox_name(language);
            let handle = match self.engine.inspect_container(&name).await? {
                Some(status) if status.running => Some(status.id),
                Some(_) => {
                    debug!(%name, "found stopped container, will recreate on use");
                    None
                }
                None => None,
            };
            let found = handle.is_some();
            if registry.adopt(language, handle)? && found {
                adopted += 1;
            }
        }
        info!(adopted, "registry synchronized with engine");
        Ok(adopted)
    }
}
