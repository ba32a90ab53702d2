use std::sync::Arc;

use anyhow::Context;
use hearth_process::{MultiplexerState, ResourceId};

use crate::{
    action_lock::ActionLocks,
    config::ConsoleConfig,
    error::{ConsoleError, ConsoleResult},
    launcher::ProcessLauncher,
    multiplexer::{Multiplexer, TeardownContext},
    registry::Registry,
    session::ProcessSession,
    store::ResourceStore,
    viewer::ViewerOptions,
    webhook::WebhookRelay,
};

/// Process-wide console context: the resource registry, per-resource action
/// locks and the collaborators every multiplexer needs.
#[derive(Clone)]
pub struct ConsoleHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    registry: Registry,
    locks: ActionLocks,
    launcher: Arc<dyn ProcessLauncher>,
    store: Arc<dyn ResourceStore>,
    config: ConsoleConfig,
    http: reqwest::Client,
}

impl ConsoleHub {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        store: Arc<dyn ResourceStore>,
        config: ConsoleConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.webhook.request_timeout)
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build webhook http client")?;
        Ok(Self {
            inner: Arc::new(HubInner {
                registry: Registry::default(),
                locks: ActionLocks::new(),
                launcher,
                store,
                config,
                http,
            }),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.inner.config
    }

    /// The live multiplexer for `id`, if any.
    pub fn attached(&self, id: ResourceId) -> Option<Arc<Multiplexer>> {
        self.inner.registry.get(id)
    }

    pub fn attached_ids(&self) -> Vec<ResourceId> {
        self.inner.registry.ids()
    }

    /// Returns the resource's multiplexer, attaching to the running process
    /// on first use. Concurrent callers for one resource get the same
    /// multiplexer.
    pub async fn attach(&self, id: ResourceId) -> ConsoleResult<Arc<Multiplexer>> {
        if let Some(mux) = self.inner.registry.get(id) {
            return Ok(mux);
        }

        let lock = self.inner.locks.get(id);
        let _guard = lock.lock().await;
        if let Some(mux) = self.inner.registry.get(id) {
            return Ok(mux);
        }

        let session = self
            .inner
            .launcher
            .attach_existing(id)
            .await
            .map_err(|source| ConsoleError::Attach { id, source })?;
        Ok(self.install(id, session).await)
    }

    pub async fn start_resource(&self, id: ResourceId) -> ConsoleResult<()> {
        let lock = self.inner.locks.get(id);
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    pub async fn stop_resource(&self, id: ResourceId) -> ConsoleResult<()> {
        let lock = self.inner.locks.get(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    /// Stop then start under one lock acquisition. A failed stop is logged
    /// and the start still runs; it fails on its own if the old console
    /// never went away.
    pub async fn restart_resource(&self, id: ResourceId) -> ConsoleResult<()> {
        let lock = self.inner.locks.get(id);
        let _guard = lock.lock().await;
        if let Err(error) = self.stop_locked(id).await {
            tracing::warn!(resource = %id, %error, "stop during restart failed");
        }
        self.start_locked(id).await
    }

    /// Starts the webhook relay for an attached resource if its integration
    /// is active. Returns whether a relay is running afterwards.
    pub async fn enable_integration(&self, id: ResourceId) -> ConsoleResult<bool> {
        let mux = self
            .inner
            .registry
            .get(id)
            .ok_or(ConsoleError::NotAttached(id))?;
        self.start_relay(&mux).await
    }

    /// Stops the resource's webhook relay. Returns false if none was running.
    pub async fn disable_integration(&self, id: ResourceId) -> bool {
        match self.inner.registry.get(id) {
            Some(mux) => mux.remove_relay().await,
            None => false,
        }
    }

    async fn start_locked(&self, id: ResourceId) -> ConsoleResult<()> {
        if self.inner.registry.get(id).is_some() {
            return Err(ConsoleError::AlreadyRunning(id));
        }

        let params = self
            .inner
            .store
            .launch_params(id)
            .await
            .map_err(|source| ConsoleError::Launch { id, source })?;

        // Written before the pumps exist, so teardown's `false` always lands
        // after it.
        self.inner
            .store
            .set_running(id, true)
            .await
            .map_err(|source| ConsoleError::Persist { id, source })?;

        let session = match self.inner.launcher.launch(id, &params).await {
            Ok(session) => session,
            Err(source) => {
                if let Err(error) = self.inner.store.set_running(id, false).await {
                    tracing::warn!(resource = %id, %error, "failed to roll back running state");
                }
                return Err(ConsoleError::Launch { id, source });
            }
        };
        self.install(id, session).await;
        tracing::info!(resource = %id, "resource started");
        Ok(())
    }

    async fn stop_locked(&self, id: ResourceId) -> ConsoleResult<()> {
        let mux = self.inner.registry.get(id);

        self.inner
            .launcher
            .terminate(id)
            .await
            .map_err(|source| ConsoleError::Terminate { id, source })?;

        if let Some(mux) = mux {
            let timeout = self.inner.config.stop_timeout;
            if !mux.wait_gone(timeout).await {
                tracing::warn!(resource = %id, "console still open after stop, forcing teardown");
                mux.shutdown();
                if !mux.wait_gone(timeout).await {
                    return Err(ConsoleError::StopTimeout(id));
                }
            }
        }

        self.inner
            .store
            .set_running(id, false)
            .await
            .map_err(|source| ConsoleError::Persist { id, source })?;
        tracing::info!(resource = %id, "resource stopped");
        Ok(())
    }

    async fn install(&self, id: ResourceId, session: ProcessSession) -> Arc<Multiplexer> {
        let ctx = TeardownContext {
            launcher: self.inner.launcher.clone(),
            store: self.inner.store.clone(),
            registry: self.inner.registry.clone(),
        };
        let mux = Multiplexer::spawn(id, session, self.inner.config.clone(), ctx);
        if let Err(error) = self.start_relay(&mux).await {
            tracing::warn!(resource = %id, %error, "webhook relay not started");
        }
        mux
    }

    async fn start_relay(&self, mux: &Arc<Multiplexer>) -> ConsoleResult<bool> {
        let id = mux.id();
        let target = self
            .inner
            .store
            .integration_config(id)
            .await
            .map_err(|source| ConsoleError::Persist { id, source })?;
        let Some(target) = target.filter(|t| t.active && !t.endpoint.trim().is_empty()) else {
            return Ok(mux.has_relay().await);
        };

        let webhook = &self.inner.config.webhook;
        let options = ViewerOptions {
            no_repeat: true,
            stdout_capacity: webhook.stdout_queue,
            stderr_capacity: webhook.stderr_queue,
        };
        if let Some(session) = mux.install_relay(options).await? {
            let relay = WebhookRelay::new(
                mux.clone(),
                session,
                target,
                self.inner.http.clone(),
                webhook.clone(),
            );
            tokio::spawn(relay.run());
        }
        Ok(mux.state() == MultiplexerState::Running)
    }
}
