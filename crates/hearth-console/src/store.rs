use std::collections::HashMap;

use hearth_process::{IntegrationConfig, LaunchParams, ResourceId};
use tokio::sync::Mutex;

/// Persistence the console core needs from the outside world.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    async fn set_running(&self, id: ResourceId, running: bool) -> anyhow::Result<()>;

    async fn integration_config(&self, id: ResourceId)
    -> anyhow::Result<Option<IntegrationConfig>>;

    async fn launch_params(&self, id: ResourceId) -> anyhow::Result<LaunchParams>;
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRecord {
    pub running: bool,
    pub params: LaunchParams,
    pub integration: Option<IntegrationConfig>,
}

/// Map-backed store. Unknown resources read as stopped with no params.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<ResourceId, ResourceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = (ResourceId, ResourceRecord)>) -> Self {
        Self {
            inner: Mutex::new(records.into_iter().collect()),
        }
    }

    pub async fn running(&self, id: ResourceId) -> bool {
        self.inner
            .lock()
            .await
            .get(&id)
            .is_some_and(|r| r.running)
    }

    pub async fn set_integration(&self, id: ResourceId, integration: Option<IntegrationConfig>) {
        self.inner.lock().await.entry(id).or_default().integration = integration;
    }

    pub async fn snapshot(&self) -> HashMap<ResourceId, ResourceRecord> {
        self.inner.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn set_running(&self, id: ResourceId, running: bool) -> anyhow::Result<()> {
        self.inner.lock().await.entry(id).or_default().running = running;
        Ok(())
    }

    async fn integration_config(
        &self,
        id: ResourceId,
    ) -> anyhow::Result<Option<IntegrationConfig>> {
        Ok(self
            .inner
            .lock()
            .await
            .get(&id)
            .and_then(|r| r.integration.clone()))
    }

    async fn launch_params(&self, id: ResourceId) -> anyhow::Result<LaunchParams> {
        Ok(self
            .inner
            .lock()
            .await
            .get(&id)
            .map(|r| r.params.clone())
            .unwrap_or_default())
    }
}
