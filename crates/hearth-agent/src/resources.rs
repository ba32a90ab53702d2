use std::path::{Path, PathBuf};

use anyhow::Context;
use hearth_console::ResourceStore;
use hearth_process::{IntegrationConfig, LaunchParams, ResourceId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: ResourceId,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub params: LaunchParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ResourceFile {
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceEntry>,
}

/// Resource records kept in a TOML file (`[[resource]]` tables).
///
/// Writes go through a temp file and a rename, under the same lock that
/// guards the in-memory copy.
#[derive(Debug)]
pub struct TomlStore {
    path: PathBuf,
    file: Mutex<ResourceFile>,
}

impl TomlStore {
    /// Loads the file, or starts empty when it does not exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => toml::from_str::<ResourceFile>(&raw)
                .with_context(|| format!("parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "resource file missing, starting empty");
                ResourceFile::default()
            }
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub async fn entries(&self) -> Vec<ResourceEntry> {
        self.file.lock().await.resources.clone()
    }

    pub async fn running_ids(&self) -> Vec<ResourceId> {
        self.file
            .lock()
            .await
            .resources
            .iter()
            .filter(|r| r.running)
            .map(|r| r.id)
            .collect()
    }

    async fn persist(path: &Path, file: &ResourceFile) -> anyhow::Result<()> {
        let raw = toml::to_string_pretty(file).context("encode resource file")?;
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourceStore for TomlStore {
    async fn set_running(&self, id: ResourceId, running: bool) -> anyhow::Result<()> {
        let mut file = self.file.lock().await;
        let mut next = file.clone();
        match next.resources.iter_mut().find(|r| r.id == id) {
            Some(entry) if entry.running == running => return Ok(()),
            Some(entry) => entry.running = running,
            None => anyhow::bail!("unknown resource {id}"),
        }
        // Memory follows disk: a failed write leaves both unchanged.
        Self::persist(&self.path, &next).await?;
        *file = next;
        Ok(())
    }

    async fn integration_config(
        &self,
        id: ResourceId,
    ) -> anyhow::Result<Option<IntegrationConfig>> {
        let file = self.file.lock().await;
        let entry = file
            .resources
            .iter()
            .find(|r| r.id == id)
            .with_context(|| format!("unknown resource {id}"))?;
        Ok(entry.integration.clone())
    }

    async fn launch_params(&self, id: ResourceId) -> anyhow::Result<LaunchParams> {
        let file = self.file.lock().await;
        let entry = file
            .resources
            .iter()
            .find(|r| r.id == id)
            .with_context(|| format!("unknown resource {id}"))?;
        Ok(entry.params.clone())
    }
}
