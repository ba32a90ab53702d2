use hearth_process::{LaunchParams, ResourceId};

use crate::session::ProcessSession;

/// Container-runtime capability the console core drives.
///
/// All three calls may block for a while (they shell out to the runtime) and
/// may fail, e.g. when the resource is already running or does not exist.
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// Starts the resource's process and returns its pipes.
    async fn launch(&self, id: ResourceId, params: &LaunchParams)
    -> anyhow::Result<ProcessSession>;

    /// Opens pipes to an already running process.
    async fn attach_existing(&self, id: ResourceId) -> anyhow::Result<ProcessSession>;

    /// Stops the resource's process.
    async fn terminate(&self, id: ResourceId) -> anyhow::Result<()>;
}
