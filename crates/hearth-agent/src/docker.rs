use std::process::Stdio;

use anyhow::Context;
use hearth_console::{ProcessLauncher, ProcessSession};
use hearth_process::{LaunchParams, ResourceId};
use tokio::process::Command;

pub const DEFAULT_CONTAINER_PREFIX: &str = "hearth_server_";
pub const DEFAULT_DOCKER: &str = "docker";

/// Drives game-server containers through the docker CLI.
///
/// Each resource maps to the container `<prefix><id>`. Console pipes are the
/// stdio of a `docker start -i` / `docker attach` client process.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    docker: String,
    prefix: String,
}

impl DockerLauncher {
    pub fn new(docker: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            prefix: prefix.into(),
        }
    }

    pub fn container_name(&self, id: ResourceId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Spawns a docker client with piped stdio and reaps it in the
    /// background.
    async fn spawn_piped(&self, args: &[&str]) -> anyhow::Result<ProcessSession> {
        let mut child = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {} {}", self.docker, args.join(" ")))?;

        let session =
            ProcessSession::from_child(&mut child).context("docker client stdio not piped")?;

        let label = args.join(" ");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(command = %label, %status, "docker client exited"),
                Err(error) => tracing::warn!(command = %label, %error, "waiting on docker client failed"),
            }
        });
        Ok(session)
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let out = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("run {} {}", self.docker, args.join(" ")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            anyhow::bail!(
                "{} {} failed ({}): {}",
                self.docker,
                args.join(" "),
                out.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn is_running(&self, name: &str) -> anyhow::Result<bool> {
        let listing = self
            .run(&["container", "ls", "--format", "{{.Names}}"])
            .await?;
        Ok(lists_container(&listing, name))
    }
}

fn lists_container(listing: &str, name: &str) -> bool {
    listing.lines().any(|line| line.trim() == name)
}

#[async_trait::async_trait]
impl ProcessLauncher for DockerLauncher {
    async fn launch(
        &self,
        id: ResourceId,
        params: &LaunchParams,
    ) -> anyhow::Result<ProcessSession> {
        let name = self.container_name(id);
        tracing::info!(resource = %id, container = %name, ?params, "starting container");
        self.spawn_piped(&["start", "-i", &name]).await
    }

    async fn attach_existing(&self, id: ResourceId) -> anyhow::Result<ProcessSession> {
        let name = self.container_name(id);
        if !self.is_running(&name).await? {
            anyhow::bail!("container {name} is not running");
        }
        tracing::info!(resource = %id, container = %name, "attaching to container");
        self.spawn_piped(&["attach", "--sig-proxy=false", &name]).await
    }

    async fn terminate(&self, id: ResourceId) -> anyhow::Result<()> {
        let name = self.container_name(id);
        tracing::info!(resource = %id, container = %name, "stopping container");
        self.run(&["stop", &name]).await.map(|_| ())
    }
}
