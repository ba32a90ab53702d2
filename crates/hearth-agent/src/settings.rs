use std::path::PathBuf;

use crate::docker::{DEFAULT_CONTAINER_PREFIX, DEFAULT_DOCKER};

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_RESOURCES: &str = "resources.toml";

/// Process-level settings of the agent binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub listen: String,
    pub resources: PathBuf,
    pub container_prefix: String,
    pub docker: String,
}

impl AgentSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            listen: var("HEARTH_LISTEN", DEFAULT_LISTEN),
            resources: PathBuf::from(var("HEARTH_RESOURCES", DEFAULT_RESOURCES)),
            container_prefix: var("HEARTH_CONTAINER_PREFIX", DEFAULT_CONTAINER_PREFIX),
            docker: var("HEARTH_DOCKER", DEFAULT_DOCKER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let cfg = AgentSettings::from_lookup(|_| None);
        assert_eq!(cfg.listen, "0.0.0.0:8080");
        assert_eq!(cfg.resources, PathBuf::from("resources.toml"));
        assert_eq!(cfg.container_prefix, "hearth_server_");

        let cfg = AgentSettings::from_lookup(|name| match name {
            "HEARTH_LISTEN" => Some("127.0.0.1:9000".into()),
            "HEARTH_DOCKER" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.docker, "docker");
    }
}
