use std::{collections::BTreeMap, fmt};

/// Stable identifier of one game-server instance.
///
/// Assigned by provisioning; the console core never invents one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(ResourceId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ViewerId(pub uuid::Uuid);

impl ViewerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MultiplexerState {
    Attaching,
    Running,
    TearingDown,
    Gone,
}

/// Why a console stopped pumping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TerminationCause {
    /// The process closed its stdout cleanly.
    Graceful,
    /// A pipe read or write failed.
    Crash,
    /// A stop sequence already terminated the process and forced the teardown.
    Stopped,
}

/// Webhook target configured for a resource.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IntegrationConfig {
    pub endpoint: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Launcher parameters, passed through to the container runtime untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LaunchParams(pub BTreeMap<String, String>);

impl LaunchParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_ids_are_unique() {
        assert_ne!(ViewerId::new(), ViewerId::new());
    }

    #[test]
    fn resource_id_parses_and_displays() {
        let id: ResourceId = " 42 ".parse().unwrap();
        assert_eq!(id, ResourceId(42));
        assert_eq!(id.to_string(), "42");
        assert!("abc".parse::<ResourceId>().is_err());
    }

    #[test]
    fn integration_config_defaults_optional_fields() {
        let cfg: IntegrationConfig =
            serde_json::from_str(r#"{"endpoint":"http://hook"}"#).unwrap();
        assert!(!cfg.active);
        assert!(cfg.display_name.is_none());
        assert!(cfg.avatar_url.is_none());
    }
}
