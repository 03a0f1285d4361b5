//! Runtime facilities shared by container components.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Version information of the running agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Package name of the agent binary or library.
    pub package_name: String,
    /// Package version of the agent binary or library.
    pub package_version: String,
}

impl AgentInfo {
    /// Agent info of this crate. Downstream agents usually construct
    /// their own from their crate metadata.
    pub fn from_crate() -> Self {
        Self {
            package_name: env!("CARGO_PKG_NAME").to_string(),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Runtime facilities of a container: UUID generation and agent version
/// info.
#[derive(Debug, Clone)]
pub struct Runtime {
    agent_info: AgentInfo,
}

impl Runtime {
    /// Create a runtime carrying the given agent info.
    pub fn new(agent_info: AgentInfo) -> Self {
        Self { agent_info }
    }

    /// Generate a fresh version-4 UUID.
    pub fn new_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }

    /// The agent's version info.
    pub fn agent_info(&self) -> &AgentInfo {
        &self.agent_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_info_from_crate() {
        let info = AgentInfo::from_crate();
        assert_eq!(info.package_name, "coaty");
        assert!(!info.package_version.is_empty());
    }

    #[test]
    fn test_runtime_uuid_generation() {
        let runtime = Runtime::new(AgentInfo::from_crate());
        assert_ne!(runtime.new_uuid(), runtime.new_uuid());
    }
}
