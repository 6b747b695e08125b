//! Directory entry and query types

use convoy_core::Aid;
use serde::{Deserialize, Serialize};

/// One capability an agent advertises in the directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Endpoints where an agent can be reached.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
}

/// A directory entry describing one agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub did: Aid,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl AgentMetadata {
    pub fn new(did: Aid, name: impl Into<String>) -> Self {
        Self {
            did,
            name: name.into(),
            capabilities: Vec::new(),
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_rpc_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoints.rpc = Some(url.into());
        self
    }

    /// True iff this agent advertises the named capability.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }
}

/// Search query over the directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryQuery {
    /// Match entries advertising at least one of these capability names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Case-insensitive substring match on the agent name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DirectoryQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            capabilities: None,
            name: Some(name.into()),
        }
    }

    pub fn by_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: Some(capabilities.into_iter().map(Into::into).collect()),
            name: None,
        }
    }

    /// True iff `meta` satisfies every populated constraint.
    pub fn matches(&self, meta: &AgentMetadata) -> bool {
        if let Some(name) = &self.name {
            if !meta.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        if let Some(wanted) = &self.capabilities {
            if !wanted.is_empty() && !wanted.iter().any(|w| meta.has_capability(w)) {
                return false;
            }
        }
        true
    }
}
