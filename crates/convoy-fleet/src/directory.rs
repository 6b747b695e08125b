//! Agent directory: capability and identifier lookup
//!
//! The directory maps agent identifiers and capabilities to metadata so RPC
//! calls can be routed by AID or by capability. Providers are pluggable
//! (network-backed implementations suspend, so the trait is async), and an
//! in-memory provider backs the process-wide default.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use convoy_core::Aid;

use crate::error::Result;
use crate::types::{AgentMetadata, DirectoryQuery};

/// Capability and identifier lookup for routing requests between agents.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// All agents advertising `capability`; `"*"` matches every agent.
    async fn discover(&self, capability: &str) -> Result<Vec<Aid>>;

    /// Metadata for one agent, if registered.
    async fn lookup(&self, aid: &Aid) -> Result<Option<AgentMetadata>>;

    /// Insert or replace the entry for `meta.did`.
    async fn register(&self, meta: AgentMetadata) -> Result<()>;

    /// Remove an entry; returns whether one existed.
    async fn unregister(&self, aid: &Aid) -> Result<bool>;

    /// Agents matching the query (see [`DirectoryQuery::matches`]).
    async fn search(&self, query: &DirectoryQuery) -> Result<Vec<Aid>>;
}

/// In-memory directory; the default provider for single-process fleets.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<Aid, AgentMetadata>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registered entry, sorted by AID for deterministic output.
    pub fn list(&self) -> Vec<AgentMetadata> {
        let entries = self.lock_read();
        let mut all: Vec<AgentMetadata> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.did.cmp(&b.did));
        all
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Aid, AgentMetadata>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Aid, AgentMetadata>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn collect_sorted(&self, mut predicate: impl FnMut(&AgentMetadata) -> bool) -> Vec<Aid> {
        let entries = self.lock_read();
        let mut matched: Vec<Aid> = entries
            .values()
            .filter(|m| predicate(m))
            .map(|m| m.did.clone())
            .collect();
        matched.sort();
        matched
    }
}

#[async_trait]
impl DirectoryProvider for InMemoryDirectory {
    async fn discover(&self, capability: &str) -> Result<Vec<Aid>> {
        if capability == "*" {
            return Ok(self.collect_sorted(|_| true));
        }
        Ok(self.collect_sorted(|m| m.has_capability(capability)))
    }

    async fn lookup(&self, aid: &Aid) -> Result<Option<AgentMetadata>> {
        Ok(self.lock_read().get(aid).cloned())
    }

    async fn register(&self, meta: AgentMetadata) -> Result<()> {
        self.lock_write().insert(meta.did.clone(), meta);
        Ok(())
    }

    async fn unregister(&self, aid: &Aid) -> Result<bool> {
        Ok(self.lock_write().remove(aid).is_some())
    }

    async fn search(&self, query: &DirectoryQuery) -> Result<Vec<Aid>> {
        Ok(self.collect_sorted(|m| query.matches(m)))
    }
}

static DEFAULT_DIRECTORY: OnceLock<Arc<dyn DirectoryProvider>> = OnceLock::new();

/// Install the process-wide default directory.
///
/// Returns `false` if a default was already installed (the existing one is
/// kept). Tests should construct their own [`InMemoryDirectory`] and inject
/// it instead of relying on the process-wide value.
pub fn install_default_directory(provider: Arc<dyn DirectoryProvider>) -> bool {
    DEFAULT_DIRECTORY.set(provider).is_ok()
}

/// The process-wide default directory, installing an empty in-memory
/// provider on first use.
pub fn default_directory() -> Arc<dyn DirectoryProvider> {
    DEFAULT_DIRECTORY
        .get_or_init(|| Arc::new(InMemoryDirectory::new()))
        .clone()
}
