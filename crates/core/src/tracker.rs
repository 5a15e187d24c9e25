//! Resource tracking for data-driven cleanup
//!
//! Every artifact a backend creates during provisioning is recorded here before
//! `set_up` reports success. Cleanup walks this list instead of relying on
//! backend memory, and the list is cleared after each pass whatever the
//! individual outcomes were.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Kind of provisioned artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A directory tree on the local filesystem
    Directory,
    /// A database on the managed server
    Database,
    /// A container managed by the container runtime
    DockerContainer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::Database => write!(f, "database"),
            Self::DockerContainer => write!(f, "docker_container"),
        }
    }
}

/// A single tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    /// Path, database name or container name
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Append-only list of resources owned by one lifecycle controller
///
/// Tracking the same physical resource twice is not deduplicated; callers
/// track each resource exactly once.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: Vec<TrackedResource>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created resource
    pub fn track(
        &mut self,
        kind: ResourceKind,
        id: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let resource = TrackedResource {
            kind,
            id: id.into(),
            created_at: Utc::now(),
            metadata,
        };
        debug!("Tracked {} resource: {}", resource.kind, resource.id);
        self.resources.push(resource);
    }

    pub fn resources(&self) -> &[TrackedResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Take every tracked resource, leaving the list empty
    pub fn drain(&mut self) -> Vec<TrackedResource> {
        std::mem::take(&mut self.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_drain() {
        let mut tracker = ResourceTracker::new();
        assert!(tracker.is_empty());

        let mut metadata = serde_json::Map::new();
        metadata.insert("task".to_string(), "papers__1".into());
        tracker.track(ResourceKind::Directory, "/tmp/backup/papers", metadata);
        tracker.track(
            ResourceKind::Database,
            "bench_papers_1",
            serde_json::Map::new(),
        );

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.resources()[0].metadata["task"], "papers__1");

        let drained = tracker.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].kind, ResourceKind::Database);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_kind_display_matches_serde() {
        let json = serde_json::to_string(&ResourceKind::DockerContainer).unwrap();
        assert_eq!(json, "\"docker_container\"");
        assert_eq!(ResourceKind::DockerContainer.to_string(), "docker_container");
    }
}
