//! Benchmark task identity and the environment fields provisioning writes back
//!
//! A [`Task`] is created by task discovery, handed to a lifecycle controller for
//! `set_up`, read by the agent wrapper and verification scripts, and dropped
//! after `clean_up`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment details resolved during provisioning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvironment {
    /// Working copy exposed to the agent (filesystem backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_directory: Option<PathBuf>,
    /// Per-task database name (postgres backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    /// Connection URL for the per-task database, without password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Entry URL of the running web application (webarena backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name of the container serving the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_container_name: Option<String>,
    /// Image, ports and category of the running container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_metadata: Option<serde_json::Value>,
}

/// A single benchmark task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Service the task belongs to (e.g. "filesystem", "postgres")
    pub service: String,
    /// Category directory or meta.json category
    pub category_id: String,
    /// Task directory or meta.json id
    pub task_id: String,
    /// Path to the instruction markdown
    pub instruction_path: PathBuf,
    /// Path to the verification script
    pub verification_path: PathBuf,
    /// Fields written by provisioning
    #[serde(default)]
    pub environment: TaskEnvironment,
}

impl Task {
    /// Create a task rooted at `task_dir`, using the conventional file names
    pub fn new(
        service: impl Into<String>,
        category_id: impl Into<String>,
        task_id: impl Into<String>,
        task_dir: impl AsRef<Path>,
    ) -> Self {
        let task_dir = task_dir.as_ref();
        Self {
            service: service.into(),
            category_id: category_id.into(),
            task_id: task_id.into(),
            instruction_path: task_dir.join("description.md"),
            verification_path: task_dir.join("verify.py"),
            environment: TaskEnvironment::default(),
        }
    }

    /// `category_id__task_id`
    pub fn name(&self) -> String {
        format!("{}__{}", self.category_id, self.task_id)
    }

    /// Directory holding the task's instruction and helper scripts
    pub fn task_dir(&self) -> Option<&Path> {
        self.instruction_path.parent()
    }
}
