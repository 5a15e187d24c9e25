//! Provisioning lifecycle: the fixed set-up/clean-up sequence shared by every backend
//!
//! [`LifecycleController`] owns the order of operations and the resource list;
//! a [`StateBackend`] supplies the service-specific hooks. Hook errors are
//! logged with the task name and the failing stage, then converted into a
//! `bool` (set-up) or a [`CleanupReport`] (clean-up). Nothing raised by a
//! hook escapes the controller.

use crate::errors::Result;
use crate::task::Task;
use crate::tracker::{ResourceKind, ResourceTracker, TrackedResource};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, instrument, warn};

/// Connection parameters handed to the agent/tool layer
pub type AgentConfig = serde_json::Map<String, serde_json::Value>;

/// Result of a successful `create_initial_state`
///
/// The controller hands this straight to `store_state_info`; the task is the
/// durable record, so no copy is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialStateInfo {
    /// Directory path, database name or container name
    pub state_id: String,
    /// Path, connection URL or entry URL
    pub state_url: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Service-specific provisioning hooks
#[allow(async_fn_in_trait)]
pub trait StateBackend {
    /// Short service name used in logs ("filesystem", "postgres", ...)
    fn service_name(&self) -> &str;

    /// Create the isolated environment for `task`.
    ///
    /// Every resource created here must be recorded in `tracker` before
    /// returning `Ok`. On error, anything partially created must already be
    /// torn down.
    async fn create_initial_state(
        &mut self,
        task: &Task,
        tracker: &mut ResourceTracker,
    ) -> Result<InitialStateInfo>;

    /// Copy the resolved state onto the task's environment fields
    fn store_state_info(&mut self, task: &mut Task, info: InitialStateInfo);

    /// Tear down the state recorded on `task`
    async fn cleanup_initial_state(&mut self, task: &Task) -> Result<()>;

    /// Tear down one tracked resource
    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()>;

    /// Parameters the agent needs to reach the environment. Pure read.
    fn agent_config(&self) -> AgentConfig;
}

/// What a cleanup step was aimed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum CleanupTarget {
    /// State recorded on the task itself
    TaskState { task: String },
    /// An entry from the resource tracker
    Resource { kind: ResourceKind, id: String },
}

impl fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskState { task } => write!(f, "initial state of {}", task),
            Self::Resource { kind, id } => write!(f, "{} {}", kind, id),
        }
    }
}

/// Outcome of one cleanup step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    #[serde(flatten)]
    pub target: CleanupTarget,
    /// `None` on success
    pub error: Option<String>,
}

impl CleanupOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated result of a cleanup pass; every step is attempted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl CleanupReport {
    /// True when no step failed (an empty pass is a success)
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(CleanupOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    fn record(&mut self, target: CleanupTarget, result: Result<()>) {
        let error = match result {
            Ok(()) => None,
            Err(e) => {
                error!("Cleanup of {} failed: {}", target, e);
                Some(e.to_string())
            }
        };
        self.outcomes.push(CleanupOutcome { target, error });
    }
}

/// Drives a [`StateBackend`] through set-up and clean-up
///
/// One controller serves one task at a time; concurrent harnesses should
/// create one controller per task.
#[derive(Debug)]
pub struct LifecycleController<B> {
    backend: B,
    tracker: ResourceTracker,
}

impl<B: StateBackend> LifecycleController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            tracker: ResourceTracker::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Record a resource created outside the backend hooks
    pub fn track_resource(
        &mut self,
        kind: ResourceKind,
        id: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        self.tracker.track(kind, id, metadata);
    }

    /// Provision the environment for `task`.
    ///
    /// On failure the task is left untouched and `false` is returned.
    #[instrument(skip(self, task), fields(service = %self.backend.service_name(), task = %task.name()))]
    pub async fn set_up(&mut self, task: &mut Task) -> bool {
        info!(
            "Setting up initial state for {} task: {}",
            self.backend.service_name(),
            task.name()
        );

        let info = match self
            .backend
            .create_initial_state(task, &mut self.tracker)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!(
                    "Failed to create initial state for {} (stage: create_initial_state): {}",
                    task.name(),
                    e
                );
                return false;
            }
        };

        self.backend.store_state_info(task, info);
        info!("Initial state setup completed for {}", task.name());
        true
    }

    /// Tear down the task's state (if given) and then every tracked resource.
    ///
    /// Failures are collected, never short-circuited. The tracker is emptied
    /// unconditionally: each resource gets exactly one cleanup attempt.
    #[instrument(skip(self, task), fields(service = %self.backend.service_name()))]
    pub async fn clean_up(&mut self, task: Option<&Task>) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(task) = task {
            info!(
                "Cleaning up initial state for {} task: {}",
                self.backend.service_name(),
                task.name()
            );
            let result = self.backend.cleanup_initial_state(task).await;
            report.record(CleanupTarget::TaskState { task: task.name() }, result);
        }

        for resource in self.tracker.drain() {
            let result = self.backend.cleanup_resource(&resource).await;
            report.record(
                CleanupTarget::Resource {
                    kind: resource.kind,
                    id: resource.id.clone(),
                },
                result,
            );
        }

        if report.success() {
            info!("Cleanup completed for {}", self.backend.service_name());
        } else {
            warn!(
                "Cleanup completed with {} failure(s) for {}",
                report.failures().count(),
                self.backend.service_name()
            );
        }
        report
    }

    /// Connection parameters for the agent layer
    pub fn agent_config(&self) -> AgentConfig {
        self.backend.agent_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BenchEnvError, FilesystemError};
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeBackend {
        fail_create: bool,
        fail_task_cleanup: bool,
        failing_resources: HashSet<String>,
        cleaned: Vec<String>,
        resources_per_setup: usize,
    }

    fn failure(path: &str) -> BenchEnvError {
        FilesystemError::Remove {
            path: path.to_string(),
            message: "permission denied".to_string(),
        }
        .into()
    }

    impl StateBackend for FakeBackend {
        fn service_name(&self) -> &str {
            "fake"
        }

        async fn create_initial_state(
            &mut self,
            task: &Task,
            tracker: &mut ResourceTracker,
        ) -> Result<InitialStateInfo> {
            if self.fail_create {
                return Err(failure("create"));
            }
            for i in 0..self.resources_per_setup {
                tracker.track(
                    ResourceKind::Directory,
                    format!("{}-{}", task.name(), i),
                    serde_json::Map::new(),
                );
            }
            Ok(InitialStateInfo {
                state_id: format!("/work/{}", task.category_id),
                state_url: None,
                metadata: serde_json::Map::new(),
            })
        }

        fn store_state_info(&mut self, task: &mut Task, info: InitialStateInfo) {
            task.environment.test_directory = Some(info.state_id.into());
        }

        async fn cleanup_initial_state(&mut self, task: &Task) -> Result<()> {
            self.cleaned.push(format!("task:{}", task.name()));
            if self.fail_task_cleanup {
                return Err(failure("task"));
            }
            Ok(())
        }

        async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
            self.cleaned.push(resource.id.clone());
            if self.failing_resources.contains(&resource.id) {
                return Err(failure(&resource.id));
            }
            Ok(())
        }

        fn agent_config(&self) -> AgentConfig {
            AgentConfig::new()
        }
    }

    fn task() -> Task {
        Task::new("fake", "papers", "1", "/tasks/papers/1")
    }

    #[tokio::test]
    async fn test_set_up_failure_leaves_task_untouched() {
        let mut controller = LifecycleController::new(FakeBackend {
            fail_create: true,
            ..Default::default()
        });
        let mut task = task();
        assert!(!controller.set_up(&mut task).await);
        assert_eq!(task.environment, Default::default());
        assert!(controller.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_set_up_then_clean_up_empties_tracker() {
        let mut controller = LifecycleController::new(FakeBackend {
            resources_per_setup: 2,
            ..Default::default()
        });
        let mut task = task();
        assert!(controller.set_up(&mut task).await);
        assert_eq!(
            task.environment.test_directory.as_deref(),
            Some(std::path::Path::new("/work/papers"))
        );
        assert_eq!(controller.tracker().len(), 2);

        let report = controller.clean_up(Some(&task)).await;
        assert!(report.success());
        assert_eq!(report.outcomes.len(), 3);
        assert!(controller.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_clean_up_continues_after_failures() {
        let mut failing = HashSet::new();
        failing.insert("papers__1-0".to_string());
        let mut controller = LifecycleController::new(FakeBackend {
            resources_per_setup: 3,
            fail_task_cleanup: true,
            failing_resources: failing,
            ..Default::default()
        });
        let mut task = task();
        assert!(controller.set_up(&mut task).await);

        let report = controller.clean_up(Some(&task)).await;
        assert!(!report.success());
        let failed: Vec<_> = report.failures().map(|o| o.target.clone()).collect();
        assert_eq!(
            failed,
            vec![
                CleanupTarget::TaskState {
                    task: "papers__1".to_string()
                },
                CleanupTarget::Resource {
                    kind: ResourceKind::Directory,
                    id: "papers__1-0".to_string()
                },
            ]
        );
        // Every resource was attempted exactly once and then discarded
        assert_eq!(
            controller.backend().cleaned,
            vec!["task:papers__1", "papers__1-0", "papers__1-1", "papers__1-2"]
        );
        assert!(controller.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_clean_up_twice_is_safe() {
        let mut controller = LifecycleController::new(FakeBackend {
            resources_per_setup: 1,
            ..Default::default()
        });
        let mut task = task();
        assert!(controller.set_up(&mut task).await);
        assert!(controller.clean_up(None).await.success());

        let second = controller.clean_up(None).await;
        assert!(second.success());
        assert!(second.outcomes.is_empty());
    }
}
