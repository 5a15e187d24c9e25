//! Container runtime integration
//!
//! This module abstracts the handful of container runtime operations the
//! web-application backend needs (image presence, image load, detached run,
//! exec, stop, remove) behind the [`ContainerRuntime`] trait. [`CliRuntime`]
//! drives the docker (or podman) CLI; [`mock::MockRuntime`] records calls for
//! tests.

use crate::errors::{DockerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, instrument};

/// Parameters for a detached `run`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Port published on the host
    pub host_port: u16,
    /// Port the application listens on inside the container
    pub container_port: u16,
}

impl RunSpec {
    /// CLI arguments for `docker run`
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-p".to_string(),
            format!("{}:{}", self.host_port, self.container_port),
            "-d".to_string(),
            self.image.clone(),
        ]
    }
}

/// Result of executing a command in a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code of the command
    pub exit_code: i32,
    /// Whether the command completed successfully (exit code 0)
    pub success: bool,
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
}

impl ExecResult {
    fn from_output(output: &Output) -> Self {
        let exit_code = output.status.code().unwrap_or(-1);
        Self {
            exit_code,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Split an image reference into repository and tag, defaulting to `latest`.
///
/// A colon inside a registry host (`localhost:5000/app`) is not a tag.
pub fn split_image_ref(image: &str) -> (&str, &str) {
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(offset) => {
            let split = last_segment_start + offset;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// Whether `image` appears in `docker images --format {{.Repository}}:{{.Tag}}` output
pub fn image_listed(listing: &str, image: &str) -> bool {
    let target = split_image_ref(image);
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .any(|line| split_image_ref(line) == target)
}

/// Runtime messages meaning the container is already gone
fn is_missing_container(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no container with name")
}

/// Container runtime abstraction trait
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// Whether the image is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Load an image archive produced by `docker save`
    async fn load_image(&self, tar_path: &Path) -> Result<()>;

    /// Start a detached container and return its ID
    async fn run_detached(&self, spec: &RunSpec) -> Result<String>;

    /// Execute a command inside a running container
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecResult>;

    /// Stop a container; a missing container is not an error
    async fn stop(&self, container: &str) -> Result<()>;

    /// Remove a stopped container; a missing container is not an error
    async fn remove(&self, container: &str) -> Result<()>;
}

/// Generic CLI-based container runtime implementation
///
/// This can be used for both Docker and Podman runtimes since they share
/// a compatible CLI interface.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    /// Container runtime CLI binary path (e.g., "docker" or "podman")
    runtime_path: String,
}

impl CliRuntime {
    /// Create a new CliRuntime for Docker
    pub fn docker() -> Self {
        Self {
            runtime_path: "docker".to_string(),
        }
    }

    /// Create a new CliRuntime with custom runtime binary path
    pub fn with_runtime_path(runtime_path: impl Into<String>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
        }
    }

    /// Check if container runtime binary is available
    #[instrument(skip(self))]
    pub fn check_runtime_installed(&self) -> Result<()> {
        debug!(
            "Checking if container runtime binary is installed at: {}",
            self.runtime_path
        );

        match Command::new(&self.runtime_path).arg("--version").output() {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(
                    DockerError::CLIError(format!("Runtime version check failed: {}", stderr))
                        .into(),
                )
            }
            Err(e) => {
                debug!("Container runtime binary not found: {}", e);
                Err(DockerError::NotInstalled.into())
            }
        }
    }

    /// Run the CLI with `args` on the blocking pool and capture its output
    async fn run(&self, args: Vec<String>) -> std::result::Result<Output, DockerError> {
        let runtime_path = self.runtime_path.clone();
        debug!("Running: {} {}", runtime_path, args.join(" "));

        tokio::task::spawn_blocking(move || {
            Command::new(&runtime_path).args(&args).output().map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DockerError::NotInstalled
                } else {
                    DockerError::CLIError(format!("Failed to run {}: {}", runtime_path, e))
                }
            })
        })
        .await
        .map_err(|e| DockerError::CLIError(format!("Task join error: {}", e)))?
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::docker()
    }
}

impl ContainerRuntime for CliRuntime {
    #[instrument(skip(self))]
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .run(vec![
                "images".to_string(),
                "--format".to_string(),
                "{{.Repository}}:{{.Tag}}".to_string(),
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DockerError::CLIError(format!("Image listing failed: {}", stderr)).into());
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let found = image_listed(&listing, image);
        debug!("Image {} present: {}", image, found);
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn load_image(&self, tar_path: &Path) -> Result<()> {
        let output = self
            .run(vec![
                "load".to_string(),
                "--input".to_string(),
                tar_path.display().to_string(),
            ])
            .await?;

        if !output.status.success() {
            return Err(DockerError::ImageLoad {
                path: tar_path.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn run_detached(&self, spec: &RunSpec) -> Result<String> {
        let output = self.run(spec.to_args()).await?;

        if !output.status.success() {
            return Err(DockerError::StartFailed {
                name: spec.name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    #[instrument(skip(self))]
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecResult> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(command.iter().cloned());

        let output = self.run(args).await?;
        let result = ExecResult::from_output(&output);
        debug!(
            "Exec in {} exited with {}: {}",
            container,
            result.exit_code,
            result.stdout.trim()
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn stop(&self, container: &str) -> Result<()> {
        let output = self
            .run(vec!["stop".to_string(), container.to_string()])
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !is_missing_container(&stderr) {
            return Err(DockerError::CLIError(format!("Stop command failed: {}", stderr)).into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, container: &str) -> Result<()> {
        let output = self
            .run(vec!["rm".to_string(), container.to_string()])
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !is_missing_container(&stderr) {
            return Err(DockerError::CLIError(format!("Remove command failed: {}", stderr)).into());
        }
        Ok(())
    }
}

pub mod mock {
    //! Mock container runtime for testing provisioning flows
    //!
    //! Records every call in order and answers exec commands from a table of
    //! substring patterns, so tests can script services that become healthy
    //! after a few polls.

    use super::{ContainerRuntime, ExecResult, RunSpec};
    use crate::errors::{DockerError, Result};
    use std::collections::{HashSet, VecDeque};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Configuration for exec command responses
    #[derive(Debug, Clone)]
    pub struct MockExecResponse {
        /// Exit code to return
        pub exit_code: i32,
        /// Optional stdout content
        pub stdout: String,
        /// Optional stderr content
        pub stderr: String,
        /// Optional delay to simulate command execution time
        pub delay: Option<Duration>,
    }

    impl Default for MockExecResponse {
        fn default() -> Self {
            Self {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                delay: None,
            }
        }
    }

    impl MockExecResponse {
        /// A response exiting with `code`
        pub fn exit(code: i32) -> Self {
            Self {
                exit_code: code,
                ..Self::default()
            }
        }
    }

    /// Record of a runtime call for verification in tests
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RuntimeCall {
        ImageExists(String),
        LoadImage(PathBuf),
        Run(RunSpec),
        Exec { container: String, command: Vec<String> },
        Stop(String),
        Remove(String),
    }

    #[derive(Debug, Default)]
    struct MockState {
        images: HashSet<String>,
        running: HashSet<String>,
        calls: Vec<RuntimeCall>,
        exec_responses: Vec<(String, VecDeque<MockExecResponse>)>,
        fail_run: Option<String>,
        fail_remove: Option<String>,
    }

    /// Mock container runtime implementation
    ///
    /// Clones share state, so a test can keep a handle after moving the
    /// runtime into a backend.
    #[derive(Debug, Clone, Default)]
    pub struct MockRuntime {
        state: Arc<Mutex<MockState>>,
    }

    impl MockRuntime {
        /// Create a new MockRuntime with no images and no containers
        pub fn new() -> Self {
            Self::default()
        }

        /// Mark an image as present locally
        pub fn add_image(&self, image: &str) {
            self.state.lock().unwrap().images.insert(image.to_string());
        }

        /// Script exec responses for commands containing `pattern`
        ///
        /// Responses are consumed in order; the last one repeats.
        pub fn set_exec_responses(&self, pattern: &str, responses: Vec<MockExecResponse>) {
            self.state
                .lock()
                .unwrap()
                .exec_responses
                .push((pattern.to_string(), responses.into_iter().collect()));
        }

        /// Make `run` fail with `message`
        pub fn fail_run(&self, message: &str) {
            self.state.lock().unwrap().fail_run = Some(message.to_string());
        }

        /// Make `remove` fail with `message`
        pub fn fail_remove(&self, message: &str) {
            self.state.lock().unwrap().fail_remove = Some(message.to_string());
        }

        /// All calls made so far, in order
        pub fn calls(&self) -> Vec<RuntimeCall> {
            self.state.lock().unwrap().calls.clone()
        }

        /// Exec commands made so far, joined with spaces
        pub fn exec_commands(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    RuntimeCall::Exec { command, .. } => Some(command.join(" ")),
                    _ => None,
                })
                .collect()
        }

        /// Whether a container with `name` is currently running
        pub fn is_running(&self, name: &str) -> bool {
            self.state.lock().unwrap().running.contains(name)
        }

        fn record(&self, call: RuntimeCall) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    impl ContainerRuntime for MockRuntime {
        async fn image_exists(&self, image: &str) -> Result<bool> {
            self.record(RuntimeCall::ImageExists(image.to_string()));
            let state = self.state.lock().unwrap();
            Ok(state.images.iter().any(|known| {
                super::split_image_ref(known) == super::split_image_ref(image)
            }))
        }

        async fn load_image(&self, tar_path: &Path) -> Result<()> {
            self.record(RuntimeCall::LoadImage(tar_path.to_path_buf()));
            Ok(())
        }

        async fn run_detached(&self, spec: &RunSpec) -> Result<String> {
            self.record(RuntimeCall::Run(spec.clone()));
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.fail_run {
                return Err(DockerError::StartFailed {
                    name: spec.name.clone(),
                    message: message.clone(),
                }
                .into());
            }
            state.running.insert(spec.name.clone());
            Ok(format!("mock-{}", spec.name))
        }

        async fn exec(&self, container: &str, command: &[String]) -> Result<ExecResult> {
            self.record(RuntimeCall::Exec {
                container: container.to_string(),
                command: command.to_vec(),
            });

            let joined = command.join(" ");
            let response = {
                let mut state = self.state.lock().unwrap();
                state
                    .exec_responses
                    .iter_mut()
                    .find(|(pattern, _)| joined.contains(pattern.as_str()))
                    .and_then(|(_, queue)| {
                        if queue.len() > 1 {
                            queue.pop_front()
                        } else {
                            queue.front().cloned()
                        }
                    })
                    .unwrap_or_default()
            };

            if let Some(delay) = response.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ExecResult {
                exit_code: response.exit_code,
                success: response.exit_code == 0,
                stdout: response.stdout,
                stderr: response.stderr,
            })
        }

        async fn stop(&self, container: &str) -> Result<()> {
            self.record(RuntimeCall::Stop(container.to_string()));
            Ok(())
        }

        async fn remove(&self, container: &str) -> Result<()> {
            self.record(RuntimeCall::Remove(container.to_string()));
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.fail_remove {
                return Err(DockerError::CLIError(message.clone()).into());
            }
            state.running.remove(container);
            Ok(())
        }
    }
}
