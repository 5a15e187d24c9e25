//! Containerized web application backend
//!
//! Runs one web application container per task and hands the agent its entry
//! URL once it is actually serving. The task category selects a profile
//! (image, container name, host port, readiness path, post-start plan); the
//! selected profile replaces the active configuration wholesale.
//!
//! Container phases: `Absent -> Starting -> AwaitingPort -> AwaitingHttp ->
//! Ready`, with `Failed` reachable from any step and `Ready -> Absent` on
//! cleanup.

use crate::config::WebArenaSettings;
use crate::docker::{ContainerRuntime, RunSpec};
use crate::errors::{BenchEnvError, ConfigError, DockerError, Result};
use crate::lifecycle::{AgentConfig, InitialStateInfo, StateBackend};
use crate::probe::ReadinessProbe;
use crate::retry::poll_until;
use crate::task::Task;
use crate::tracker::{ResourceKind, ResourceTracker, TrackedResource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const MAGENTO_BIN: &str = "/var/www/magento2/bin/magento";
const MYSQL_USER: &str = "magentouser";
const MYSQL_PASSWORD: &str = "MyPassword";
const MYSQL_DATABASE: &str = "magentodb";

/// Task categories with a container profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebCategory {
    Reddit,
    Shopping,
    ShoppingAdmin,
}

impl WebCategory {
    pub const ALL: [WebCategory; 3] = [Self::Reddit, Self::Shopping, Self::ShoppingAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::Shopping => "shopping",
            Self::ShoppingAdmin => "shopping_admin",
        }
    }
}

impl fmt::Display for WebCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownCategory {
                service: "webarena".to_string(),
                category: s.to_string(),
            })
    }
}

/// In-container initialization run after the container starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStartPlan {
    None,
    /// Wait for MySQL and Magento, rewrite base URLs, flush cache
    Shopping,
    /// As `Shopping`, plus disable admin password expiry
    ShoppingAdmin,
}

impl PostStartPlan {
    /// Plan for a container name when no profile chose one
    pub fn for_container(name: &str) -> Self {
        match name {
            "shopping" => Self::Shopping,
            "shopping_admin" => Self::ShoppingAdmin,
            _ => Self::None,
        }
    }

    /// Configuration commands, in order, for a store served at `base_url`
    pub fn commands(&self, base_url: &str) -> Vec<Vec<String>> {
        let magento = |args: &[&str]| -> Vec<String> {
            std::iter::once(MAGENTO_BIN)
                .chain(args.iter().copied())
                .map(str::to_string)
                .collect()
        };
        let rewrite_urls = mysql_command(&format!(
            "UPDATE core_config_data SET value='{}/' WHERE path IN ('web/secure/base_url', 'web/unsecure/base_url');",
            base_url
        ));

        match self {
            Self::None => Vec::new(),
            Self::Shopping => vec![
                magento(&["setup:store-config:set", &format!("--base-url={}", base_url)]),
                rewrite_urls,
                magento(&["cache:flush"]),
            ],
            Self::ShoppingAdmin => vec![
                magento(&["setup:store-config:set", &format!("--base-url={}", base_url)]),
                rewrite_urls,
                magento(&["config:set", "admin/security/password_is_forced", "0"]),
                magento(&["config:set", "admin/security/password_lifetime", "0"]),
                magento(&["cache:flush"]),
            ],
        }
    }
}

fn mysql_command(statement: &str) -> Vec<String> {
    vec![
        "mysql".to_string(),
        "-u".to_string(),
        MYSQL_USER.to_string(),
        format!("-p{}", MYSQL_PASSWORD),
        MYSQL_DATABASE.to_string(),
        "-e".to_string(),
        statement.to_string(),
    ]
}

/// Image, container and readiness parameters for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryProfile {
    pub image: String,
    pub container_name: String,
    pub host_port: u16,
    pub readiness_path: String,
    pub post_start: PostStartPlan,
}

/// Closed table of category profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    profiles: HashMap<WebCategory, CategoryProfile>,
}

impl ProfileTable {
    /// The published WebArena images
    pub fn standard() -> Self {
        let profile = |image: &str, name: &str, port, path: &str, post_start| CategoryProfile {
            image: image.to_string(),
            container_name: name.to_string(),
            host_port: port,
            readiness_path: path.to_string(),
            post_start,
        };
        let mut profiles = HashMap::new();
        profiles.insert(
            WebCategory::Reddit,
            profile(
                "postmill-populated-exposed-withimg",
                "forum",
                9999,
                "/",
                PostStartPlan::None,
            ),
        );
        profiles.insert(
            WebCategory::Shopping,
            profile("shopping_final_0712", "shopping", 7770, "/", PostStartPlan::Shopping),
        );
        profiles.insert(
            WebCategory::ShoppingAdmin,
            profile(
                "shopping_admin_final_0719",
                "shopping_admin",
                7780,
                "/admin",
                PostStartPlan::ShoppingAdmin,
            ),
        );
        Self { profiles }
    }

    /// Publish `category` on a different host port
    pub fn with_host_port(mut self, category: WebCategory, host_port: u16) -> Self {
        if let Some(profile) = self.profiles.get_mut(&category) {
            profile.host_port = host_port;
        }
        self
    }

    pub fn get(&self, category: WebCategory) -> Option<&CategoryProfile> {
        self.profiles.get(&category)
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Active container configuration, overwritten on every set-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerConfig {
    pub image: String,
    pub container_name: String,
    pub host: String,
    pub host_port: u16,
    pub container_port: u16,
    pub readiness_path: String,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub image_tar_path: Option<PathBuf>,
    pub post_start: PostStartPlan,
}

impl DockerConfig {
    /// Configuration from settings alone
    pub fn from_settings(settings: &WebArenaSettings) -> Self {
        Self {
            image: settings.image.clone(),
            container_name: settings.container_name.clone(),
            host: settings.host.clone(),
            host_port: settings.host_port,
            container_port: settings.container_port,
            readiness_path: settings.readiness_path.clone(),
            readiness_timeout: settings.readiness_timeout(),
            poll_interval: settings.poll_interval(),
            image_tar_path: settings.image_tar_path.clone(),
            post_start: PostStartPlan::for_container(&settings.container_name),
        }
    }

    /// Settings with a category profile applied on top
    pub fn with_profile(settings: &WebArenaSettings, profile: &CategoryProfile) -> Self {
        Self {
            image: profile.image.clone(),
            container_name: profile.container_name.clone(),
            host_port: profile.host_port,
            readiness_path: profile.readiness_path.clone(),
            post_start: profile.post_start,
            ..Self::from_settings(settings)
        }
    }

    /// `http://host:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.host_port)
    }

    /// Base URL plus readiness path; a bare `/` path adds nothing
    pub fn entry_url(&self) -> String {
        let base = self.base_url();
        let path = self.readiness_path.as_str();
        if path.is_empty() || path == "/" {
            base
        } else {
            format!("{}{}", base, path)
        }
    }

    fn run_spec(&self) -> RunSpec {
        RunSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            host_port: self.host_port,
            container_port: self.container_port,
        }
    }
}

/// Where the active container is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerPhase {
    Absent,
    Starting,
    AwaitingPort,
    AwaitingHttp,
    Ready,
    Failed,
}

/// Bounds for the in-container service waits of a post-start plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostStartWaits {
    pub mysql_timeout: Duration,
    pub mysql_interval: Duration,
    pub app_timeout: Duration,
    pub app_interval: Duration,
}

impl Default for PostStartWaits {
    fn default() -> Self {
        Self {
            mysql_timeout: Duration::from_secs(120),
            mysql_interval: Duration::from_secs(2),
            app_timeout: Duration::from_secs(180),
            app_interval: Duration::from_secs(5),
        }
    }
}

/// Container-per-task backend
#[derive(Debug)]
pub struct WebArenaBackend<R> {
    runtime: R,
    settings: WebArenaSettings,
    profiles: ProfileTable,
    waits: PostStartWaits,
    config: DockerConfig,
    phase: ContainerPhase,
}

impl<R: ContainerRuntime> WebArenaBackend<R> {
    pub fn new(settings: WebArenaSettings, runtime: R) -> Self {
        let config = DockerConfig::from_settings(&settings);
        info!(
            "Initialized webarena backend (image={}, container={}, port={}, skip_cleanup={})",
            config.image, config.container_name, config.host_port, settings.skip_cleanup
        );
        Self {
            runtime,
            settings,
            profiles: ProfileTable::standard(),
            waits: PostStartWaits::default(),
            config,
            phase: ContainerPhase::Absent,
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_post_start_waits(mut self, waits: PostStartWaits) -> Self {
        self.waits = waits;
        self
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    pub fn phase(&self) -> ContainerPhase {
        self.phase
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Replace the active configuration for `category_id`
    ///
    /// An empty category selects the configured defaults; an unknown one is
    /// an error.
    pub fn apply_category(&mut self, category_id: &str) -> Result<()> {
        self.config = if category_id.is_empty() {
            DockerConfig::from_settings(&self.settings)
        } else {
            let category: WebCategory = category_id.parse()?;
            let profile = self.profiles.get(category).ok_or_else(|| {
                ConfigError::UnknownCategory {
                    service: "webarena".to_string(),
                    category: category_id.to_string(),
                }
            })?;
            info!("Using profile for '{}': image={}", category, profile.image);
            DockerConfig::with_profile(&self.settings, profile)
        };
        Ok(())
    }

    async fn ensure_image(&self) -> Result<()> {
        let Some(tar_path) = &self.config.image_tar_path else {
            return Ok(());
        };
        if self.runtime.image_exists(&self.config.image).await? {
            return Ok(());
        }
        info!("Loading image {} from {}", self.config.image, tar_path.display());
        self.runtime.load_image(tar_path).await
    }

    /// Stop then remove; the remove result decides success
    async fn stop_and_remove(&self, name: &str) -> Result<()> {
        if let Err(e) = self.runtime.stop(name).await {
            warn!("Failed to stop container {}: {}", name, e);
        }
        self.runtime.remove(name).await
    }

    /// Poll `command` in the container until it exits 0 or `timeout` passes
    async fn wait_for_exec(
        &self,
        label: &str,
        command: Vec<String>,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        let name = self.config.container_name.as_str();
        let runtime = &self.runtime;
        let command = command.as_slice();
        let ready = poll_until(Instant::now() + timeout, interval, move |_| async move {
            matches!(runtime.exec(name, command).await, Ok(result) if result.success)
        })
        .await;
        if ready {
            info!("{} is ready in container {}", label, name);
        } else {
            warn!("{} not ready after {:?}, attempting configuration anyway", label, timeout);
        }
        ready
    }

    /// Service waits and configuration commands for the active plan
    ///
    /// Nothing here fails provisioning; the readiness probe decides.
    #[instrument(skip(self), fields(container = %self.config.container_name))]
    async fn run_post_start(&self) {
        let plan = self.config.post_start;
        if plan == PostStartPlan::None {
            return;
        }
        info!("Running {:?} post-start setup", plan);

        self.wait_for_exec(
            "MySQL",
            mysql_command("SELECT 1;"),
            self.waits.mysql_timeout,
            self.waits.mysql_interval,
        )
        .await;
        self.wait_for_exec(
            "Magento",
            vec![
                MAGENTO_BIN.to_string(),
                "config:show".to_string(),
                "web/unsecure/base_url".to_string(),
            ],
            self.waits.app_timeout,
            self.waits.app_interval,
        )
        .await;

        for command in plan.commands(&self.config.base_url()) {
            match self.runtime.exec(&self.config.container_name, &command).await {
                Ok(result) if result.success => {
                    debug!("Setup step ok ({}): {}", command.join(" "), result.stdout.trim())
                }
                Ok(result) => warn!(
                    "Setup step failed ({}): {}",
                    command.join(" "),
                    result.stderr.trim()
                ),
                Err(e) => warn!("Setup step failed ({}): {}", command.join(" "), e),
            }
        }
    }

    /// Wait for port then HTTP against one deadline
    async fn await_ready(&mut self) -> Result<()> {
        let probe = ReadinessProbe::new(
            self.config.host.clone(),
            self.config.host_port,
            self.config.entry_url(),
            self.config.poll_interval,
        );
        let deadline = Instant::now() + self.config.readiness_timeout;

        self.phase = ContainerPhase::AwaitingPort;
        if probe.wait_for_port(deadline).await {
            self.phase = ContainerPhase::AwaitingHttp;
            if probe.wait_for_http(deadline).await {
                self.phase = ContainerPhase::Ready;
                info!("HTTP endpoint ready: {}", probe.url());
                return Ok(());
            }
        }
        error!(
            "Timed out waiting for {} (phase {:?})",
            probe.url(),
            self.phase
        );
        Err(DockerError::ReadinessTimeout {
            url: probe.url().to_string(),
        }
        .into())
    }

    fn log_manual_stop(&self, name: &str) {
        info!("Skipping container cleanup; still running at {}", self.config.entry_url());
        info!("To stop manually: docker stop {} && docker rm {}", name, name);
    }

    /// Best-effort removal of the active container
    pub async fn close_all(&mut self) {
        if self.settings.skip_cleanup {
            self.log_manual_stop(&self.config.container_name);
            return;
        }
        let name = self.config.container_name.clone();
        if let Err(e) = self.stop_and_remove(&name).await {
            debug!("close_all: {}", e);
        }
        self.phase = ContainerPhase::Absent;
    }
}

impl<R: ContainerRuntime> StateBackend for WebArenaBackend<R> {
    fn service_name(&self) -> &str {
        "webarena"
    }

    async fn create_initial_state(
        &mut self,
        task: &Task,
        tracker: &mut ResourceTracker,
    ) -> Result<InitialStateInfo> {
        self.apply_category(&task.category_id)?;
        self.phase = ContainerPhase::Starting;

        if let Err(e) = self.ensure_image().await {
            self.phase = ContainerPhase::Failed;
            return Err(e);
        }

        let name = self.config.container_name.clone();
        if let Err(e) = self.stop_and_remove(&name).await {
            debug!("No stale container removed: {}", e);
        }

        let container_id = match self.runtime.run_detached(&self.config.run_spec()).await {
            Ok(id) => id,
            Err(e) => {
                self.phase = ContainerPhase::Failed;
                return Err(e);
            }
        };
        info!("Started container {} ({})", name, container_id);

        self.run_post_start().await;

        if let Err(e) = self.await_ready().await {
            self.phase = ContainerPhase::Failed;
            if let Err(cleanup) = self.stop_and_remove(&name).await {
                warn!("Failed to remove container {} after timeout: {}", name, cleanup);
            }
            return Err(e);
        }

        let entry_url = self.config.entry_url();
        let mut resource = serde_json::Map::new();
        resource.insert("image".to_string(), json!(self.config.image));
        resource.insert("host_port".to_string(), json!(self.config.host_port));
        resource.insert("container_port".to_string(), json!(self.config.container_port));
        resource.insert("base_url".to_string(), json!(entry_url));
        tracker.track(ResourceKind::DockerContainer, name.clone(), resource);

        let mut metadata = serde_json::Map::new();
        metadata.insert("docker_image".to_string(), json!(self.config.image));
        metadata.insert("container_name".to_string(), json!(name));
        metadata.insert("host_port".to_string(), json!(self.config.host_port));
        metadata.insert("container_port".to_string(), json!(self.config.container_port));
        metadata.insert("base_url".to_string(), json!(entry_url));
        metadata.insert("category".to_string(), json!(task.category_id));

        Ok(InitialStateInfo {
            state_id: name,
            state_url: Some(entry_url),
            metadata,
        })
    }

    fn store_state_info(&mut self, task: &mut Task, info: InitialStateInfo) {
        task.environment.docker_container_name = Some(info.state_id);
        task.environment.base_url = info.state_url;
        task.environment.docker_metadata = Some(serde_json::Value::Object(info.metadata));
    }

    async fn cleanup_initial_state(&mut self, task: &Task) -> Result<()> {
        let name = task
            .environment
            .docker_container_name
            .clone()
            .unwrap_or_else(|| self.config.container_name.clone());
        if self.settings.skip_cleanup {
            self.log_manual_stop(&name);
            return Ok(());
        }
        self.stop_and_remove(&name).await?;
        self.phase = ContainerPhase::Absent;
        info!("Removed container {} for {}", name, task.name());
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind != ResourceKind::DockerContainer {
            return Err(BenchEnvError::UnsupportedResource {
                service: self.service_name().to_string(),
                kind: resource.kind.to_string(),
            });
        }
        if self.settings.skip_cleanup {
            info!("Skipping resource cleanup for {}", resource.id);
            return Ok(());
        }
        self.stop_and_remove(&resource.id).await?;
        if resource.id == self.config.container_name {
            self.phase = ContainerPhase::Absent;
        }
        Ok(())
    }

    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new();
        config.insert("environment".to_string(), json!("webarena-docker"));
        config.insert("base_url".to_string(), json!(self.config.entry_url()));
        config.insert(
            "docker".to_string(),
            json!({
                "image": self.config.image,
                "container": self.config.container_name,
                "host_port": self.config.host_port,
                "container_port": self.config.container_port,
            }),
        );
        config
    }
}
