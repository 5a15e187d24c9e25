//! PostgreSQL clone backend
//!
//! Every task gets its own database. When a database named after the task's
//! category exists it is used as a template (`CREATE DATABASE .. WITH
//! TEMPLATE`); otherwise an empty database is created and the task's setup
//! script seeds it. Cleanup drops the per-task database.
//!
//! Admin SQL goes through the [`DatabaseAdmin`] trait. [`PgAdmin`] talks to
//! the server with sqlx; [`mock::MockAdmin`] keeps databases in memory for
//! tests.

use crate::config::PostgresSettings;
use crate::errors::{BenchEnvError, DatabaseError, Result};
use crate::fixture::{FixtureFetcher, HttpClient};
use crate::lifecycle::{AgentConfig, InitialStateInfo, StateBackend};
use crate::task::Task;
use crate::tracker::{ResourceKind, ResourceTracker, TrackedResource};
use serde_json::json;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, error, info, instrument, warn};

/// Postgres truncates identifiers longer than this
const MAX_IDENTIFIER_LEN: usize = 63;

/// Restore diagnostics that mean the restore did not happen
const FATAL_RESTORE_MARKERS: &[&str] = &[
    "FATAL:",
    "could not connect",
    "does not appear to be a valid archive",
    "could not open input file",
];

/// Administrative operations on the database server
#[allow(async_fn_in_trait)]
pub trait DatabaseAdmin {
    /// Check the server is reachable with the configured credentials
    async fn ping(&self) -> Result<()>;

    async fn database_exists(&self, name: &str) -> Result<bool>;

    async fn create_empty(&self, name: &str) -> Result<()>;

    /// Terminate sessions on `template`, then clone it into `name`
    async fn create_from_template(&self, name: &str, template: &str) -> Result<()>;

    /// Terminate sessions on `name`, then drop it if it exists
    async fn drop_database(&self, name: &str) -> Result<()>;
}

/// Quote an identifier for interpolation into DDL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// sqlx-backed admin client
///
/// Opens a short-lived connection to the maintenance database per operation,
/// so no session lingers on a template or a database about to be dropped.
#[derive(Debug, Clone)]
pub struct PgAdmin {
    options: PgConnectOptions,
}

impl PgAdmin {
    pub fn new(settings: &PostgresSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.username)
            .database(&settings.database);
        if !settings.password.is_empty() {
            options = options.password(&settings.password);
        }
        Self { options }
    }

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| {
                DatabaseError::Connection {
                    message: e.to_string(),
                }
                .into()
            })
    }

    async fn terminate_sessions(conn: &mut PgConnection, name: &str) -> Result<()> {
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn execute_ddl(conn: &mut PgConnection, statement: &str) -> Result<()> {
        debug!("Executing: {}", statement);
        sqlx::raw_sql(statement)
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }
}

impl DatabaseAdmin for PgAdmin {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        conn.ping().await.map_err(|e| DatabaseError::Connection {
            message: e.to_string(),
        })?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.connect().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(name)
                .fetch_one(&mut conn)
                .await
                .map_err(DatabaseError::from)?;
        let _ = conn.close().await;
        Ok(exists)
    }

    async fn create_empty(&self, name: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        Self::execute_ddl(&mut conn, &format!("CREATE DATABASE {}", quote_ident(name))).await?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn create_from_template(&self, name: &str, template: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        Self::terminate_sessions(&mut conn, template).await?;
        Self::execute_ddl(
            &mut conn,
            &format!(
                "CREATE DATABASE {} WITH TEMPLATE {}",
                quote_ident(name),
                quote_ident(template)
            ),
        )
        .await?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        Self::terminate_sessions(&mut conn, name).await?;
        Self::execute_ddl(&mut conn, &format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .await?;
        let _ = conn.close().await;
        Ok(())
    }
}

/// How a restore run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Exit status zero
    Clean,
    /// Non-zero exit with only non-fatal diagnostics
    Warnings,
    /// The restore did not produce a usable database
    Failed,
}

/// Classify a restore run from its exit status and stderr
pub fn classify_restore(success: bool, stderr: &str) -> RestoreOutcome {
    if success {
        RestoreOutcome::Clean
    } else if FATAL_RESTORE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
    {
        RestoreOutcome::Failed
    } else {
        RestoreOutcome::Warnings
    }
}

/// Per-task database name: `task_<category>_<task>_<timestamp>`
///
/// Characters outside `[a-z0-9_]` become `_`, and the category/task part is
/// shortened so the whole name fits in a Postgres identifier.
pub fn task_database_name(category_id: &str, task_id: &str, timestamp: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    };
    let suffix = format!("_{}", timestamp);
    let mut stem = format!("task_{}_{}", sanitize(category_id), sanitize(task_id));
    stem.truncate(MAX_IDENTIFIER_LEN.saturating_sub(suffix.len()));
    stem + &suffix
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Per-task database backend
#[derive(Debug)]
pub struct DatabaseBackend<A, C> {
    settings: PostgresSettings,
    admin: A,
    fetcher: FixtureFetcher<C>,
    current_database: Option<String>,
}

impl<A: DatabaseAdmin, C: HttpClient> DatabaseBackend<A, C> {
    /// Verify connectivity and make sure the reference databases exist
    ///
    /// An unreachable server is fatal. Reference database problems are
    /// logged and skipped.
    #[instrument(skip_all, fields(host = %settings.host, port = settings.port))]
    pub async fn connect(
        settings: PostgresSettings,
        admin: A,
        fetcher: FixtureFetcher<C>,
    ) -> Result<Self> {
        admin.ping().await?;
        info!("Connected to PostgreSQL at {}:{}", settings.host, settings.port);

        let backend = Self {
            settings,
            admin,
            fetcher,
            current_database: None,
        };
        backend.ensure_reference_databases().await;
        Ok(backend)
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    async fn ensure_reference_databases(&self) {
        for name in &self.settings.reference_databases {
            match self.admin.database_exists(name).await {
                Ok(true) => {
                    debug!("Reference database {} already exists", name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not check reference database {}: {}", name, e);
                    continue;
                }
            }

            info!("Setting up reference database {}", name);
            let dump = self.fetcher.dump_path(name);
            if !dump.exists() {
                let url = self.fetcher.dump_url(name);
                if let Err(e) = self.fetcher.download_to_file(&url, &dump).await {
                    warn!("Failed to download dump for {}: {}", name, e);
                    continue;
                }
            }

            if let Err(e) = self.admin.create_empty(name).await {
                warn!("Failed to create reference database {}: {}", name, e);
                continue;
            }

            if let Err(e) = self.restore_dump(name, &dump).await {
                warn!("Restore of {} failed, dropping it: {}", name, e);
                if let Err(e) = self.admin.drop_database(name).await {
                    warn!("Failed to drop partially restored {}: {}", name, e);
                }
            }
        }
    }

    /// Run the restore tool for `database` from `dump`
    async fn restore_dump(&self, database: &str, dump: &Path) -> Result<()> {
        let output = tokio::process::Command::new(&self.settings.restore_tool)
            .arg("-h")
            .arg(&self.settings.host)
            .arg("-p")
            .arg(self.settings.port.to_string())
            .arg("-U")
            .arg(&self.settings.username)
            .arg("-d")
            .arg(database)
            .arg("-v")
            .arg(dump)
            .env("PGPASSWORD", &self.settings.password)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(DatabaseError::Io)?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        match classify_restore(output.status.success(), &stderr) {
            RestoreOutcome::Clean => {
                info!("Reference database {} restored", database);
                Ok(())
            }
            RestoreOutcome::Warnings => {
                warn!("Restore of {} reported errors: {}", database, stderr.trim());
                Ok(())
            }
            RestoreOutcome::Failed => Err(DatabaseError::Restore {
                database: database.to_string(),
                message: stderr.trim().to_string(),
            }
            .into()),
        }
    }

    /// Run the task's setup script against `database`, if the task has one
    #[instrument(skip(self, task), fields(task = %task.name()))]
    async fn run_setup_script(&self, task: &Task, database: &str) -> Result<()> {
        let Some(task_dir) = task.task_dir() else {
            return Ok(());
        };
        let script = task_dir.join(&self.settings.setup_script);
        if !script.is_file() {
            debug!("No {} for {}", self.settings.setup_script, task.name());
            return Ok(());
        }

        info!("Running {} for {}", self.settings.setup_script, task.name());
        // The child runs inside the task dir, so it gets the bare file name
        let child = tokio::process::Command::new(&self.settings.setup_interpreter)
            .arg(&self.settings.setup_script)
            .current_dir(task_dir)
            .env("POSTGRES_HOST", &self.settings.host)
            .env("POSTGRES_PORT", self.settings.port.to_string())
            .env("POSTGRES_DATABASE", database)
            .env("POSTGRES_USERNAME", &self.settings.username)
            .env("POSTGRES_PASSWORD", &self.settings.password)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let timeout = self.settings.setup_timeout();
        let output = match tokio::time::timeout(timeout, child).await {
            Ok(output) => output.map_err(DatabaseError::Io)?,
            Err(_) => {
                error!("Setup script timed out for {}", task.name());
                return Err(DatabaseError::SetupTimeout {
                    seconds: timeout.as_secs(),
                }
                .into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Setup script output: {}", stdout.trim());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Setup script failed for {}: {}", task.name(), stderr);
            return Err(DatabaseError::SetupScript {
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        info!("Environment preparation completed for {}", task.name());
        Ok(())
    }
}

impl<A: DatabaseAdmin, C: HttpClient> StateBackend for DatabaseBackend<A, C> {
    fn service_name(&self) -> &str {
        "postgres"
    }

    async fn create_initial_state(
        &mut self,
        task: &Task,
        tracker: &mut ResourceTracker,
    ) -> Result<InitialStateInfo> {
        let name = task_database_name(&task.category_id, &task.task_id, &timestamp());

        let template = if !task.category_id.is_empty()
            && self.admin.database_exists(&task.category_id).await?
        {
            Some(task.category_id.clone())
        } else {
            None
        };

        match &template {
            Some(template) => {
                self.admin.create_from_template(&name, template).await?;
                info!("Created database {} from template {}", name, template);
            }
            None => {
                self.admin.create_empty(&name).await?;
                info!("Created empty database {}", name);
                if let Err(e) = self.run_setup_script(task, &name).await {
                    if let Err(drop_err) = self.admin.drop_database(&name).await {
                        warn!("Failed to drop {} after setup failure: {}", name, drop_err);
                    }
                    return Err(e);
                }
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("category".to_string(), json!(task.category_id));
        metadata.insert("template".to_string(), json!(template));
        tracker.track(ResourceKind::Database, name.clone(), metadata.clone());

        Ok(InitialStateInfo {
            state_url: Some(self.settings.public_url(&name)),
            state_id: name,
            metadata,
        })
    }

    fn store_state_info(&mut self, task: &mut Task, info: InitialStateInfo) {
        task.environment.database_name = Some(info.state_id.clone());
        task.environment.database_url = info.state_url;
        self.current_database = Some(info.state_id);
    }

    async fn cleanup_initial_state(&mut self, task: &Task) -> Result<()> {
        let Some(name) = task.environment.database_name.as_deref() else {
            return Ok(());
        };
        self.admin.drop_database(name).await?;
        info!("Dropped database {} for {}", name, task.name());
        if self.current_database.as_deref() == Some(name) {
            self.current_database = None;
        }
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind != ResourceKind::Database {
            return Err(BenchEnvError::UnsupportedResource {
                service: self.service_name().to_string(),
                kind: resource.kind.to_string(),
            });
        }
        self.admin.drop_database(&resource.id).await?;
        if self.current_database.as_deref() == Some(resource.id.as_str()) {
            self.current_database = None;
        }
        Ok(())
    }

    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new();
        config.insert("host".to_string(), json!(self.settings.host));
        config.insert("port".to_string(), json!(self.settings.port));
        config.insert("username".to_string(), json!(self.settings.username));
        config.insert("password".to_string(), json!(self.settings.password));
        match &self.current_database {
            Some(db) => {
                config.insert("current_database".to_string(), json!(db));
                config.insert(
                    "database_url".to_string(),
                    json!(self.settings.connection_url(db)),
                );
            }
            None => {
                config.insert("database".to_string(), json!(self.settings.database));
                config.insert(
                    "database_url".to_string(),
                    json!(self.settings.connection_url(&self.settings.database)),
                );
            }
        }
        config
    }
}

pub mod mock {
    //! In-memory database admin for tests

    use super::DatabaseAdmin;
    use crate::errors::{DatabaseError, Result};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Record of an admin call for verification in tests
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum AdminCall {
        Ping,
        Exists(String),
        CreateEmpty(String),
        CreateFromTemplate { name: String, template: String },
        Drop(String),
    }

    #[derive(Debug, Default)]
    struct MockState {
        reachable: bool,
        databases: HashSet<String>,
        calls: Vec<AdminCall>,
        fail_drop: HashSet<String>,
    }

    /// Mock admin keeping a set of database names
    ///
    /// Clones share state.
    #[derive(Debug, Clone)]
    pub struct MockAdmin {
        state: Arc<Mutex<MockState>>,
    }

    impl Default for MockAdmin {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockAdmin {
        /// A reachable server with no databases
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    reachable: true,
                    ..MockState::default()
                })),
            }
        }

        /// A server that refuses connections
        pub fn unreachable() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState::default())),
            }
        }

        /// Add an existing database (e.g. a template)
        pub fn with_database(self, name: &str) -> Self {
            self.state.lock().unwrap().databases.insert(name.to_string());
            self
        }

        /// Make dropping `name` fail
        pub fn fail_drop(&self, name: &str) {
            self.state.lock().unwrap().fail_drop.insert(name.to_string());
        }

        pub fn databases(&self) -> HashSet<String> {
            self.state.lock().unwrap().databases.clone()
        }

        pub fn calls(&self) -> Vec<AdminCall> {
            self.state.lock().unwrap().calls.clone()
        }

        fn record(&self, call: AdminCall) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    impl DatabaseAdmin for MockAdmin {
        async fn ping(&self) -> Result<()> {
            self.record(AdminCall::Ping);
            if self.state.lock().unwrap().reachable {
                Ok(())
            } else {
                Err(DatabaseError::Connection {
                    message: "connection refused".to_string(),
                }
                .into())
            }
        }

        async fn database_exists(&self, name: &str) -> Result<bool> {
            self.record(AdminCall::Exists(name.to_string()));
            Ok(self.state.lock().unwrap().databases.contains(name))
        }

        async fn create_empty(&self, name: &str) -> Result<()> {
            self.record(AdminCall::CreateEmpty(name.to_string()));
            let mut state = self.state.lock().unwrap();
            if !state.databases.insert(name.to_string()) {
                return Err(DatabaseError::Query {
                    message: format!("database \"{}\" already exists", name),
                }
                .into());
            }
            Ok(())
        }

        async fn create_from_template(&self, name: &str, template: &str) -> Result<()> {
            self.record(AdminCall::CreateFromTemplate {
                name: name.to_string(),
                template: template.to_string(),
            });
            let mut state = self.state.lock().unwrap();
            if !state.databases.contains(template) {
                return Err(DatabaseError::Query {
                    message: format!("template database \"{}\" does not exist", template),
                }
                .into());
            }
            state.databases.insert(name.to_string());
            Ok(())
        }

        async fn drop_database(&self, name: &str) -> Result<()> {
            self.record(AdminCall::Drop(name.to_string()));
            let mut state = self.state.lock().unwrap();
            if state.fail_drop.contains(name) {
                return Err(DatabaseError::Query {
                    message: format!("database \"{}\" is being accessed by other users", name),
                }
                .into());
            }
            state.databases.remove(name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{AdminCall, MockAdmin};
    use super::*;
    use crate::config::FixtureSettings;
    use bytes::Bytes;

    struct NoDownloads;

    #[async_trait::async_trait]
    impl HttpClient for NoDownloads {
        async fn get(
            &self,
            url: &str,
        ) -> std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>> {
            Err(format!("unexpected download of {}", url).into())
        }
    }

    fn settings() -> PostgresSettings {
        PostgresSettings {
            password: "pw".to_string(),
            reference_databases: Vec::new(),
            ..PostgresSettings::default()
        }
    }

    fn fetcher(data_root: &Path) -> FixtureFetcher<NoDownloads> {
        FixtureFetcher::new(
            NoDownloads,
            FixtureSettings {
                data_root: data_root.to_path_buf(),
                ..FixtureSettings::default()
            },
        )
        .with_retry(crate::retry::RetryConfig::none())
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("employees"), "\"employees\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_task_database_name() {
        assert_eq!(
            task_database_name("table_operations", "create-index", "20250101120000"),
            "task_table_operations_create_index_20250101120000"
        );
        let long = task_database_name(&"c".repeat(80), "t", "20250101120000");
        assert_eq!(long.len(), MAX_IDENTIFIER_LEN);
        assert!(long.ends_with("_20250101120000"));
    }

    #[test]
    fn test_classify_restore() {
        assert_eq!(classify_restore(true, "anything"), RestoreOutcome::Clean);
        assert_eq!(
            classify_restore(
                false,
                "pg_restore: error: could not execute query: ERROR:  role \"x\" does not exist"
            ),
            RestoreOutcome::Warnings
        );
        assert_eq!(
            classify_restore(false, "pg_restore: error: connection to server failed: FATAL:  password authentication failed"),
            RestoreOutcome::Failed
        );
        assert_eq!(
            classify_restore(false, "pg_restore: error: input file does not appear to be a valid archive"),
            RestoreOutcome::Failed
        );
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_unreachable() {
        let temp = tempfile::tempdir().unwrap();
        let result =
            DatabaseBackend::connect(settings(), MockAdmin::unreachable(), fetcher(temp.path()))
                .await;
        assert!(matches!(
            result,
            Err(BenchEnvError::Database(DatabaseError::Connection { .. }))
        ));
    }

    #[tokio::test]
    async fn test_existing_reference_databases_are_left_alone() {
        let temp = tempfile::tempdir().unwrap();
        let admin = MockAdmin::new().with_database("chinook");
        let settings = PostgresSettings {
            reference_databases: vec!["chinook".to_string()],
            ..settings()
        };
        DatabaseBackend::connect(settings, admin.clone(), fetcher(temp.path()))
            .await
            .unwrap();
        assert_eq!(
            admin.calls(),
            vec![AdminCall::Ping, AdminCall::Exists("chinook".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reference_download_failure_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let admin = MockAdmin::new();
        let settings = PostgresSettings {
            reference_databases: vec!["lego".to_string()],
            ..settings()
        };
        DatabaseBackend::connect(settings, admin.clone(), fetcher(temp.path()))
            .await
            .unwrap();
        assert!(admin.databases().is_empty());
    }

    #[tokio::test]
    async fn test_template_clone_when_category_database_exists() {
        let temp = tempfile::tempdir().unwrap();
        let admin = MockAdmin::new().with_database("employees");
        let mut backend = DatabaseBackend::connect(settings(), admin.clone(), fetcher(temp.path()))
            .await
            .unwrap();

        let mut tracker = ResourceTracker::new();
        let task = Task::new("postgres", "employees", "salary_report", temp.path());
        let info = backend.create_initial_state(&task, &mut tracker).await.unwrap();

        assert!(info.state_id.starts_with("task_employees_salary_report_"));
        assert!(admin.calls().contains(&AdminCall::CreateFromTemplate {
            name: info.state_id.clone(),
            template: "employees".to_string(),
        }));
        assert_eq!(
            info.state_url.as_deref(),
            Some(format!("postgresql://postgres@localhost:5432/{}", info.state_id).as_str())
        );
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_agent_config_tracks_current_database() {
        let temp = tempfile::tempdir().unwrap();
        let mut backend = DatabaseBackend::connect(settings(), MockAdmin::new(), fetcher(temp.path()))
            .await
            .unwrap();
        let config = backend.agent_config();
        assert_eq!(config["database_url"], "postgresql://postgres:pw@localhost:5432/postgres");
        assert!(config.get("current_database").is_none());
        assert_eq!(config["database"], "postgres");

        let mut task = Task::new("postgres", "basic", "t1", temp.path().join("t1"));
        backend.store_state_info(
            &mut task,
            InitialStateInfo {
                state_id: "task_basic_t1_1".to_string(),
                state_url: Some("postgresql://postgres@localhost:5432/task_basic_t1_1".to_string()),
                metadata: serde_json::Map::new(),
            },
        );
        let config = backend.agent_config();
        assert_eq!(config["current_database"], "task_basic_t1_1");
        assert!(config.get("database").is_none());
        assert_eq!(
            config["database_url"],
            "postgresql://postgres:pw@localhost:5432/task_basic_t1_1"
        );
        assert_eq!(task.environment.database_name.as_deref(), Some("task_basic_t1_1"));
    }
}
