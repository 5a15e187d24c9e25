//! Core library for benchmark environment provisioning
//!
//! This crate gives each benchmark task an isolated environment (a filesystem
//! working copy, a per-task database, or a running web application container)
//! and tears it down afterwards. Backends implement
//! [`lifecycle::StateBackend`]; [`lifecycle::LifecycleController`] drives them.

pub mod config;
pub mod database;
pub mod docker;
pub mod errors;
pub mod filesystem;
pub mod fixture;
pub mod lifecycle;
pub mod logging;
pub mod probe;
pub mod retry;
pub mod task;
pub mod tracker;
pub mod webarena;
