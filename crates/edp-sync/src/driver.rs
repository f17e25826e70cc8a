//! Source driver contracts and the driver registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use edp_core::stream::CliDataConsumer;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The driver did not report ready within the readiness window.
    #[error("{driver_type} driver is not ready")]
    NotReady { driver_type: String },
    /// The driver was closed while we were waiting on it.
    #[error("{driver_type} driver already has been closed")]
    DriverClosed { driver_type: String },
}

/// Task-scoped log sink. Connector output and sync progress go here so each
/// run's log can be stored and shown independently of the process log.
pub trait TaskLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards task logs to `tracing` with the task id attached.
pub struct TracingTaskLogger {
    task_id: String,
}

impl TracingTaskLogger {
    pub fn new(task_id: impl Into<String>) -> TracingTaskLogger {
        TracingTaskLogger {
            task_id: task_id.into(),
        }
    }
}

impl TaskLogger for TracingTaskLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(task = %self.task_id, "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(task = %self.task_id, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(task = %self.task_id, "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(task = %self.task_id, "{message}");
    }
}

/// Handle for aborting a long-running sync task. Cancelling makes the
/// output parser exit at the next line boundary.
pub trait CliTaskCloser: Send + Sync {
    fn task_id(&self) -> &str;

    fn close_with_error(&self, message: &str, system_error: bool);

    fn cancellation(&self) -> CancellationToken;
}

/// A CLI-based source connector (docker image or tap binary).
#[async_trait]
pub trait CliDriver: Send + Sync {
    /// Unique driver kind, e.g. `airbyte`.
    fn driver_type(&self) -> &str;

    /// Docker image or tap name without vendor prefix, e.g. `source-mixpanel`.
    fn tap(&self) -> &str;

    /// Prefix applied to every stream's table name.
    fn table_name_prefix(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// True once the driver can run a sync (image pulled, binary installed).
    async fn ready(&self) -> anyhow::Result<bool>;

    /// Runs the connector and feeds its parsed output to `data_consumer`.
    /// `state` is the resume cursor committed by the previous run.
    async fn load(
        &self,
        state: Option<Value>,
        task_logger: Arc<dyn TaskLogger>,
        data_consumer: Arc<dyn CliDataConsumer>,
        task_closer: Arc<dyn CliTaskCloser>,
    ) -> anyhow::Result<()>;
}

/// Connector instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub driver: String,
    #[serde(default)]
    pub config: Value,
}

type DriverConstructor =
    Box<dyn Fn(&SourceConfig) -> anyhow::Result<Box<dyn CliDriver>> + Send + Sync>;
type TestConnectionFunc = Box<dyn Fn(&SourceConfig) -> anyhow::Result<()> + Send + Sync>;

/// Registry of driver constructors and connection tests, populated at
/// startup and injected where drivers are created.
#[derive(Default)]
pub struct DriverRegistry {
    constructors: HashMap<String, DriverConstructor>,
    test_connection_funcs: HashMap<String, TestConnectionFunc>,
}

impl DriverRegistry {
    pub fn new() -> DriverRegistry {
        DriverRegistry::default()
    }

    pub fn register_driver(
        &mut self,
        driver_type: impl Into<String>,
        constructor: DriverConstructor,
    ) {
        self.constructors.insert(driver_type.into(), constructor);
    }

    pub fn register_test_connection(
        &mut self,
        driver_type: impl Into<String>,
        func: TestConnectionFunc,
    ) {
        self.test_connection_funcs.insert(driver_type.into(), func);
    }

    pub fn create(&self, config: &SourceConfig) -> anyhow::Result<Box<dyn CliDriver>> {
        let constructor = self
            .constructors
            .get(&config.driver)
            .ok_or_else(|| anyhow::anyhow!("unknown driver type: {}", config.driver))?;
        constructor(config)
    }

    pub fn test_connection(&self, config: &SourceConfig) -> anyhow::Result<()> {
        let func = self
            .test_connection_funcs
            .get(&config.driver)
            .ok_or_else(|| anyhow::anyhow!("unknown driver type: {}", config.driver))?;
        func(config)
    }
}

/// Service account credentials as they appear in source configs: an inline
/// JSON object, a JSON string literal, or a path to a key file. Resolved to
/// raw key bytes at validation time.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAccountKey {
    Inline(serde_json::Map<String, Value>),
    Literal(String),
    File(String),
}

impl ServiceAccountKey {
    pub fn from_value(value: &Value) -> anyhow::Result<ServiceAccountKey> {
        match value {
            Value::Object(map) => Ok(ServiceAccountKey::Inline(map.clone())),
            Value::String(s) if s.trim_start().starts_with('{') => {
                Ok(ServiceAccountKey::Literal(s.clone()))
            }
            Value::String(s) if !s.is_empty() => Ok(ServiceAccountKey::File(s.clone())),
            _ => anyhow::bail!(
                "service_account_key must be an object, JSON content string or key file path"
            ),
        }
    }

    pub fn resolve(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ServiceAccountKey::Inline(map) => Ok(serde_json::to_vec(map)?),
            ServiceAccountKey::Literal(json) => Ok(json.clone().into_bytes()),
            ServiceAccountKey::File(path) => Ok(std::fs::read(path)?),
        }
    }
}
