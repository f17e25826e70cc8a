//! # EDP Core - Event Data Pipeline Core Library
//!
//! Foundational types and SPI contracts for the EDP event ingestion and
//! source-sync pipeline. This crate defines the record model, the warehouse
//! table schema with its forward-only diff, the flattener that canonicalises
//! nested records, and the service provider interfaces the destination side
//! is built against.
//!
//! ## Key Components
//!
//! - **Record model**: semi-structured events, queue envelopes, write-path
//!   context
//! - **Table model**: schema representation, existence and diff semantics,
//!   version fencing counters
//! - **SPI contracts**: [`adapter::SqlAdapter`], [`coordination::MonitorKeeper`],
//!   [`queue::Queue`], [`cache::EventsCache`], implemented outside the core
//! - **Flattener**: nested record → flat key/scalar map canonicalisation
//!
//! Concrete destination machinery (table helper, event queue wrapper, write
//! path) lives in `edp-io`; CLI connector ingestion lives in `edp-sync`.

/// SQL adapter contract and error partition
pub mod adapter;

/// Observational sinks: events cache, object stores, loggers
pub mod cache;

/// Per-table locking and version counters
pub mod coordination;

/// Metric names and emit helpers
pub mod counters;

/// Event payloads and write-path context
pub mod event;

/// Record flattening and key canonicalisation
pub mod flatten;

/// Durable queue SPI
pub mod queue;

/// CLI connector output batches
pub mod stream;

/// Warehouse table schema model and diffing
pub mod table;

/// Semantic data types and stream schemas
pub mod types;

pub use adapter::{AdapterError, SqlAdapter, TableField, TypeMapping};
pub use cache::{EventStore, EventsCache, NoopEventsCache, ObjectLogger};
pub use coordination::{CoordinationError, InProcessMonitor, LockHandle, MonitorKeeper};
pub use event::{EventContext, FailedEvent, Record, TimedEvent, UniqueId};
pub use flatten::{reformat, FlattenError, Flattener, JsonFlattener, SliceStrategy};
pub use queue::{Queue, QueueError};
pub use stream::{CliDataConsumer, CliOutputRepresentation, StreamRepresentation};
pub use table::{Columns, SqlColumn, Table};
pub use types::{BatchHeader, DataType, Field, Fields};
