//! # EDP I/O - Destination Side of the Pipeline
//!
//! This crate implements the warehouse-facing half of EDP: the durable
//! event queue wrapper, the schema-reconciling table helper, and the write
//! path that moves events from the queue into SQL destinations with
//! at-least-once semantics.
//!
//! ## Write path
//!
//! Producers enqueue raw events; a [`consumer::QueueConsumer`] per
//! destination flattens them, derives the desired table schema, and hands
//! them to a [`writer::DestinationWriter`], which ensures the table through
//! [`table_helper::TableHelper`] and inserts through the configured SQL
//! adapters. Outcomes are partitioned: transient connection failures go
//! back to the queue, everything else is retried once and then
//! dead-lettered.

/// Streaming and batch consumers feeding the write path
pub mod consumer;

/// Typed event queue over the durable queue SPI
pub mod event_queue;

/// In-memory queue SPI implementation
pub mod memory_queue;

/// Schema reconciliation with optimistic version fencing
pub mod table_helper;

/// Destination write path with retry and accounting
pub mod writer;

pub use consumer::{QueueConsumer, StateStore, SyncConsumer};
pub use event_queue::EventQueue;
pub use memory_queue::InMemoryQueue;
pub use table_helper::{SchemaError, TableHelper};
pub use writer::{AdapterPicker, DestinationWriter, RandomPicker, WriteError};
