//! # EDP Sync - Source Side of the Pipeline
//!
//! This crate implements CLI connector ingestion: a driver contract for
//! docker-image and tap-binary connectors, the streaming parser for their
//! line-delimited output protocol, and the bounded readiness wait that
//! gates every sync run.
//!
//! A sync run shapes up as: build a [`driver::CliDriver`] through the
//! [`driver::DriverRegistry`], wait for it with
//! [`readiness::wait_readiness`], then run it with a
//! [`parser::StreamOutputParser`] wired to a data consumer that writes
//! batches into a destination and checkpoints the resume state.

/// Driver contracts, registry, and source configuration
pub mod driver;

/// Streaming parser for connector output
pub mod parser;

/// Connector line protocol types
pub mod protocol;

/// Bounded driver readiness wait
pub mod readiness;

pub use driver::{
    CliDriver, CliTaskCloser, DriverRegistry, ServiceAccountKey, SourceConfig, SyncError,
    TaskLogger, TracingTaskLogger,
};
pub use parser::{
    default_full_refresh_images, select_sync_mode, ParseError, StreamOutputParser, BATCH_SIZE,
    SYNC_MODE_FULL_REFRESH, SYNC_MODE_INCREMENTAL,
};
pub use readiness::wait_readiness;
