//! Streaming parser for CLI connector output.
//!
//! Reads line-delimited JSON from a connector child process, applies the
//! configured stream schemas, and pushes batched output to a
//! [`CliDataConsumer`]. State lines overwrite the pending resume cursor and
//! are committed only when the enclosing batch consume succeeds; a crash
//! before the next consume replays from the last persisted state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::error;

use edp_core::stream::{CliDataConsumer, CliOutputRepresentation, StreamRepresentation};
use edp_core::types::BatchHeader;

use crate::driver::TaskLogger;
use crate::protocol::{Row, LOG_TYPE, RECORD_TYPE, STATE_TYPE};

/// Records accumulated before the batch is handed to the consumer.
pub const BATCH_SIZE: usize = 10_000;

/// Hard cap on one protocol line. Fixed for compatibility with the upstream
/// connector protocol.
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub const SYNC_MODE_INCREMENTAL: &str = "incremental";
pub const SYNC_MODE_FULL_REFRESH: &str = "full_refresh";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("error parsing record line {line}: 'data' doesn't exist")]
    MalformedRecord { line: String },
    #[error("error parsing state line {line}: 'data' doesn't exist")]
    MalformedState { line: String },
    #[error("error parsing log line {line}: 'log' doesn't exist")]
    MalformedLog { line: String },
    #[error("output line exceeds the {limit} byte limit")]
    LineTooLong { limit: usize },
    #[error("sync task was cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("error consuming batch: {0}")]
    Consume(#[source] anyhow::Error),
}

/// Parses connector stdout into batched [`CliOutputRepresentation`]s.
pub struct StreamOutputParser {
    data_consumer: Arc<dyn CliDataConsumer>,
    streams_representation: BTreeMap<String, StreamRepresentation>,
    logger: Arc<dyn TaskLogger>,
    batch_size: usize,
}

impl StreamOutputParser {
    pub fn new(
        data_consumer: Arc<dyn CliDataConsumer>,
        streams_representation: BTreeMap<String, StreamRepresentation>,
        logger: Arc<dyn TaskLogger>,
    ) -> StreamOutputParser {
        StreamOutputParser {
            data_consumer,
            streams_representation,
            logger,
            batch_size: BATCH_SIZE,
        }
    }

    #[cfg(test)]
    fn with_batch_size(mut self, batch_size: usize) -> StreamOutputParser {
        self.batch_size = batch_size;
        self
    }

    /// Reads `stdout` to EOF, consuming a batch every `batch_size` records
    /// and once more for the remainder. Exits at the next line boundary when
    /// `cancel` fires.
    pub async fn parse<R>(&self, stdout: R, cancel: CancellationToken) -> Result<(), ParseError>
    where
        R: AsyncRead + Unpin,
    {
        self.logger.info(&format!(
            "sync will store data as batches >= [{}] elements",
            self.batch_size
        ));

        let mut output = CliOutputRepresentation::default();
        for (stream_name, representation) in &self.streams_representation {
            output.streams.insert(
                stream_name.clone(),
                StreamRepresentation {
                    namespace: representation.namespace.clone(),
                    stream_name: representation.stream_name.clone(),
                    batch_header: representation.batch_header.clone(),
                    key_fields: representation.key_fields.clone(),
                    objects: Vec::new(),
                    need_clean: representation.need_clean,
                },
            );
        }

        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut records = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled);
            }

            line.clear();
            let read = reader.read_until(b'\n', &mut line).await?;
            if read == 0 {
                break;
            }
            if line.len() > MAX_LINE_BYTES {
                return Err(ParseError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                });
            }

            let row: Row = match serde_json::from_slice(&line) {
                Ok(row) => row,
                Err(_) => {
                    // connectors print free-form diagnostics to stdout
                    self.logger.debug(&String::from_utf8_lossy(&line));
                    continue;
                }
            };

            match row.row_type.as_str() {
                LOG_TYPE => {
                    let log = row.log.ok_or_else(|| ParseError::MalformedLog {
                        line: String::from_utf8_lossy(&line).into_owned(),
                    })?;
                    match log.level.as_str() {
                        "ERROR" => self.logger.error(&log.message),
                        "INFO" => self.logger.info(&log.message),
                        "WARN" => self.logger.warn(&log.message),
                        level => {
                            error!(level, "system error: unknown connector log level");
                        }
                    }
                }
                STATE_TYPE => {
                    let state = row
                        .state
                        .and_then(|state| state.data)
                        .ok_or_else(|| ParseError::MalformedState {
                            line: String::from_utf8_lossy(&line).into_owned(),
                        })?;
                    output.state = Some(state);
                }
                RECORD_TYPE => {
                    let record = row.record.ok_or_else(|| ParseError::MalformedRecord {
                        line: String::from_utf8_lossy(&line).into_owned(),
                    })?;
                    let data = record.data.ok_or_else(|| ParseError::MalformedRecord {
                        line: String::from_utf8_lossy(&line).into_owned(),
                    })?;

                    records += 1;
                    output
                        .streams
                        .entry(record.stream.clone())
                        .or_insert_with(|| StreamRepresentation {
                            namespace: None,
                            stream_name: record.stream.clone(),
                            batch_header: BatchHeader::new(&record.stream),
                            key_fields: Vec::new(),
                            objects: Vec::new(),
                            need_clean: false,
                        })
                        .objects
                        .push(data);
                }
                row_type => {
                    let message = format!(
                        "unknown connector output line type: {row_type} [{}]",
                        String::from_utf8_lossy(&line)
                    );
                    error!("{message}");
                    self.logger.error(&message);
                }
            }

            if records >= self.batch_size {
                self.consume_batch(&mut output).await?;
                records = 0;
            }
        }

        if records > 0 {
            self.consume_batch(&mut output).await?;
        }

        Ok(())
    }

    /// Hands the batch over; on success clears the already-persisted
    /// objects and drops the truncate markers so later batches append.
    async fn consume_batch(&self, output: &mut CliOutputRepresentation) -> Result<(), ParseError> {
        self.data_consumer
            .consume(output)
            .await
            .map_err(ParseError::Consume)?;

        for stream in output.streams.values_mut() {
            stream.objects = Vec::new();
            stream.need_clean = false;
        }

        Ok(())
    }
}

/// Picks the sync mode for a connector image: images in
/// `full_refresh_images` are forced to full refresh, otherwise incremental
/// is preferred when supported, otherwise the first supported mode. An
/// empty supported list defaults to incremental.
pub fn select_sync_mode(
    full_refresh_images: &[String],
    docker_image: &str,
    supported_modes: &[String],
) -> String {
    if full_refresh_images.iter().any(|image| image == docker_image) {
        return SYNC_MODE_FULL_REFRESH.to_string();
    }

    if supported_modes.is_empty() {
        return SYNC_MODE_INCREMENTAL.to_string();
    }

    if supported_modes
        .iter()
        .any(|mode| mode == SYNC_MODE_INCREMENTAL)
    {
        return SYNC_MODE_INCREMENTAL.to_string();
    }

    supported_modes[0].clone()
}

/// Database sources that don't support incremental sync yet.
pub fn default_full_refresh_images() -> Vec<String> {
    ["source-postgres", "source-mssql", "source-oracle", "source-mysql"]
        .into_iter()
        .map(String::from)
        .collect()
}
