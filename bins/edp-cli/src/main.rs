//! # EDP CLI - Event Pipeline Runner
//!
//! Runs the EDP ingestion pipeline against configured destinations. Events
//! arrive as JSON lines on stdin, get routed by their `token` field into
//! the matching destination queues, and flow through the schema-reconciling
//! write path.
//!
//! ## Usage
//!
//! ```bash
//! # Run against a destinations config
//! edp-cli --config destinations.yml
//!
//! # Feed events
//! echo '{"token":"t1","event_id":"e1","page":"/home"}' | edp-cli -c destinations.yml
//!
//! # Enable debug logging
//! RUST_LOG=debug edp-cli --config destinations.yml
//! ```

mod adapter;
mod config;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edp_core::cache::{NoopEventsCache, ObjectLogger};
use edp_core::coordination::InProcessMonitor;
use edp_core::event::UniqueId;
use edp_io::consumer::QueueConsumer;
use edp_io::event_queue::EventQueue;
use edp_io::memory_queue::InMemoryQueue;
use edp_io::table_helper::TableHelper;
use edp_io::writer::DestinationWriter;

use crate::adapter::StdoutAdapter;

/// Command-line arguments for the EDP pipeline runner
#[derive(Parser, Debug)]
#[command(name = "edp-cli")]
#[command(about = "Event Data Pipeline Runner")]
struct Args {
    /// Destinations configuration: a YAML/JSON file path or an inline
    /// document. String values may use ${env.VAR} placeholders.
    #[arg(short, long)]
    config: String,
}

/// Routes archived and dead-lettered objects to the process log.
struct TracingObjectLogger {
    target: &'static str,
}

impl ObjectLogger for TracingObjectLogger {
    fn consume(&self, object: &Value, token_id: &str) {
        info!(target: "edp::objects", sink = self.target, token = token_id, %object);
    }

    fn consume_any(&self, object: Value) {
        warn!(target: "edp::objects", sink = self.target, %object);
    }

    fn close(&self) {}
}

struct Destination {
    token: String,
    queue: Arc<EventQueue>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let app_config = config::load(&args.config)?;

    let monitor = Arc::new(InProcessMonitor::new());

    let mut destinations: BTreeMap<String, Destination> = BTreeMap::new();
    let mut handles = Vec::new();

    for dest in &app_config.destinations {
        let sql_adapter = Arc::new(StdoutAdapter::new());
        let table_helper = Arc::new(TableHelper::new(
            sql_adapter.clone(),
            monitor.clone(),
            dest.pk_fields.clone(),
            dest.max_columns,
            true,
        ));

        let queue = Arc::new(EventQueue::new(
            "events",
            dest.id.clone(),
            Arc::new(InMemoryQueue::new()),
        ));

        let writer = Arc::new(DestinationWriter::new(
            dest.id.clone(),
            vec![(sql_adapter as Arc<dyn edp_core::adapter::SqlAdapter>, table_helper)],
            Arc::new(NoopEventsCache),
            Arc::new(TracingObjectLogger { target: "fallback" }),
            Arc::new(TracingObjectLogger { target: "archive" }),
        ));

        let consumer = QueueConsumer::new(
            queue.clone(),
            writer,
            UniqueId::new(&dest.unique_id_field),
            dest.table_name.clone(),
        );
        handles.push(tokio::spawn(async move { consumer.run().await }));

        destinations.insert(
            dest.id.clone(),
            Destination {
                token: dest.token.clone(),
                queue,
            },
        );

        info!(destination = %dest.id, table = %dest.table_name, "destination started");
    }

    // stdin ingestion: one JSON event per line, routed by token
    let ingest = {
        let destinations: Vec<(String, String, Arc<EventQueue>)> = destinations
            .iter()
            .map(|(id, dest)| (id.clone(), dest.token.clone(), dest.queue.clone()))
            .collect();

        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }

                let event: Value = match serde_json::from_str(&line) {
                    Ok(Value::Object(map)) => Value::Object(map),
                    Ok(_) | Err(_) => {
                        warn!("dropping line that is not a JSON object");
                        continue;
                    }
                };

                let token = match event.get("token").and_then(Value::as_str) {
                    Some(token) => token.to_string(),
                    None => {
                        warn!("dropping event without a token");
                        continue;
                    }
                };

                let payload = match event {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                };

                let mut routed = false;
                for (id, dest_token, queue) in &destinations {
                    if *dest_token == token {
                        queue.enqueue(payload.clone(), &token).await;
                        routed = true;
                        info!(destination = %id, "event enqueued");
                    }
                }
                if !routed {
                    warn!(%token, "no destination configured for token");
                }
            }
        })
    };

    signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");

    ingest.abort();
    for dest in destinations.values() {
        dest.queue.close();
    }
    for handle in handles {
        if let Err(err) = handle.await {
            error!(%err, "consumer task failed");
        }
    }

    Ok(())
}
