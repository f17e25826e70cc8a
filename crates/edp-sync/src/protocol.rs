//! Line protocol emitted by CLI connectors.
//!
//! A connector child process writes one JSON object per stdout line:
//! `{"type": "LOG" | "RECORD" | "STATE", ...}`. Unknown top-level fields
//! are ignored; lines that are not JSON at all are treated as free-form
//! diagnostics, since connectors routinely print those to stdout too.

use serde::Deserialize;
use serde_json::Value;

use edp_core::event::Record;

pub const LOG_TYPE: &str = "LOG";
pub const RECORD_TYPE: &str = "RECORD";
pub const STATE_TYPE: &str = "STATE";

/// One stdout line of connector output.
#[derive(Debug, Deserialize)]
pub struct Row {
    #[serde(rename = "type", default)]
    pub row_type: String,
    #[serde(default)]
    pub log: Option<LogRow>,
    #[serde(default)]
    pub record: Option<RecordRow>,
    #[serde(default)]
    pub state: Option<StateRow>,
}

#[derive(Debug, Deserialize)]
pub struct LogRow {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordRow {
    #[serde(default)]
    pub stream: String,
    pub data: Option<Record>,
}

#[derive(Debug, Deserialize)]
pub struct StateRow {
    pub data: Option<Value>,
}
