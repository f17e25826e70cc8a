//! Metric names and emit helpers.
//!
//! All counters go through the `metrics` facade; the binary decides whether
//! an exporter is installed.

use metrics::{counter, gauge};

pub fn enqueued_event(queue_id: &str) {
    counter!("edp_events_enqueued_total", 1, "queue" => queue_id.to_string());
}

pub fn dequeued_event(queue_id: &str) {
    counter!("edp_events_dequeued_total", 1, "queue" => queue_id.to_string());
}

pub fn initial_queue_size(queue_id: &str, size: usize) {
    gauge!("edp_stream_queue_initial_size", size as f64, "queue" => queue_id.to_string());
}

pub fn queue_size(queue_id: &str, size: usize) {
    gauge!("edp_stream_queue_size", size as f64, "queue" => queue_id.to_string());
}

pub fn success_token_event(token_id: &str, destination_id: &str) {
    counter!("edp_destination_events_total", 1,
        "status" => "success", "token" => token_id.to_string(), "destination" => destination_id.to_string());
}

pub fn error_token_event(token_id: &str, destination_id: &str) {
    counter!("edp_destination_events_total", 1,
        "status" => "error", "token" => token_id.to_string(), "destination" => destination_id.to_string());
}

pub fn skip_token_event(token_id: &str, destination_id: &str) {
    counter!("edp_destination_events_total", 1,
        "status" => "skip", "token" => token_id.to_string(), "destination" => destination_id.to_string());
}
