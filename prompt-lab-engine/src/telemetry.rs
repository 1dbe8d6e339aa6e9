//! Engine metrics, emitted through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use prompt_lab_core::{ResultStatus, TaskStatus};

pub const ITEMS_TOTAL: &str = "prompt_lab_items_total";
pub const ITEM_LATENCY_MS: &str = "prompt_lab_item_latency_ms";
pub const RUNS_TOTAL: &str = "prompt_lab_runs_total";

/// Registers descriptions with the installed recorder. Call once after installing it.
pub fn describe_metrics() {
    describe_counter!(ITEMS_TOTAL, Unit::Count, "Work items settled, by result status");
    describe_histogram!(ITEM_LATENCY_MS, Unit::Milliseconds, "Latency of settled work items");
    describe_counter!(RUNS_TOTAL, Unit::Count, "Task runs finished, by final status");
}

pub fn record_item(status: ResultStatus, latency_ms: u64) {
    counter!(ITEMS_TOTAL, "status" => status.as_str()).increment(1);
    histogram!(ITEM_LATENCY_MS).record(latency_ms as f64);
}

pub fn record_run(outcome: TaskStatus) {
    counter!(RUNS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}
