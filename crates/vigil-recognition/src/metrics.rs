//! Recognition metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const RECOGNITION_DURATION_SECONDS: &str = "vigil_recognition_duration_seconds";
    pub const RECOGNITION_FAILURES_TOTAL: &str = "vigil_recognition_failures_total";
    pub const RECOGNITION_RESULTS_TOTAL: &str = "vigil_recognition_results_total";
    pub const ALERTS_SUPPRESSED_TOTAL: &str = "vigil_alerts_cooldown_suppressed_total";
}

pub fn record_recognition(matcher: &'static str, outcome: &'static str, duration_secs: f64) {
    let labels = [("matcher", matcher), ("outcome", outcome)];
    counter!(names::RECOGNITION_RESULTS_TOTAL, &labels).increment(1);
    histogram!(names::RECOGNITION_DURATION_SECONDS, "matcher" => matcher).record(duration_secs);
}

pub fn record_failure(matcher: &'static str) {
    counter!(names::RECOGNITION_FAILURES_TOTAL, "matcher" => matcher).increment(1);
}

pub fn record_suppressed() {
    counter!(names::ALERTS_SUPPRESSED_TOTAL).increment(1);
}
