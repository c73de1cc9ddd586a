//! Per-command metrics.
//!
//! The dispatcher hands one [`CommandRecord`] per command to a
//! [`CommandMetrics`] sink. [`LogMetrics`] writes it as a structured log line;
//! with the `metrics` feature [`OtelMetrics`] also exports counters and
//! histograms through the global `OpenTelemetry` meter provider.

use std::time::Duration;

use tracing::{error, info};

use crate::error::ErrorClass;
use crate::flows::{ObjectType, Verb};

/// What happened to one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub object_type: ObjectType,
    pub verb: Verb,
    /// Acting registrar; `None` when the session was not logged in.
    pub client_id: Option<String>,
    /// Error class of a failed command, `None` on success.
    pub outcome: Option<ErrorClass>,
    /// Flow transactions started, retries included.
    pub attempts: u32,
    pub duration: Duration,
    /// The command failed on a broken storage invariant.
    pub integrity_violation: bool,
}

impl CommandRecord {
    pub const fn outcome_label(&self) -> &'static str {
        match self.outcome {
            Some(class) => class.as_str(),
            None => "success",
        }
    }
}

/// Sink for command records.
pub trait CommandMetrics: Send + Sync {
    fn record(&self, record: &CommandRecord);
}

/// Logs every record; integrity violations are logged as errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl CommandMetrics for LogMetrics {
    fn record(&self, record: &CommandRecord) {
        let client_id = record.client_id.as_deref().unwrap_or("-");
        if record.integrity_violation {
            error!(
                object = %record.object_type,
                verb = %record.verb,
                client_id,
                "Integrity alert: command hit a broken storage invariant"
            );
        }
        info!(
            object = %record.object_type,
            verb = %record.verb,
            client_id,
            outcome = record.outcome_label(),
            attempts = record.attempts,
            duration_ms = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX),
            "Command finished"
        );
    }
}

#[cfg(feature = "metrics")]
pub use otel::OtelMetrics;

#[cfg(feature = "metrics")]
mod otel {
    use opentelemetry::KeyValue;
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Histogram};

    use super::{CommandMetrics, CommandRecord, LogMetrics};

    /// Exports command counts, attempts and latency as `OpenTelemetry`
    /// instruments, and keeps logging through [`LogMetrics`].
    pub struct OtelMetrics {
        commands: Counter<u64>,
        attempts: Histogram<u64>,
        duration: Histogram<f64>,
        integrity_violations: Counter<u64>,
    }

    impl OtelMetrics {
        pub fn new() -> Self {
            let meter = global::meter("registry-engine");
            Self {
                commands: meter
                    .u64_counter("registry.commands")
                    .with_description("Dispatched registry commands")
                    .build(),
                attempts: meter
                    .u64_histogram("registry.command.attempts")
                    .with_description("Flow transactions per command, retries included")
                    .build(),
                duration: meter
                    .f64_histogram("registry.command.duration")
                    .with_unit("s")
                    .build(),
                integrity_violations: meter
                    .u64_counter("registry.integrity_violations")
                    .with_description("Commands refused by a storage invariant")
                    .build(),
            }
        }
    }

    impl Default for OtelMetrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CommandMetrics for OtelMetrics {
        fn record(&self, record: &CommandRecord) {
            LogMetrics.record(record);
            let attributes = [
                KeyValue::new("object", record.object_type.to_string()),
                KeyValue::new("verb", record.verb.to_string()),
                KeyValue::new(
                    "client_id",
                    record.client_id.clone().unwrap_or_else(|| "-".to_string()),
                ),
                KeyValue::new("outcome", record.outcome_label()),
            ];
            self.commands.add(1, &attributes);
            self.attempts
                .record(u64::from(record.attempts), &attributes);
            self.duration
                .record(record.duration.as_secs_f64(), &attributes);
            if record.integrity_violation {
                self.integrity_violations.add(1, &attributes);
            }
        }
    }
}
