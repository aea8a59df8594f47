//! Per-statement logging sink.
//!
//! The executor, coordinator and introspector report every statement they run
//! to a [`StatementSink`]. The core only emits events; persistence, rotation
//! and shipping belong to whoever implements the sink. [`TracingSink`] is the
//! default and forwards each event to `tracing`.

use crate::db::validator::Verb;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum length of a SQL digest in characters.
pub const DIGEST_MAX_CHARS: usize = 200;

/// How a statement ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatementOutcome {
    /// Rows returned or affected
    Succeeded { rows: u64 },
    /// Error code from [`DbError::code`](crate::error::DbError::code)
    Failed { code: &'static str },
    TimedOut,
}

/// One executed statement. Parameter values are never included.
#[derive(Debug, Clone, Serialize)]
pub struct StatementEvent {
    /// Correlation id for this statement
    pub id: Uuid,
    pub connection_id: String,
    pub verb: Verb,
    pub digest: String,
    pub param_count: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub outcome: StatementOutcome,
    pub timestamp: DateTime<Utc>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl StatementEvent {
    pub fn new(
        connection_id: &str,
        verb: Verb,
        sql: &str,
        param_count: usize,
        duration: Duration,
        outcome: StatementOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection_id: connection_id.to_string(),
            verb,
            digest: sql_digest(sql),
            param_count,
            duration,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Receives one event per executed statement.
///
/// Called on the executing task, so implementations should not block.
pub trait StatementSink: Send + Sync {
    fn record(&self, event: &StatementEvent);
}

/// Default sink: one `tracing` event per statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatementSink for TracingSink {
    fn record(&self, event: &StatementEvent) {
        let elapsed_ms = event.duration.as_millis() as u64;
        match &event.outcome {
            StatementOutcome::Succeeded { rows } => debug!(
                statement_id = %event.id,
                connection_id = %event.connection_id,
                verb = %event.verb,
                sql = %event.digest,
                params = event.param_count,
                elapsed_ms,
                rows,
                "Statement executed"
            ),
            StatementOutcome::Failed { code } => warn!(
                statement_id = %event.id,
                connection_id = %event.connection_id,
                verb = %event.verb,
                sql = %event.digest,
                params = event.param_count,
                elapsed_ms,
                code,
                "Statement failed"
            ),
            StatementOutcome::TimedOut => warn!(
                statement_id = %event.id,
                connection_id = %event.connection_id,
                verb = %event.verb,
                sql = %event.digest,
                params = event.param_count,
                elapsed_ms,
                "Statement timed out"
            ),
        }
    }
}

/// Collapse whitespace and truncate to [`DIGEST_MAX_CHARS`].
pub fn sql_digest(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= DIGEST_MAX_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(DIGEST_MAX_CHARS).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every event, for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<StatementEvent>>,
    }

    impl StatementSink for RecordingSink {
        fn record(&self, event: &StatementEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
