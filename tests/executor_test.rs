//! Integration tests for query execution against SQLite.

use chrono::{DateTime, TimeZone, Utc};
use db_access_core::config::{PoolOptions, SecurityConfig};
use db_access_core::db::validator::ValidationRule;
use db_access_core::db::{
    ConnectionRegistry, GENERATED_KEY, QueryExecutor, StatementEvent, StatementOutcome,
    StatementSink, Verb,
};
use db_access_core::error::{ConstraintKind, DbError};
use db_access_core::models::{ConnectionConfig, QueryOptions, QueryParam, QueryRequest};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<StatementEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<StatementEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatementSink for RecordingSink {
    fn record(&self, event: &StatementEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn temp_db_path() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn setup_with(security: SecurityConfig) -> (QueryExecutor, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let registry = ConnectionRegistry::new(security).with_sink(sink.clone());
    registry
        .add(ConnectionConfig::sqlite("t1", temp_db_path()))
        .await
        .unwrap();
    let executor = QueryExecutor::new(registry);

    executor
        .execute(
            "t1",
            &QueryRequest::new(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT UNIQUE,
                    active BOOLEAN,
                    balance DECIMAL(10,2),
                    created_at TIMESTAMP,
                    note TEXT
                )",
            ),
        )
        .await
        .unwrap();
    (executor, sink)
}

async fn setup() -> (QueryExecutor, Arc<RecordingSink>) {
    setup_with(SecurityConfig::default().with_allowed_operations([
        "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "EXPLAIN", "CREATE",
    ]))
    .await
}

async fn insert_user(executor: &QueryExecutor, name: &str, email: &str) -> i64 {
    let result = executor
        .execute(
            "t1",
            &QueryRequest::new("INSERT INTO users (name, email) VALUES (?, ?)")
                .with_param(name)
                .with_param(email),
        )
        .await
        .unwrap();
    let update = result.as_update().unwrap();
    update.generated_keys[0][GENERATED_KEY].as_i64().unwrap()
}

#[tokio::test]
async fn test_select_one_as_x() {
    let (executor, _) = setup().await;
    let result = executor
        .execute("t1", &QueryRequest::new("SELECT 1 as x"))
        .await
        .unwrap();

    let rows = result.as_rows().unwrap();
    assert_eq!(rows.column_names(), vec!["x"]);
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0]["x"], json!(1));
    assert!(!rows.has_more);
}

#[tokio::test]
async fn test_scalar_types_round_trip() {
    let (executor, _) = setup().await;
    let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();

    let inserted = executor
        .execute(
            "t1",
            &QueryRequest::new(
                "INSERT INTO users (name, email, active, balance, created_at, note)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .with_param("Zoë")
            .with_param("zoe@example.com")
            .with_param(true)
            .with_param(Decimal::from_str("12.50").unwrap())
            .with_param(created_at)
            .with_param(QueryParam::Null),
        )
        .await
        .unwrap();
    let update = inserted.as_update().unwrap();
    assert_eq!(update.affected_rows, 1);
    let id = update.generated_keys[0][GENERATED_KEY].as_i64().unwrap();

    let result = executor
        .execute(
            "t1",
            &QueryRequest::new(
                "SELECT id, name, email, active, balance, created_at, note FROM users WHERE id = ?",
            )
            .with_param(id),
        )
        .await
        .unwrap();
    let rows = result.as_rows().unwrap();
    assert_eq!(rows.rows.len(), 1);
    let row = &rows.rows[0];

    assert_eq!(row["id"], json!(id));
    assert_eq!(row["name"], json!("Zoë"));
    assert_eq!(row["email"], json!("zoe@example.com"));
    assert_eq!(row["active"], json!(true));
    // no decimal storage class: numeric affinity keeps the value, not the scale
    assert_eq!(row["balance"].as_f64(), Some(12.5));
    let read_back = DateTime::parse_from_rfc3339(row["created_at"].as_str().unwrap()).unwrap();
    assert_eq!(read_back.with_timezone(&Utc), created_at);
    assert!(row["note"].is_null());

    // column order is preserved in every row
    let keys: Vec<&String> = row.keys().collect();
    assert_eq!(
        keys,
        vec!["id", "name", "email", "active", "balance", "created_at", "note"]
    );
}

#[tokio::test]
async fn test_returning_rows_become_generated_keys() {
    let (executor, _) = setup().await;
    let result = executor
        .execute(
            "t1",
            &QueryRequest::new("INSERT INTO users (name) VALUES (?), (?) RETURNING id, name")
                .with_param("a")
                .with_param("b"),
        )
        .await
        .unwrap();

    let update = result.as_update().unwrap();
    assert_eq!(update.affected_rows, 2);
    assert_eq!(update.generated_keys.len(), 2);
    assert_eq!(update.generated_keys[1]["name"], json!("b"));
}

#[tokio::test]
async fn test_update_reports_affected_rows_without_keys() {
    let (executor, _) = setup().await;
    insert_user(&executor, "a", "a@x").await;
    insert_user(&executor, "b", "b@x").await;

    let result = executor
        .execute(
            "t1",
            &QueryRequest::new("UPDATE users SET note = ? WHERE name IN ('a', 'b')")
                .with_param("seen"),
        )
        .await
        .unwrap();
    let update = result.as_update().unwrap();
    assert_eq!(update.affected_rows, 2);
    assert!(update.generated_keys.is_empty());
}

#[tokio::test]
async fn test_empty_result_still_has_columns() {
    let (executor, _) = setup().await;
    let result = executor
        .execute(
            "t1",
            &QueryRequest::new("SELECT id, name FROM users WHERE id = ?").with_param(-1),
        )
        .await
        .unwrap();
    let rows = result.as_rows().unwrap();
    assert!(rows.rows.is_empty());
    assert_eq!(rows.column_names(), vec!["id", "name"]);
}

#[tokio::test]
async fn test_duplicate_labels_are_disambiguated() {
    let (executor, _) = setup().await;
    let result = executor
        .execute("t1", &QueryRequest::new("SELECT 1 AS id, 2 AS id, 3 AS id"))
        .await
        .unwrap();
    let rows = result.as_rows().unwrap();
    assert_eq!(rows.column_names(), vec!["id", "id_2", "id_3"]);
    assert_eq!(rows.rows[0]["id_3"], json!(3));
    assert_eq!(rows.rows[0].len(), rows.columns.len());
}

#[tokio::test]
async fn test_row_caps_set_has_more() {
    let security = SecurityConfig::default()
        .with_allowed_operations(["SELECT", "INSERT", "CREATE"])
        .with_max_rows(3);
    let (executor, _) = setup_with(security).await;
    for i in 0..5 {
        insert_user(&executor, &format!("u{i}"), &format!("u{i}@x")).await;
    }

    let all = executor
        .execute("t1", &QueryRequest::new("SELECT * FROM users ORDER BY id"))
        .await
        .unwrap();
    let rows = all.as_rows().unwrap();
    assert_eq!(rows.rows.len(), 3);
    assert!(rows.has_more);

    let limited = executor
        .execute_with_limit("t1", &QueryRequest::new("SELECT * FROM users"), 2)
        .await
        .unwrap();
    assert_eq!(limited.row_count(), 2);
    assert!(limited.as_rows().unwrap().has_more);

    // fetch_size above max_rows is clamped
    let clamped = executor
        .execute_with_limit("t1", &QueryRequest::new("SELECT * FROM users"), 100)
        .await
        .unwrap();
    assert_eq!(clamped.row_count(), 3);

    let exact = executor
        .execute("t1", &QueryRequest::new("SELECT * FROM users LIMIT 3"))
        .await
        .unwrap();
    assert!(!exact.as_rows().unwrap().has_more);
}

#[tokio::test]
async fn test_batch_inserts_k_rows() {
    let (executor, sink) = setup().await;
    let params: Vec<Vec<QueryParam>> = (0..4)
        .map(|i| vec![format!("user{i}").into(), format!("user{i}@x").into()])
        .collect();

    let result = executor
        .execute_batch(
            "t1",
            "INSERT INTO users (name, email) VALUES (?, ?)",
            &params,
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    let batch = result.as_batch().unwrap();
    assert_eq!(batch.entries, vec![1, 1, 1, 1]);
    assert_eq!(batch.affected_rows, 4);

    let count = executor
        .execute("t1", &QueryRequest::new("SELECT COUNT(*) AS n FROM users"))
        .await
        .unwrap();
    assert_eq!(count.as_rows().unwrap().rows[0]["n"], json!(4));

    let inserts = sink
        .events()
        .into_iter()
        .filter(|e| e.verb == Verb::Insert)
        .count();
    assert_eq!(inserts, 4);
}

#[tokio::test]
async fn test_batch_failure_reports_completed_entries() {
    let (executor, _) = setup().await;
    let params = vec![
        vec![QueryParam::from("a"), QueryParam::from("same@x")],
        vec![QueryParam::from("b"), QueryParam::from("same@x")],
        vec![QueryParam::from("c"), QueryParam::from("c@x")],
    ];

    let err = executor
        .execute_batch(
            "t1",
            "INSERT INTO users (name, email) VALUES (?, ?)",
            &params,
            &QueryOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        DbError::BatchFailed {
            failed_index,
            completed,
            source,
        } => {
            assert_eq!(failed_index, 1);
            assert_eq!(completed, vec![1]);
            assert!(matches!(
                *source,
                DbError::ConstraintViolation {
                    kind: ConstraintKind::Unique,
                    ..
                }
            ));
        }
        other => panic!("expected BatchFailed, got {other:?}"),
    }

    // entries before the failure stay applied
    let count = executor
        .execute("t1", &QueryRequest::new("SELECT COUNT(*) AS n FROM users"))
        .await
        .unwrap();
    assert_eq!(count.as_rows().unwrap().rows[0]["n"], json!(1));
}

#[tokio::test]
async fn test_empty_batch_is_invalid_input() {
    let (executor, _) = setup().await;
    let result = executor
        .execute_batch(
            "t1",
            "INSERT INTO users (name) VALUES (?)",
            &[],
            &QueryOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_constraint_violation_names_constraint() {
    let (executor, _) = setup().await;
    insert_user(&executor, "a", "dup@x").await;

    let err = executor
        .execute(
            "t1",
            &QueryRequest::new("INSERT INTO users (name, email) VALUES (?, ?)")
                .with_param("b")
                .with_param("dup@x"),
        )
        .await
        .unwrap_err();
    match err {
        DbError::ConstraintViolation {
            kind, constraint, ..
        } => {
            assert_eq!(kind, ConstraintKind::Unique);
            assert_eq!(constraint.as_deref(), Some("users.email"));
        }
        other => panic!("expected ConstraintViolation, got {other:?}"),
    }

    let not_null = executor
        .execute(
            "t1",
            &QueryRequest::new("INSERT INTO users (name) VALUES (?)").with_param(QueryParam::Null),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        not_null,
        DbError::ConstraintViolation {
            kind: ConstraintKind::NotNull,
            ..
        }
    ));
}

#[tokio::test]
async fn test_driver_errors_are_classified() {
    let (executor, _) = setup().await;

    let missing = executor
        .execute("t1", &QueryRequest::new("SELECT * FROM nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(missing, DbError::TableNotFound { ref table, .. } if table == "nowhere"));

    let syntax = executor
        .execute("t1", &QueryRequest::new("SELECT FROM WHERE"))
        .await
        .unwrap_err();
    assert!(matches!(syntax, DbError::Syntax { .. }));
}

#[tokio::test]
async fn test_validation_rejects_before_execution() {
    let (executor, sink) = setup().await;
    let before = sink.events().len();

    let err = executor
        .execute("t1", &QueryRequest::new("DROP TABLE users"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::SecurityValidation {
            rule: ValidationRule::OperationNotAllowed(Verb::Drop)
        }
    ));

    let err = executor
        .execute("t1", &QueryRequest::new("SELECT 1; DELETE FROM users"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::SecurityValidation {
            rule: ValidationRule::MultipleStatements
        }
    ));

    // nothing reached the database
    assert_eq!(sink.events().len(), before);
}

#[tokio::test]
async fn test_read_only_connection_rejects_writes() {
    let registry = ConnectionRegistry::new(SecurityConfig::default());
    let path = temp_db_path();
    registry
        .add(ConnectionConfig::sqlite("ro", path).with_read_only(true))
        .await
        .unwrap();
    let executor = QueryExecutor::new(registry);

    let err = executor
        .execute("ro", &QueryRequest::new("INSERT INTO t VALUES (1)"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::SecurityValidation {
            rule: ValidationRule::ReadOnlyViolation(Verb::Insert)
        }
    ));

    let ok = executor
        .execute("ro", &QueryRequest::new("SELECT 1 AS one"))
        .await
        .unwrap();
    assert_eq!(ok.row_count(), 1);
}

#[tokio::test]
async fn test_timeout_discards_connection_and_pool_recovers() {
    let sink = Arc::new(RecordingSink::default());
    let registry = ConnectionRegistry::new(SecurityConfig::default()).with_sink(sink.clone());
    registry
        .add(
            ConnectionConfig::sqlite("slow", temp_db_path()).with_pool_options(PoolOptions {
                max_connections: Some(1),
                acquire_timeout_secs: Some(5),
                ..PoolOptions::default()
            }),
        )
        .await
        .unwrap();
    let executor = QueryExecutor::new(registry);

    let long_running = QueryRequest::new(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000000)
         SELECT COUNT(*) FROM c",
    )
    .with_timeout(Duration::from_millis(100));

    let err = executor.execute("slow", &long_running).await.unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));
    assert_eq!(
        sink.events().last().map(|e| e.outcome.clone()),
        Some(StatementOutcome::TimedOut)
    );

    // the single slot was freed by discarding, not by waiting for the query
    let next = executor
        .execute("slow", &QueryRequest::new("SELECT 2 AS two"))
        .await
        .unwrap();
    assert_eq!(next.as_rows().unwrap().rows[0]["two"], json!(2));
}

#[tokio::test]
async fn test_timed_out_insert_is_cancelled_not_committed() {
    let (executor, sink) = setup().await;
    executor
        .execute("t1", &QueryRequest::new("CREATE TABLE numbers (x INTEGER)"))
        .await
        .unwrap();

    let bulk = QueryRequest::new(
        "INSERT INTO numbers (x)
         WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000)
         SELECT x FROM c",
    )
    .with_timeout(Duration::from_millis(50));

    let err = executor.execute("t1", &bulk).await.unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));
    assert_eq!(
        sink.events().last().map(|e| e.outcome.clone()),
        Some(StatementOutcome::TimedOut)
    );

    // long enough for an uncancelled insert to have finished
    tokio::time::sleep(Duration::from_secs(3)).await;
    let count = executor
        .execute("t1", &QueryRequest::new("SELECT COUNT(*) AS n FROM numbers"))
        .await
        .unwrap();
    assert_eq!(count.as_rows().unwrap().rows[0]["n"], json!(0));
}

#[tokio::test]
async fn test_cte_led_insert_reports_affected_rows() {
    let (executor, _) = setup().await;
    let result = executor
        .execute(
            "t1",
            &QueryRequest::new(
                "WITH fresh AS (SELECT 'cte-a' AS n UNION ALL SELECT 'cte-b')
                 INSERT INTO users (name) SELECT n FROM fresh",
            ),
        )
        .await
        .unwrap();

    let update = result.as_update().unwrap();
    assert_eq!(update.affected_rows, 2);
    assert_eq!(update.generated_keys.len(), 1);

    let rows = executor
        .execute(
            "t1",
            &QueryRequest::new("SELECT name FROM users WHERE name LIKE 'cte-%' ORDER BY name"),
        )
        .await
        .unwrap();
    assert_eq!(rows.row_count(), 2);
}

#[tokio::test]
async fn test_sink_sees_each_statement_without_params() {
    let (executor, sink) = setup().await;
    insert_user(&executor, "secret-name", "secret@x").await;

    let events = sink.events();
    let insert = events.iter().find(|e| e.verb == Verb::Insert).unwrap();
    assert_eq!(insert.connection_id, "t1");
    assert_eq!(insert.param_count, 2);
    assert_eq!(insert.outcome, StatementOutcome::Succeeded { rows: 1 });
    assert!(!insert.digest.contains("secret"));
}

#[tokio::test]
async fn test_binary_columns() {
    let (executor, _) = setup().await;
    let encoded = executor
        .execute(
            "t1",
            &QueryRequest::new("SELECT ? AS data").with_param(b"hello".to_vec()),
        )
        .await
        .unwrap();
    assert_eq!(encoded.as_rows().unwrap().rows[0]["data"], json!("aGVsbG8="));

    let decoded = executor
        .execute(
            "t1",
            &QueryRequest::new("SELECT ? AS data")
                .with_param(b"hello".to_vec())
                .with_decode_binary(true),
        )
        .await
        .unwrap();
    assert_eq!(decoded.as_rows().unwrap().rows[0]["data"], json!("hello"));
}
