use std::sync::Arc;
use std::time::Duration;

use stardag::task::{CreateSchemaSpec, LoadSpec, ValidateSpec};
use stardag::*;

fn executor(warehouse: &InMemoryWarehouse) -> Executor {
    let registry = StaticConnectionRegistry::new()
        .with("redshift", Credentials::new("postgres").with_host("localhost", 5439))
        .with("aws_credentials", Credentials::new("aws").with_login("AKIA", "secret"));
    let pool = ConnectionPool::new(Arc::new(warehouse.clone()), 4);
    Executor::new(Arc::new(registry), pool)
}

fn load(id: &str, table: &str, source: &str, mode: InsertMode) -> Task {
    Task::new(
        id,
        TaskKind::LoadDimension(LoadSpec {
            conn_id: "redshift".into(),
            table: table.into(),
            sql: format!("SELECT * FROM {}", source),
            insert_mode: mode,
        }),
    )
    .with_retry(RetryPolicy::none())
}

/// A -> B -> C and A -> D, each loading its own table from `staging`.
fn branching_graph() -> TaskGraph {
    let mut graph = TaskGraph::new();
    for id in ["a", "b", "c", "d"] {
        graph
            .add_task(load(id, &format!("table_{id}"), "staging", InsertMode::TruncateThenInsert))
            .unwrap();
    }
    graph.chain(&["a", "b", "c"]).unwrap();
    graph.add_edge("a", "d").unwrap();
    graph.validate().unwrap();
    graph
}

fn seeded_warehouse() -> InMemoryWarehouse {
    let warehouse = InMemoryWarehouse::new();
    warehouse.create_table("staging", 10);
    for t in ["table_a", "table_b", "table_c", "table_d"] {
        warehouse.create_table(t, 0);
    }
    warehouse
}

#[tokio::test]
async fn failure_skips_only_its_descendants() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_b", None, "XX000");

    let report = executor(&warehouse)
        .run(&branching_graph(), &mut RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.status_of("a"), Some(TaskStatus::Success));
    assert_eq!(report.status_of("b"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("c"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("d"), Some(TaskStatus::Success));

    let skipped = report.outcome("c").unwrap();
    assert_eq!(skipped.attempt_count, 0);
    assert_eq!(
        skipped.skip_reason,
        Some(SkipReason::UpstreamFailed {
            upstream: "b".into()
        })
    );
    assert_eq!(warehouse.row_count("table_c"), Some(0));
    assert_eq!(
        report.outcome("b").unwrap().error.as_ref().unwrap().kind,
        ErrorKind::Warehouse
    );
}

#[tokio::test]
async fn always_failing_task_is_attempted_retries_plus_one_times() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_a", None, "XX000");

    let mut graph = TaskGraph::new();
    graph
        .add_task(
            load("a", "table_a", "staging", InsertMode::Append)
                .with_retry(RetryPolicy::new(3, Duration::from_millis(1))),
        )
        .unwrap();
    graph.validate().unwrap();

    let report = executor(&warehouse)
        .run(&graph, &mut RunContext::new())
        .await
        .unwrap();

    let outcome = report.outcome("a").unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.attempt_count, 4);
    let attempts = warehouse
        .statements()
        .iter()
        .filter(|s| s.contains("table_a"))
        .count();
    assert_eq!(attempts, 4);
}

#[tokio::test]
async fn transient_failure_recovers_within_budget() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_a", Some(2), "57P01");

    let mut graph = TaskGraph::new();
    graph
        .add_task(
            load("a", "table_a", "staging", InsertMode::TruncateThenInsert)
                .with_retry(RetryPolicy::new(3, Duration::from_millis(1))),
        )
        .unwrap();
    graph.validate().unwrap();

    let report = executor(&warehouse)
        .run(&graph, &mut RunContext::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.outcome("a").unwrap().attempt_count, 3);
    assert_eq!(warehouse.row_count("table_a"), Some(10));
}

#[tokio::test]
async fn truncate_then_insert_is_idempotent() {
    let warehouse = seeded_warehouse();
    let mut graph = TaskGraph::new();
    graph
        .add_task(load("users", "table_a", "staging", InsertMode::TruncateThenInsert))
        .unwrap();
    graph.validate().unwrap();
    let executor = executor(&warehouse);

    executor.run(&graph, &mut RunContext::new()).await.unwrap();
    let once = warehouse.row_count("table_a");
    executor.run(&graph, &mut RunContext::new()).await.unwrap();

    assert_eq!(once, Some(10));
    assert_eq!(warehouse.row_count("table_a"), once);
}

#[tokio::test]
async fn append_duplicates_rows_on_rerun() {
    let warehouse = seeded_warehouse();
    let mut graph = TaskGraph::new();
    graph
        .add_task(load("events", "table_a", "staging", InsertMode::Append))
        .unwrap();
    graph.validate().unwrap();
    let executor = executor(&warehouse);

    executor.run(&graph, &mut RunContext::new()).await.unwrap();
    executor.run(&graph, &mut RunContext::new()).await.unwrap();

    assert_eq!(warehouse.row_count("table_a"), Some(20));
}

#[tokio::test]
async fn validation_names_every_failing_table() {
    let warehouse = InMemoryWarehouse::new();
    warehouse.create_table("users", 4);
    warehouse.create_table("songs", 0);
    warehouse.create_table("artists", 0);

    let mut graph = TaskGraph::new();
    graph
        .add_task(Task::new(
            "checks",
            TaskKind::Validate(ValidateSpec {
                conn_id: "redshift".into(),
                tables: vec!["users".into(), "songs".into(), "artists".into()],
                checks: vec![QualityCheck::has_rows()],
            }),
        ))
        .unwrap();
    graph.validate().unwrap();

    let report = executor(&warehouse)
        .run(&graph, &mut RunContext::new())
        .await
        .unwrap();

    let outcome = report.outcome("checks").unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.attempt_count, 1);
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.failing_tables, vec!["songs", "artists"]);
}

#[tokio::test]
async fn requested_skip_lets_downstream_run() {
    let warehouse = seeded_warehouse();
    let mut graph = TaskGraph::new();
    graph
        .add_task(Task::new(
            "schema",
            TaskKind::CreateSchema(CreateSchemaSpec {
                conn_id: "redshift".into(),
                sql: "CREATE TABLE should_not_exist (a int)".into(),
                skip: true,
            }),
        ))
        .unwrap();
    graph
        .add_task(load("a", "table_a", "staging", InsertMode::Append))
        .unwrap();
    graph.add_edge("schema", "a").unwrap();
    graph.validate().unwrap();

    let report = executor(&warehouse)
        .run(&graph, &mut RunContext::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.status_of("schema"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("a"), Some(TaskStatus::Success));
    assert_eq!(warehouse.row_count("should_not_exist"), None);
    assert_eq!(warehouse.sessions_opened(), 1);
}

#[tokio::test]
async fn unknown_connection_aborts_before_execution() {
    let warehouse = seeded_warehouse();
    let mut graph = TaskGraph::new();
    graph
        .add_task(Task::new(
            "a",
            TaskKind::LoadFact(LoadSpec {
                conn_id: "snowflake".into(),
                table: "table_a".into(),
                sql: "SELECT * FROM staging".into(),
                insert_mode: InsertMode::Append,
            }),
        ))
        .unwrap();
    graph.validate().unwrap();

    let result = executor(&warehouse).run(&graph, &mut RunContext::new()).await;

    match result {
        Err(StardagError::Connection(ConnectionError::NotFound { name })) => {
            assert_eq!(name, "snowflake")
        }
        other => panic!("unexpected: {:?}", other.map(|r| r.status)),
    }
    assert!(warehouse.statements().is_empty());
}

#[tokio::test]
async fn unvalidated_graph_is_rejected() {
    let warehouse = seeded_warehouse();
    let mut graph = TaskGraph::new();
    graph.add_task(Task::no_op("a")).unwrap();

    let result = executor(&warehouse).run(&graph, &mut RunContext::new()).await;
    assert!(matches!(result, Err(StardagError::NotValidated)));
}

#[tokio::test]
async fn cancelled_run_starts_nothing() {
    let warehouse = seeded_warehouse();
    let mut ctx = RunContext::new();
    ctx.cancel();

    let report = executor(&warehouse)
        .run(&branching_graph(), &mut ctx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.tasks_with_status(TaskStatus::Skipped).len(), 4);
    assert!(warehouse.statements().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_retry_backoff() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_a", None, "XX000");

    let mut graph = TaskGraph::new();
    graph
        .add_task(
            load("a", "table_a", "staging", InsertMode::Append)
                .with_retry(RetryPolicy::new(5, Duration::from_secs(3600))),
        )
        .unwrap();
    graph.add_task(load("b", "table_b", "staging", InsertMode::Append)).unwrap();
    graph.add_edge("a", "b").unwrap();
    graph.validate().unwrap();

    let mut ctx = RunContext::new();
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let report = executor(&warehouse).run(&graph, &mut ctx).await.unwrap();

    let failed = report.outcome("a").unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.error.as_ref().unwrap().message.contains("cancelled"));
    assert_eq!(report.status_of("b"), Some(TaskStatus::Skipped));
    assert_eq!(report.status, RunStatus::Failed);
}

#[tokio::test]
async fn every_session_is_released() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_b", None, "XX000");

    executor(&warehouse)
        .run(&branching_graph(), &mut RunContext::new())
        .await
        .unwrap();

    assert_eq!(warehouse.sessions_opened(), 3);
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn outcomes_are_recorded_in_the_context() {
    let warehouse = seeded_warehouse();
    let mut ctx = RunContext::new().with_run_id("scheduled__2019-01-12T00:00:00");

    let report = executor(&warehouse)
        .run(&branching_graph(), &mut ctx)
        .await
        .unwrap();

    assert_eq!(report.run_id, "scheduled__2019-01-12T00:00:00");
    assert_eq!(ctx.task_outcomes.len(), 4);
    assert_eq!(ctx.outcome("a").unwrap().rows_affected, 10);
    assert!(ctx.resolved_connections.contains_key("redshift"));
    assert_eq!(report.execution_order.first().map(String::as_str), Some("a"));
}

#[tokio::test]
async fn tasks_queued_for_a_slot_are_skipped_on_cancellation() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_", None, "XX000");

    let mut graph = TaskGraph::new();
    for id in ["a", "b", "c"] {
        graph
            .add_task(
                load(id, &format!("table_{id}"), "staging", InsertMode::Append)
                    .with_retry(RetryPolicy::new(5, Duration::from_secs(3600))),
            )
            .unwrap();
    }
    graph.validate().unwrap();

    let mut ctx = RunContext::new();
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let report = executor(&warehouse)
        .with_max_parallelism(1)
        .run(&graph, &mut ctx)
        .await
        .unwrap();

    assert_eq!(warehouse.statements().len(), 1);
    assert_eq!(report.tasks_with_status(TaskStatus::Failed).len(), 1);
    let skipped = report.tasks_with_status(TaskStatus::Skipped);
    assert_eq!(skipped.len(), 2);
    for id in skipped {
        let outcome = report.outcome(id).unwrap();
        assert_eq!(outcome.skip_reason, Some(SkipReason::Cancelled));
        assert_eq!(outcome.attempt_count, 0);
    }
    assert_eq!(report.status, RunStatus::Failed);
}

#[tokio::test]
async fn reused_context_starts_from_fresh_outcomes() {
    let warehouse = seeded_warehouse();
    warehouse.fail_on("table_b", None, "XX000");
    let executor = executor(&warehouse);
    let mut ctx = RunContext::new();

    let first = executor.run(&branching_graph(), &mut ctx).await.unwrap();
    assert_eq!(first.status, RunStatus::Failed);

    let mut graph = TaskGraph::new();
    graph
        .add_task(load("d", "table_d", "staging", InsertMode::TruncateThenInsert))
        .unwrap();
    graph.validate().unwrap();

    let second = executor.run(&graph, &mut ctx).await.unwrap();
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.outcomes.len(), 1);
    assert_eq!(ctx.task_outcomes.len(), 1);
    assert!(ctx.outcome("b").is_none());
}
