// tests/fault_handling.rs

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use taskgraph::config::GraphOptions;
use taskgraph::dag::{FnTaskItem, Produced, RunState, TaskGroup, TaskItem};
use taskgraph::errors::TaskGraphError;
use taskgraph::types::FaultStrategy;
use taskgraph_test_utils::recording::{Journal, RecordingTask};
use taskgraph_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Post-run item that records the fault flag it saw while running.
fn flag_probe(key: &str, seen: &Arc<Mutex<Vec<bool>>>) -> Arc<dyn TaskItem> {
    let seen = Arc::clone(seen);
    FnTaskItem::shared(key, move |ctx| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(ctx.is_faulted());
            anyhow::Ok(Produced::void())
        }
    })
}

/// T -> (R -> A, B)
fn failing_branch(journal: &Journal, options: GraphOptions) -> Result<TaskGroup, TaskGraphError> {
    let mut r = TaskGroup::new(RecordingTask::new("R", journal).shared());
    r.add_dependency(RecordingTask::new("A", journal).failing("boom").shared())?;

    let mut top = TaskGroup::new(RecordingTask::new("T", journal).shared()).with_options(options);
    top.add_dependency_task_group(&r)?;
    top.add_dependency(RecordingTask::new("B", journal).delay_ms(20).shared())?;
    Ok(top)
}

#[tokio::test]
async fn failure_skips_dependents_and_keeps_independent_results() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut group = failing_branch(&journal, GraphOptions::default())?;
        group.add_post_run_dependent(flag_probe("cleanup", &seen))?;

        let ctx = group.new_invocation_context();
        let err = group.invoke(&ctx).await.unwrap_err();

        let fault = err.fault().expect("expected a recorded fault");
        assert_eq!(fault.key(), "A");
        assert!(fault.error().to_string().contains("boom"));

        assert_eq!(journal.start_count("R"), 0);
        assert_eq!(journal.start_count("T"), 0);
        assert_eq!(journal.finished(), vec!["B"]);
        assert_eq!(ctx.result_as::<String>("B")?.as_str(), "B-out");
        assert!(!ctx.has_result("R"));

        assert_eq!(ctx.run_state("A"), Some(RunState::Failed));
        assert_eq!(ctx.run_state("R"), Some(RunState::Skipped));
        assert_eq!(ctx.run_state("T"), Some(RunState::Skipped));
        assert_eq!(ctx.run_state("cleanup"), Some(RunState::Succeeded));

        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert!(ctx.post_run_failures().is_empty());

        Ok(())
    })
    .await
}

#[tokio::test]
async fn after_settlement_runs_once_on_every_node_with_fault_flag() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut group = failing_branch(&journal, GraphOptions::default())?;
        group.add_post_run_dependent(RecordingTask::new("P", &journal).shared())?;

        let ctx = group.new_invocation_context();
        assert!(group.invoke(&ctx).await.is_err());

        let mut settled = journal.settled();
        settled.sort();
        let expected: Vec<(String, bool)> = ["A", "B", "P", "R", "T"]
            .iter()
            .map(|k| (k.to_string(), true))
            .collect();
        assert_eq!(settled, expected);
        assert_eq!(journal.start_count("P"), 1);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn post_run_dependents_see_success_flag_when_nothing_failed() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_post_run_dependent(flag_probe("cleanup", &seen))?;
        group.add_post_run_dependent(RecordingTask::new("P", &journal).reads(&["R"]).shared())?;

        let ctx = group.new_invocation_context();
        group.invoke(&ctx).await?;

        assert_eq!(*seen.lock().unwrap(), vec![false]);
        assert!(journal.settled_before_start("R", "P"));
        assert_eq!(journal.observed("P", "R"), Some(Some("R-out".to_string())));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn continue_independent_starts_nodes_after_fault() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut group = failing_branch(&journal, GraphOptions::default())?;
        // B2 becomes eligible only after B, well after A failed.
        let mut b2 = TaskGroup::new(RecordingTask::new("B2", &journal).shared());
        b2.add_dependency(RecordingTask::new("B", &journal).shared())?;
        group.add_dependency_task_group(&b2)?;

        let ctx = group.new_invocation_context();
        assert!(group.invoke(&ctx).await.is_err());

        assert_eq!(journal.start_count("B2"), 1);
        assert_eq!(ctx.run_state("B2"), Some(RunState::Succeeded));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn drain_in_progress_starts_nothing_after_fault() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let options = GraphOptions {
            fault_strategy: FaultStrategy::DrainInProgress,
            ..GraphOptions::default()
        };
        let mut group = failing_branch(&journal, options)?;
        let mut b2 = TaskGroup::new(RecordingTask::new("B2", &journal).shared());
        b2.add_dependency(RecordingTask::new("B", &journal).shared())?;
        group.add_dependency_task_group(&b2)?;

        let ctx = group.new_invocation_context();
        assert!(group.invoke(&ctx).await.is_err());

        // B was already running and completes; B2 never starts.
        assert_eq!(journal.finished(), vec!["B"]);
        assert!(ctx.has_result("B"));
        assert_eq!(journal.start_count("B2"), 0);
        assert_eq!(ctx.run_state("B2"), Some(RunState::Skipped));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn first_failure_wins() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_dependency(RecordingTask::new("fast", &journal).failing("first").shared())?;
        group.add_dependency(
            RecordingTask::new("slow", &journal)
                .delay_ms(20)
                .failing("second")
                .shared(),
        )?;

        let ctx = group.new_invocation_context();
        let err = group.invoke(&ctx).await.unwrap_err();

        assert_eq!(err.fault().map(|f| f.key()), Some("fast"));
        assert_eq!(ctx.fault().map(|f| f.key().to_string()), Some("fast".to_string()));
        assert_eq!(ctx.run_state("slow"), Some(RunState::Failed));
        assert!(ctx.post_run_failures().is_empty());

        Ok(())
    })
    .await
}

#[tokio::test]
async fn post_run_failures_do_not_change_the_result() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_post_run_dependent(RecordingTask::new("P", &journal).failing("cleanup failed").shared())?;
        group.add_dependency(
            RecordingTask::new("A", &journal)
                .failing_after_settlement()
                .shared(),
        )?;

        let ctx = group.new_invocation_context();
        let value = group.invoke(&ctx).await?;

        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("R-out"));
        assert!(!ctx.is_faulted());

        let mut failed: Vec<String> = ctx
            .post_run_failures()
            .iter()
            .map(|f| f.key().to_string())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["A", "P"]);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn post_run_dependency_failure_skips_only_its_dependents() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        // P2 needs P1's result; Q only runs after P1 settles.
        let p1 = RecordingTask::new("P1", &journal).failing("nope").shared();
        let mut p2 = TaskGroup::new(RecordingTask::new("P2", &journal).shared());
        p2.add_dependency(Arc::clone(&p1))?;

        let mut p1_owner = TaskGroup::new(p1);
        p1_owner.add_post_run_dependent(RecordingTask::new("Q", &journal).shared())?;

        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_post_run_dependent_task_group(&p2)?;
        group.add_post_run_dependent_task_group(&p1_owner)?;

        let ctx = group.new_invocation_context();
        group.invoke(&ctx).await?;

        assert_eq!(ctx.run_state("P1"), Some(RunState::Failed));
        assert_eq!(ctx.run_state("P2"), Some(RunState::Skipped));
        assert_eq!(ctx.run_state("Q"), Some(RunState::Succeeded));
        assert!(journal.settled_before_start("P1", "Q"));
        assert_eq!(journal.start_count("P2"), 0);
        assert_eq!(ctx.post_run_failures().len(), 1);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn failed_post_run_owner_does_not_skip_its_target_in_the_primary_phase() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let b = RecordingTask::new("B", &journal).shared();
        let mut a = TaskGroup::new(
            RecordingTask::new("A", &journal)
                .delay_ms(20)
                .failing("owner down")
                .shared(),
        );
        a.add_post_run_dependent(Arc::clone(&b))?;

        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_dependency(b)?;
        group.add_dependency_task_group(&a)?;

        let ctx = group.new_invocation_context();
        let err = group.invoke(&ctx).await.unwrap_err();

        assert_eq!(err.fault().map(|fault| fault.key().to_string()).as_deref(), Some("A"));
        assert!(journal.settled_before_start("A", "B"));
        assert_eq!(ctx.run_state("B"), Some(RunState::Succeeded));
        assert_eq!(ctx.run_state("R"), Some(RunState::Skipped));
        assert_eq!(journal.start_count("R"), 0);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn reused_context_is_rejected_instead_of_reporting_stale_results() -> TestResult {
    with_timeout(async {
        init_tracing();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let mut group = TaskGroup::new(FnTaskItem::shared("R", move |_ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::Ok(Produced::new("first".to_string()))
                } else {
                    Err(anyhow::anyhow!("second run fails"))
                }
            }
        }));

        let ctx = group.new_invocation_context();
        assert!(!ctx.is_started());
        group.invoke(&ctx).await?;
        assert!(ctx.is_started());

        match group.invoke(&ctx).await {
            Err(TaskGraphError::ContextReused(run_id)) => assert_eq!(run_id, ctx.run_id()),
            other => panic!("Expected ContextReused error, got: {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.result_as::<String>("R")?.as_str(), "first");

        let fresh = group.new_invocation_context();
        let err = group.invoke(&fresh).await.unwrap_err();
        assert_eq!(err.fault().map(|fault| fault.key().to_string()).as_deref(), Some("R"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        Ok(())
    })
    .await
}
