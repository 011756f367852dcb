// tests/graph_building.rs

use std::error::Error;
use std::time::Duration;

use taskgraph::dag::TaskGroup;
use taskgraph::errors::TaskGraphError;
use taskgraph::types::GroupState;
use taskgraph_test_utils::recording::{Journal, RecordingTask};
use taskgraph_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn position(order: &[String], key: &str) -> usize {
    order.iter().position(|k| k == key).unwrap()
}

#[tokio::test]
async fn cycle_is_rejected_and_graph_left_unchanged() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut a = TaskGroup::new(RecordingTask::new("A", &journal).shared());
        a.add_dependency(RecordingTask::new("B", &journal).shared())?;

        let mut b = TaskGroup::new(RecordingTask::new("B", &journal).shared());
        match b.add_dependency_task_group(&a) {
            Err(TaskGraphError::DagCycle(msg)) => assert!(msg.contains("cycle detected")),
            other => panic!("Expected DagCycle error, got: {:?}", other),
        }

        assert_eq!(b.len(), 1);
        assert!(!b.contains("A"));
        assert!(b.dependencies_of("B").is_empty());

        b.invoke_with_new_context().await?;
        assert_eq!(journal.started(), vec!["B"]);

        Ok(())
    })
    .await
}

#[test]
fn depending_on_own_key_is_a_cycle() {
    let journal = Journal::new();
    let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());

    let result = group.add_dependency(RecordingTask::new("R", &journal).shared());
    assert!(matches!(result, Err(TaskGraphError::DagCycle(_))));
    assert_eq!(group.len(), 1);
}

#[test]
fn cycle_through_post_run_edges_is_rejected() -> TestResult {
    let journal = Journal::new();

    let mut p = TaskGroup::new(RecordingTask::new("P", &journal).shared());
    p.add_post_run_dependent(RecordingTask::new("R", &journal).shared())?;

    let mut r = TaskGroup::new(RecordingTask::new("R", &journal).shared());
    let result = r.add_post_run_dependent_task_group(&p);

    assert!(matches!(result, Err(TaskGraphError::DagCycle(_))));
    assert_eq!(r.len(), 1);
    assert!(r.post_run_dependents_of("R").is_empty());
    Ok(())
}

#[test]
fn introspection_reports_edges_and_order() -> TestResult {
    let journal = Journal::new();

    let mut a = TaskGroup::new(RecordingTask::new("A", &journal).shared());
    a.add_dependency(RecordingTask::new("C", &journal).shared())?;

    let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
    assert_eq!(group.add_dependency_task_group(&a)?, "A");
    group.add_dependency(RecordingTask::new("B", &journal).shared())?;
    group.add_post_run_dependent(RecordingTask::new("P", &journal).shared())?;

    assert_eq!(group.key(), "R");
    assert_eq!(group.state(), GroupState::Built);

    let mut keys = group.keys();
    keys.sort();
    assert_eq!(keys, vec!["A", "B", "C", "P", "R"]);

    let mut deps = group.dependencies_of("R");
    deps.sort();
    assert_eq!(deps, vec!["A", "B"]);
    assert_eq!(group.dependents_of("C"), vec!["A"]);
    assert_eq!(group.post_run_dependents_of("R"), vec!["P"]);
    assert!(group.dependencies_of("missing").is_empty());

    let order = group.invocation_order()?;
    assert_eq!(order.len(), 5);
    assert!(position(&order, "C") < position(&order, "A"));
    assert!(position(&order, "A") < position(&order, "R"));
    assert!(position(&order, "B") < position(&order, "R"));
    assert!(position(&order, "R") < position(&order, "P"));

    // Merging copies: the source group is untouched.
    assert_eq!(a.len(), 2);
    Ok(())
}

#[tokio::test]
async fn abandoned_run_leaves_group_running_and_unmergeable() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut stuck = TaskGroup::new(RecordingTask::new("S", &journal).delay_ms(60_000).shared());
        let ctx = stuck.new_invocation_context();
        let outcome = tokio::time::timeout(Duration::from_millis(20), stuck.invoke(&ctx)).await;
        assert!(outcome.is_err());
        assert_eq!(stuck.state(), GroupState::Running);

        let mut other = TaskGroup::new(RecordingTask::new("O", &journal).shared());
        match other.add_dependency_task_group(&stuck) {
            Err(TaskGraphError::GroupNotMergeable { key, state }) => {
                assert_eq!(key, "S");
                assert_eq!(state, GroupState::Running);
            }
            other => panic!("Expected GroupNotMergeable error, got: {:?}", other),
        }
        assert_eq!(other.len(), 1);

        let again = stuck.invoke(&stuck.new_invocation_context()).await;
        assert!(matches!(again, Err(TaskGraphError::InvalidGroupState { .. })));

        let edge = stuck.add_dependency(RecordingTask::new("X", &journal).shared());
        assert!(matches!(edge, Err(TaskGraphError::InvalidGroupState { .. })));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn completed_group_can_be_merged_and_extended() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let mut done = TaskGroup::new(RecordingTask::new("D", &journal).shared());
        done.invoke_with_new_context().await?;
        assert_eq!(done.state(), GroupState::Done);

        done.add_dependency(RecordingTask::new("E", &journal).shared())?;
        let mut group = TaskGroup::new(RecordingTask::new("R", &journal).shared());
        group.add_dependency_task_group(&done)?;
        assert_eq!(group.len(), 3);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn late_wiring_adds_dependencies_before_the_run() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let late = RecordingTask::new("L", &journal).shared();
        let mut group = TaskGroup::new(
            RecordingTask::new("R", &journal)
                .late_dependency(late)
                .reads(&["L"])
                .shared(),
        );
        assert_eq!(group.len(), 1);

        let (_value, ctx) = group.invoke_with_new_context().await?;

        assert_eq!(group.len(), 2);
        assert_eq!(group.dependencies_of("R"), vec!["L"]);
        assert!(journal.settled_before_start("L", "R"));
        assert_eq!(journal.observed("R", "L"), Some(Some("L-out".to_string())));
        assert!(ctx.has_result("L"));

        // The hook runs again on the next invocation without duplicating L.
        group.invoke_with_new_context().await?;
        assert_eq!(group.len(), 2);
        assert_eq!(journal.start_count("L"), 2);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn late_wiring_of_nested_nodes_reaches_a_fixed_point() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let deepest = RecordingTask::new("L2", &journal).shared();
        let middle = RecordingTask::new("L1", &journal)
            .late_dependency(deepest)
            .shared();
        let mut group = TaskGroup::new(
            RecordingTask::new("R", &journal)
                .late_dependency(middle)
                .shared(),
        );

        group.invoke_with_new_context().await?;

        assert_eq!(journal.started(), vec!["L2", "L1", "R"]);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn late_wiring_cycle_fails_before_anything_runs() -> TestResult {
    with_timeout(async {
        init_tracing();
        let journal = Journal::new();

        let own_key = RecordingTask::new("R", &journal).shared();
        let mut group = TaskGroup::new(
            RecordingTask::new("R", &journal)
                .late_dependency(own_key)
                .shared(),
        );

        let result = group.invoke_with_new_context().await;
        assert!(matches!(result, Err(TaskGraphError::DagCycle(_))));
        assert_eq!(group.state(), GroupState::Built);
        assert!(journal.started().is_empty());

        Ok(())
    })
    .await
}
