//! Property-based tests for the state machine.
//!
//! Random command sequences, including out-of-order and future close times,
//! must leave a task with one open state per scope, nested states inside
//! their parents, and every state in exactly one band.

mod support;

use std::collections::BTreeMap;

use chrono::Duration;
use ideaflow::clock::{Clock, MockClock};
use ideaflow::error::Error;
use ideaflow::persistence::IdeaFlowPersistence;
use ideaflow::service::IdeaFlowService;
use ideaflow::state::{Scope, StateType};
use ideaflow::state_machine::OpenStateRequest;
use ideaflow::task::{NewTask, TaskId};
use ideaflow::timeline::TimelineNode;
use proptest::prelude::*;

use support::memory_service;

#[derive(Debug, Clone, Copy)]
enum EndTime {
    Now,
    SecondsAgo(i64),
    SecondsAhead(i64),
}

#[derive(Debug, Clone)]
enum Command {
    Open {
        scope: Scope,
        state_type: StateType,
        link: bool,
    },
    Nest {
        parent: Scope,
        state_type: StateType,
    },
    Close {
        scope: Scope,
        end: EndTime,
    },
    Subtask,
    Note,
    EndTask,
    Advance(i64),
}

fn scope_strategy() -> impl Strategy<Value = Scope> {
    prop_oneof![
        Just(Scope::Primary),
        Just(Scope::Subtask),
        Just(Scope::Nested(1)),
        Just(Scope::Nested(2)),
    ]
}

fn parent_strategy() -> impl Strategy<Value = Scope> {
    prop_oneof![
        Just(Scope::Primary),
        Just(Scope::Subtask),
        Just(Scope::Nested(1)),
    ]
}

fn state_type_strategy() -> impl Strategy<Value = StateType> {
    prop::sample::select(StateType::ALL.to_vec())
}

fn end_time_strategy() -> impl Strategy<Value = EndTime> {
    prop_oneof![
        Just(EndTime::Now),
        (0i64..40).prop_map(EndTime::SecondsAgo),
        (1i64..10).prop_map(EndTime::SecondsAhead),
    ]
}

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        3 => (scope_strategy(), state_type_strategy(), any::<bool>()).prop_map(
            |(scope, state_type, link)| Command::Open {
                scope,
                state_type,
                link,
            }
        ),
        3 => (parent_strategy(), state_type_strategy())
            .prop_map(|(parent, state_type)| Command::Nest { parent, state_type }),
        3 => (scope_strategy(), end_time_strategy())
            .prop_map(|(scope, end)| Command::Close { scope, end }),
        1 => Just(Command::Subtask),
        1 => Just(Command::Note),
        1 => Just(Command::EndTask),
        3 => (0i64..30).prop_map(Command::Advance),
    ]
}

fn apply(
    service: &IdeaFlowService,
    clock: &MockClock,
    task_id: TaskId,
    command: &Command,
) -> Result<(), TestCaseError> {
    let now = clock.now();
    let result = match command {
        Command::Open {
            scope,
            state_type,
            link,
        } => service
            .open_state(
                task_id,
                OpenStateRequest::new(*scope, *state_type).linked(*link),
            )
            .map(|_| ()),
        Command::Nest { parent, state_type } => service
            .open_nested_state(task_id, *parent, *state_type, None)
            .map(|_| ()),
        Command::Close { scope, end } => {
            let end_time = match end {
                EndTime::Now => None,
                EndTime::SecondsAgo(secs) => Some(now - Duration::seconds(*secs)),
                EndTime::SecondsAhead(secs) => Some(now + Duration::seconds(*secs)),
            };
            match service.close_state(task_id, *scope, end_time, None) {
                Ok(closed) => {
                    let expected = end_time.unwrap_or(now);
                    for state in &closed {
                        prop_assert_eq!(state.end, expected, "closed off the requested end");
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        Command::Subtask => service.add_subtask(task_id, "subtask").map(|_| ()),
        Command::Note => service.add_note(task_id, "note").map(|_| ()),
        Command::EndTask => service.end_task(task_id).map(|_| ()),
        Command::Advance(secs) => {
            clock.advance_secs(*secs);
            Ok(())
        }
    };

    match result {
        Ok(()) | Err(Error::PreconditionViolation(_)) => Ok(()),
        Err(other) => Err(TestCaseError::fail(format!(
            "{command:?} failed with {other:?}"
        ))),
    }
}

fn check_tree_containment(node: &TimelineNode) -> Result<(), TestCaseError> {
    for child in &node.children {
        prop_assert!(
            child.band.start_offset >= node.band.start_offset
                && child.band.end_offset <= node.band.end_offset,
            "child {:?} escapes parent {:?}",
            child.band,
            node.band
        );
        prop_assert!(child.band.depth > node.band.depth);
        check_tree_containment(child)?;
    }
    Ok(())
}

fn check_invariants(service: &IdeaFlowService, task_id: TaskId) -> Result<(), TestCaseError> {
    let open = service.open_states(task_id).unwrap();
    let closed = service.persistence().find_closed_states(task_id).unwrap();

    let mut scopes: Vec<Scope> = open.iter().map(|state| state.scope).collect();
    scopes.sort();
    scopes.dedup();
    prop_assert_eq!(scopes.len(), open.len(), "two open states share a scope");

    for state in open.iter().filter(|state| state.scope.is_nested()) {
        let parent = state.parent_scope.expect("nested state has a parent");
        let parent_state = open.iter().find(|candidate| candidate.scope == parent);
        prop_assert!(parent_state.is_some(), "dangling nested state {:?}", state);
        prop_assert!(parent_state.is_some_and(|outer| outer.start <= state.start));
    }

    let mut by_scope: BTreeMap<Scope, Vec<_>> = BTreeMap::new();
    for state in &closed {
        prop_assert!(state.end >= state.start, "negative span {:?}", state);
        by_scope.entry(state.scope).or_default().push((state.sequence, state.start, state.end));
    }
    for state in &open {
        by_scope.entry(state.scope).or_default().push((state.sequence, state.start, state.start));
    }
    for (scope, mut spans) in by_scope {
        spans.sort();
        for pair in spans.windows(2) {
            prop_assert!(
                pair[0].2 <= pair[1].1,
                "overlap in {}: {:?} / {:?}",
                scope,
                pair[0],
                pair[1]
            );
        }
    }

    let band = service.band_timeline(task_id).unwrap();
    let segments: usize = band.bands.iter().map(|band| band.segments.len()).sum();
    prop_assert_eq!(segments, closed.len() + open.len());

    let tree = service.tree_timeline(task_id).unwrap();
    for node in &tree.nodes {
        prop_assert!(!node.band.is_nested, "nested band promoted: {:?}", node.band);
        check_tree_containment(node)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_every_command(
        commands in prop::collection::vec(command_strategy(), 1..40)
    ) {
        let (service, clock) = memory_service();
        let task = service.create_task(NewTask::new("random walk")).unwrap();

        for command in &commands {
            apply(&service, &clock, task.id, command)?;
            check_invariants(&service, task.id)?;
        }

        service.end_task(task.id).unwrap();
        prop_assert!(service.open_states(task.id).unwrap().is_empty());
        check_invariants(&service, task.id)?;
    }
}
