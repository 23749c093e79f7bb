mod support;

use std::process::Command;
use std::sync::Arc;
use std::thread;

use assert_cmd::cargo::cargo_bin;
use ideaflow::clock::MockClock;
use ideaflow::memory_store::MemoryStore;
use ideaflow::persistence::IdeaFlowPersistence;
use ideaflow::service::IdeaFlowService;
use ideaflow::state::{Scope, StateType};
use ideaflow::state_machine::OpenStateRequest;
use ideaflow::task::NewTask;

use support::{parse_json, TestRoot};

const THREADS: usize = 8;
const ROUNDS: usize = 25;

#[test]
fn concurrent_opens_on_one_task_serialize() {
    let clock = Arc::new(MockClock::at_epoch());
    let service = Arc::new(IdeaFlowService::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
    ));
    let task = service.create_task(NewTask::new("contended")).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let service = Arc::clone(&service);
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    clock.advance_secs(1);
                    let state_type = StateType::ALL[(worker + round) % StateType::ALL.len()];
                    service
                        .open_state(task.id, OpenStateRequest::new(Scope::Primary, state_type))
                        .expect("open state");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let open = service.open_states(task.id).unwrap();
    assert_eq!(open.len(), 1);
    let closed = service.persistence().find_closed_states(task.id).unwrap();
    assert_eq!(closed.len(), THREADS * ROUNDS);

    let mut sequences: Vec<u64> = closed.iter().map(|state| state.sequence).collect();
    sequences.push(open[0].sequence);
    sequences.sort_unstable();
    let expected: Vec<u64> = (0..=(THREADS * ROUNDS) as u64).collect();
    assert_eq!(sequences, expected, "every open got a distinct sequence");

    for pair in closed.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlap: {:?} / {:?}", pair[0], pair[1]);
    }
}

#[test]
fn different_tasks_proceed_independently() {
    let clock = Arc::new(MockClock::at_epoch());
    let service = Arc::new(IdeaFlowService::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let task = service
                    .create_task(NewTask::new(format!("task-{worker}")))
                    .expect("create task");
                for _ in 0..ROUNDS {
                    service
                        .open_nested_state(task.id, Scope::Primary, StateType::Learning, None)
                        .expect("nest");
                    service
                        .close_state(task.id, Scope::Nested(1), None, None)
                        .expect("close nested");
                }
                service.end_task(task.id).expect("end task");
                task.id
            })
        })
        .collect();

    for handle in handles {
        let task_id = handle.join().expect("worker panicked");
        let tree = service.tree_timeline(task_id).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].children.len(), ROUNDS);
    }
}

#[test]
fn concurrent_cli_processes_share_one_task() {
    let root = TestRoot::new();
    let created = root.ifm_json(&["task", "new", "shared"]);
    let task_id = created["data"]["task"]["id"].as_u64().expect("task id");
    let task_arg = task_id.to_string();

    let children: Vec<_> = (0..THREADS)
        .map(|_| {
            Command::new(cargo_bin("ifm"))
                .env("IFM_ROOT", root.path())
                .args(["--quiet", "state", "open", &task_arg, "--type", "conflict"])
                .spawn()
                .expect("spawn ifm")
        })
        .collect();
    for mut child in children {
        let status = child.wait().expect("wait ifm");
        assert!(status.success());
    }

    let shown = root.ifm_json(&["task", "show", "shared"]);
    let open = shown["data"]["openStates"].as_array().expect("open states");
    assert_eq!(open.len(), 1);

    let archived = std::fs::read_to_string(
        root.data_dir()
            .join("tasks")
            .join(&task_arg)
            .join("states.jsonl"),
    )
    .unwrap();
    assert_eq!(archived.lines().count(), THREADS);

    let band = parse_json(
        &root
            .ifm()
            .args(["--json", "timeline", "band", &task_arg])
            .output()
            .unwrap()
            .stdout,
    );
    let segments: usize = band["data"]["bands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|band| band["segments"].as_array().unwrap().len())
        .sum();
    assert_eq!(segments, THREADS + 1);
}
