//! 操作生命周期测试
//!
//! 覆盖移动、超时、未知 ID 等场景，以及"每个终态操作恰好对应一条历史记录"。

use polctl_driver::sim::{MemoryCountsStore, SimBehavior, SimulatedController};
use polctl_driver::{
    Bridge, BridgeBuilder, BridgeConfig, DriverError, OperationState, Submitted,
};
use polctl_protocol::{Action, Direction, FailureKind, Party};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn bridge_with_timeout(sim: &SimulatedController, timeout_secs: u64) -> Bridge {
    let mut config = BridgeConfig::default();
    config.controller.timeout_secs = timeout_secs;
    config.controller.health_timeout_secs = 1;
    BridgeBuilder::new()
        .config(config)
        .connector(Arc::new(sim.clone()))
        .counts_store(Box::new(MemoryCountsStore::new()))
        .history_in_memory()
        .manual_telemetry()
        .build()
        .expect("Failed to build bridge")
}

fn operation_id(submitted: Submitted) -> String {
    match submitted {
        Submitted::Operation(id) => id.to_string(),
        Submitted::Immediate(outcome) => panic!("expected an operation, got {:?}", outcome),
    }
}

/// 轮询直到状态满足条件
fn poll_until(bridge: &Bridge, id: &str, wanted: OperationState, limit: Duration) -> OperationState {
    let deadline = Instant::now() + limit;
    loop {
        let state = bridge.status(id).unwrap().state;
        if state == wanted || Instant::now() >= deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_move_waveplate_running_then_completed() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(300));
    let bridge = bridge_with_timeout(&sim, 5);

    let action = Action::MoveWaveplate {
        party: Party::Alice,
        waveplate: "HWP1".to_string(),
        position: 45.0,
        direction: Direction::Goto,
    };
    let id = operation_id(bridge.execute(&action).unwrap());

    assert_eq!(
        poll_until(&bridge, &id, OperationState::Running, Duration::from_millis(250)),
        OperationState::Running
    );

    let op = bridge.wait(&id, Duration::from_secs(5)).unwrap();
    assert_eq!(op.state, OperationState::Completed);
    let outcome = op.outcome.unwrap();
    assert!(!outcome.is_error());
    assert_eq!(outcome.payload().unwrap()["message"]["position"], 45.0);

    let head = bridge.history().latest().unwrap();
    assert_eq!(head.command, "Move HWP1 to 45° on alice");
    assert!(!head.is_error);
    assert_eq!(sim.position(Party::Alice, "HWP1"), Some(45.0));
}

#[test]
fn test_silent_controller_times_out_after_deadline() {
    let sim = SimulatedController::new();
    sim.set_behavior("calibrate", SimBehavior::Silent);
    let bridge = bridge_with_timeout(&sim, 1);

    let start = Instant::now();
    let id = operation_id(bridge.execute(&Action::Calibrate { party: Party::Alice }).unwrap());

    assert_eq!(
        poll_until(&bridge, &id, OperationState::Running, Duration::from_millis(500)),
        OperationState::Running
    );

    let op = bridge.wait(&id, Duration::from_secs(5)).unwrap();
    let elapsed = start.elapsed();
    assert_eq!(op.state, OperationState::Failed);
    assert!(elapsed >= Duration::from_secs(1), "failed after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "failed after {:?}", elapsed);

    let failure = op.outcome.unwrap().failure_ref().cloned().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);

    let head = bridge.history().latest().unwrap();
    assert_eq!(head.command, "Calibrate Alice");
    assert!(head.is_error);
    assert!(head.response.starts_with("TimeoutError"));
}

#[test]
fn test_unknown_operation_id() {
    let sim = SimulatedController::new();
    let bridge = bridge_with_timeout(&sim, 5);
    assert!(matches!(
        bridge.status("unknown-id"),
        Err(DriverError::NotFound(id)) if id == "unknown-id"
    ));
}

#[test]
fn test_every_terminal_operation_has_one_history_entry() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(2));
    sim.set_behavior("set_power", SimBehavior::Reject("interlock open".to_string()));
    let bridge = bridge_with_timeout(&sim, 5);

    let actions = vec![
        Action::Home { party: Party::Alice },
        Action::SetPower { power: 0.4 },
        Action::SetPolarization {
            setting: "D".to_string(),
        },
        Action::SetPolarization {
            setting: "bogus".to_string(),
        },
        Action::SetBellAngles { angles: None },
    ];
    let ids: Vec<String> = actions
        .iter()
        .map(|action| operation_id(bridge.execute(action).unwrap()))
        .collect();

    let ops: Vec<_> = ids
        .iter()
        .map(|id| bridge.wait(id, Duration::from_secs(5)).unwrap())
        .collect();

    let history = bridge.history().list();
    assert_eq!(history.len(), ops.len());
    // 历史新的在前，与派发顺序相反
    for (op, entry) in ops.iter().zip(history.iter().rev()) {
        assert_eq!(entry.command, op.command.describe());
        assert_eq!(entry.is_error, op.state == OperationState::Failed);
    }

    let states: Vec<_> = ops.iter().map(|op| op.state).collect();
    assert_eq!(
        states,
        vec![
            OperationState::Completed,
            OperationState::Failed,
            OperationState::Completed,
            OperationState::Failed,
            OperationState::Completed,
        ]
    );
}

#[test]
fn test_concurrent_dispatch_order_is_execution_order() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(3));
    let bridge = Arc::new(bridge_with_timeout(&sim, 5));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                (0..5)
                    .map(|step| {
                        let action = Action::SetPower {
                            power: (worker * 5 + step) as f64 / 100.0,
                        };
                        let id = operation_id(bridge.execute(&action).unwrap());
                        let created = bridge.status(&id).unwrap().created_at;
                        (created, id)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut dispatched: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    dispatched.sort();

    let mut finished = Vec::new();
    for (_, id) in &dispatched {
        let op = bridge.wait(id, Duration::from_secs(10)).unwrap();
        finished.push((op.started_at.unwrap(), op.completed_at.unwrap()));
    }

    // 开始时间按登记顺序递增，且前一个结束后下一个才开始
    for pair in finished.windows(2) {
        assert!(pair[1].0 >= pair[0].1);
    }
    assert_eq!(sim.exchanges().len(), 20);
}

#[test]
fn test_summary_reports_running_operation() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(200));
    let bridge = bridge_with_timeout(&sim, 5);

    let id = operation_id(bridge.execute(&Action::Home { party: Party::Source }).unwrap());
    let _ = bridge.execute(&Action::Home { party: Party::Bob }).unwrap();
    poll_until(&bridge, &id, OperationState::Running, Duration::from_millis(150));

    let summary = bridge.operations().summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.running, 1);
    assert_eq!(summary.pending, 1);
    assert!(summary.healthy);
}
