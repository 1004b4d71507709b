//! 链路串行化验证测试
//!
//! 验证所有命令经同一队列逐条到达控制器：
//! - 到达顺序与提交顺序一致
//! - 任意两条命令的执行区间不重叠
//! - 两条 100ms 的命令总耗时不少于 200ms

use polctl_driver::sim::{MemoryCountsStore, SimulatedController};
use polctl_driver::{BridgeBuilder, HistoryLog, LinkConfig, MessagingClient, Submitted};
use polctl_protocol::{Action, Command, Direction, Party};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn client(sim: &SimulatedController) -> (Arc<MessagingClient>, Arc<HistoryLog>) {
    let history = Arc::new(HistoryLog::in_memory(200));
    let client = MessagingClient::new(
        Arc::new(sim.clone()),
        Arc::clone(&history),
        LinkConfig {
            timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(1),
        },
    )
    .expect("Failed to start link worker");
    (Arc::new(client), history)
}

#[test]
fn test_back_to_back_operations_are_serialized() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(100));
    let bridge = BridgeBuilder::new()
        .connector(Arc::new(sim.clone()))
        .counts_store(Box::new(MemoryCountsStore::new()))
        .history_in_memory()
        .manual_telemetry()
        .build()
        .expect("Failed to build bridge");

    let start = Instant::now();
    let first = match bridge.execute(&Action::Home { party: Party::Alice }).unwrap() {
        Submitted::Operation(id) => id,
        Submitted::Immediate(_) => panic!("home is a slow action"),
    };
    let second = match bridge
        .execute(&Action::Calibrate { party: Party::Bob })
        .unwrap()
    {
        Submitted::Operation(id) => id,
        Submitted::Immediate(_) => panic!("calibrate is a slow action"),
    };

    bridge.wait(first.as_str(), Duration::from_secs(5)).unwrap();
    bridge.wait(second.as_str(), Duration::from_secs(5)).unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(200),
        "two 100ms commands finished in {:?}",
        elapsed
    );

    // 历史新的在前，按派发顺序：先 Home 后 Calibrate
    let commands: Vec<_> = bridge.history().list().into_iter().map(|e| e.command).collect();
    assert_eq!(commands, vec!["Calibrate Bob", "Home Alice"]);
    assert_eq!(sim.received_commands(), vec!["home", "calibrate"]);
}

#[test]
fn test_concurrent_senders_never_overlap() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(10));
    let (client, history) = client(&sim);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for step in 0..5 {
                    let action = Action::MoveWaveplate {
                        party: Party::Alice,
                        waveplate: "QWP1".to_string(),
                        position: (worker * 10 + step) as f64,
                        direction: Direction::Goto,
                    };
                    assert!(!client.send(action.to_command()).is_error());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let exchanges = sim.exchanges();
    assert_eq!(exchanges.len(), 20);
    for pair in exchanges.windows(2) {
        assert!(
            pair[1].started >= pair[0].finished,
            "command {} started before {} finished",
            pair[1].command,
            pair[0].command
        );
    }
    assert_eq!(history.len(), 20);
}

#[test]
fn test_arrival_order_matches_submit_order() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(5));
    let (client, _history) = client(&sim);

    let pending: Vec<_> = (0..10)
        .map(|i| {
            client
                .submit(Command::new("set_power").with_param("power", i as f64 / 10.0), None)
                .unwrap()
        })
        .collect();
    for reply in pending {
        assert!(!reply.wait().is_error());
    }

    let powers: Vec<f64> = sim
        .exchanges()
        .iter()
        .map(|e| e.params["power"].as_f64().unwrap())
        .collect();
    let expected: Vec<f64> = (0..10).map(|i| i as f64 / 10.0).collect();
    assert_eq!(powers, expected);
}

#[test]
fn test_queue_drains_on_drop() {
    let sim = SimulatedController::new().with_latency(Duration::from_millis(20));
    let (client, history) = client(&sim);

    for _ in 0..3 {
        client.submit(Command::new("test"), None).unwrap();
    }
    let client = Arc::try_unwrap(client).ok().expect("client still shared");
    drop(client);

    assert_eq!(sim.received_commands().len(), 3);
    assert_eq!(history.len(), 3);
}
