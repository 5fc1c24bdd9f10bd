use std::sync::{Arc, Mutex};
use std::time::Duration;

use robot_link::core::bluetooth::constants::{GATT_CONN_TIMEOUT, GATT_ERROR};
use robot_link::core::bluetooth::{ConnectionState, Endpoint, LinkOp, MockLink, MotorPort};
use robot_link::{ConnectionManager, Device, LinkConfig, LinkError};

fn robot() -> Device {
    Device::new("robot-1", "Robot", "AA:BB:CC:DD:EE:01")
}

fn recorder(manager: &ConnectionManager) -> Arc<Mutex<Vec<bool>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.register_connection_listener(move |connected: bool| {
        sink.lock().unwrap().push(connected);
    });
    events
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_three_spaced_attempts() {
    let link = Arc::new(MockLink::new().failing_connect(GATT_ERROR));
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let events = recorder(&manager);

    let err = manager.connect(&robot()).await.unwrap_err();
    assert!(matches!(err, LinkError::Connection { status: GATT_ERROR }));

    let attempts = link.connect_attempts();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }

    // only the replay on registration, never a "connected" edge
    assert_eq!(*events.lock().unwrap(), vec![false]);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_recovers_on_third_attempt() {
    let link = Arc::new(MockLink::new().failing_connect_times(2, GATT_ERROR));
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let events = recorder(&manager);

    manager.connect(&robot()).await.unwrap();

    assert_eq!(link.connect_attempts().len(), 3);
    assert_eq!(*events.lock().unwrap(), vec![false, true]);
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(manager.device(), Some(robot()));
    assert_eq!(manager.negotiated_mtu(), Some(512));

    let ops = link.ops();
    let last_connect = ops
        .iter()
        .rposition(|op| matches!(op, LinkOp::Connect(_)))
        .unwrap();
    assert_eq!(
        ops[last_connect + 1..],
        [
            LinkOp::BindEndpoints,
            LinkOp::RequestHighPriority,
            LinkOp::RequestMtu(512),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn overall_timeout_is_reported_as_connection_timeout() {
    let link = Arc::new(MockLink::new().failing_connect(GATT_ERROR));
    let config = LinkConfig {
        connect_timeout_ms: 150,
        connect_retry_delay_ms: 100,
        ..LinkConfig::default()
    };
    let manager = ConnectionManager::new(link.clone(), config);

    let err = manager.connect(&robot()).await.unwrap_err();
    assert!(matches!(err, LinkError::Connection { status: GATT_CONN_TIMEOUT }));
    assert_eq!(link.connect_attempts().len(), 2);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn mtu_falls_back_when_exchange_fails() {
    let link = Arc::new(MockLink::new().with_failing_mtu());
    let manager = ConnectionManager::new(link, LinkConfig::default());

    manager.connect(&robot()).await.unwrap();
    assert_eq!(manager.negotiated_mtu(), Some(256));
}

#[tokio::test(start_paused = true)]
async fn granted_mtu_is_used() {
    let link = Arc::new(MockLink::new().with_mtu(185));
    let manager = ConnectionManager::new(link, LinkConfig::default());

    manager.connect(&robot()).await.unwrap();
    assert_eq!(manager.negotiated_mtu(), Some(185));
}

#[tokio::test(start_paused = true)]
async fn missing_required_endpoint_fails_the_connection() {
    let link = Arc::new(MockLink::new().without_endpoint(Endpoint::LiveControl));
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());

    let err = manager.connect(&robot()).await.unwrap_err();
    assert!(matches!(err, LinkError::Connection { status: GATT_ERROR }));
    assert_eq!(link.connect_attempts().len(), 3);
    assert!(!manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn missing_optional_endpoint_is_tolerated() {
    let link = Arc::new(MockLink::new().without_endpoint(Endpoint::Motor(MotorPort::M4)));
    let manager = ConnectionManager::new(link, LinkConfig::default());

    manager.connect(&robot()).await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn late_listener_is_told_the_current_state() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link, LinkConfig::default());
    manager.connect(&robot()).await.unwrap();

    let events = recorder(&manager);
    assert_eq!(*events.lock().unwrap(), vec![true]);

    manager.disconnect().await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn unregistered_listener_hears_nothing_more() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link, LinkConfig::default());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let id = manager.register_connection_listener(move |connected: bool| {
        sink.lock().unwrap().push(connected);
    });
    manager.unregister_connection_listener(id);

    manager.connect(&robot()).await.unwrap();
    manager.disconnect().await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let events = recorder(&manager);

    manager.disconnect().await.unwrap();
    assert!(link.ops().is_empty());

    manager.connect(&robot()).await.unwrap();
    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();

    let disconnects = link
        .ops()
        .into_iter()
        .filter(|op| *op == LinkOp::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
    assert_eq!(*events.lock().unwrap(), vec![false, true, false]);
    assert_eq!(manager.negotiated_mtu(), None);
}

#[tokio::test(start_paused = true)]
async fn reconnecting_to_the_same_device_is_a_no_op() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());

    manager.connect(&robot()).await.unwrap();
    manager.connect(&robot()).await.unwrap();
    assert_eq!(link.connect_attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connecting_elsewhere_drops_the_current_link_first() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let other = Device::new("robot-2", "Robot", "AA:BB:CC:DD:EE:02");

    manager.connect(&robot()).await.unwrap();
    link.clear_ops();
    manager.connect(&other).await.unwrap();

    let ops = link.ops();
    assert_eq!(ops[0], LinkOp::Disconnect);
    assert_eq!(ops[1], LinkOp::Connect("robot-2".to_string()));
    assert_eq!(manager.device(), Some(other));
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_transfer_reports_nothing() {
    let link = Arc::new(MockLink::new().with_mtu(64).with_op_delay(Duration::from_millis(10)));
    link.push_read(Endpoint::LongMessage, vec![1]);
    link.set_default_read(Endpoint::LongMessage, vec![3]);
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    manager.connect(&robot()).await.unwrap();
    manager.live_control().start();

    let handle = manager
        .long_message()
        .update_firmware(vec![0x5a; 10_000])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.long_message().is_busy());

    manager.disconnect().await.unwrap();
    assert!(handle.outcome().await.is_none());
    assert!(!manager.long_message().is_busy());
    assert!(!manager.live_control().is_running());

    // nothing is finalized after the link went down
    tokio::time::sleep(Duration::from_secs(5)).await;
    let finalizes = link
        .writes_to(Endpoint::LongMessage)
        .into_iter()
        .filter(|w| w == &[3])
        .count();
    assert_eq!(finalizes, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_interrupts_every_pending_connect() {
    let link = Arc::new(MockLink::new().failing_connect(GATT_ERROR));
    let config = LinkConfig {
        connect_attempts: 1000,
        ..LinkConfig::default()
    };
    let manager = Arc::new(ConnectionManager::new(link.clone(), config));

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(&robot()).await }
    });
    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(&robot()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let started = tokio::time::Instant::now();
    manager.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(first.await.unwrap().is_err());
    assert!(second.await.unwrap().is_err());

    let attempts = link.connect_attempts().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(link.connect_attempts().len(), attempts);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn remote_drop_mid_transfer_reports_nothing() {
    let link = Arc::new(MockLink::new().with_mtu(64).with_op_delay(Duration::from_millis(10)));
    link.push_read(Endpoint::LongMessage, vec![1]);
    link.set_default_read(Endpoint::LongMessage, vec![3]);
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let events = recorder(&manager);
    manager.connect(&robot()).await.unwrap();
    manager.live_control().start();

    let handle = manager
        .long_message()
        .update_firmware(vec![0x5a; 10_000])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.long_message().is_busy());

    link.drop_link();
    assert!(handle.outcome().await.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());
    assert_eq!(*events.lock().unwrap(), vec![false, true, false]);
    assert!(!manager.long_message().is_busy());
    assert!(!manager.live_control().is_running());
    assert_eq!(manager.negotiated_mtu(), None);

    // the same device can be picked up again afterwards
    manager.connect(&robot()).await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(*events.lock().unwrap(), vec![false, true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn local_disconnect_is_not_reported_twice() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    let events = recorder(&manager);

    manager.connect(&robot()).await.unwrap();
    manager.disconnect().await.unwrap();
    link.drop_link();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*events.lock().unwrap(), vec![false, true, false]);
    let disconnects = link
        .ops()
        .into_iter()
        .filter(|op| *op == LinkOp::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
}
