use std::sync::Arc;
use std::time::Duration;

use robot_link::core::bluetooth::{Endpoint, LinkOp, MockLink};
use robot_link::{ConnectionManager, Device, LinkConfig};

async fn connected(link: &Arc<MockLink>) -> ConnectionManager {
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());
    manager
        .connect(&Device::new("robot-1", "Robot", "AA:BB:CC:DD:EE:01"))
        .await
        .unwrap();
    manager
}

#[tokio::test(start_paused = true)]
async fn one_frame_per_period_and_counter_wraps_after_sixteen() {
    let link = Arc::new(MockLink::new());
    let manager = connected(&link).await;
    let control = manager.live_control();

    control.start();
    assert_eq!(control.snapshot().counter, 0);

    // ticks at 0, 100, ..., 1500 ms
    tokio::time::sleep(Duration::from_millis(1550)).await;
    let frames = link.writes_to(Endpoint::LiveControl);
    assert_eq!(frames.len(), 16);
    assert!(frames.iter().all(|f| f.len() == 20));
    assert_eq!(control.snapshot().counter, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(control.snapshot().counter, 1);
}

#[tokio::test(start_paused = true)]
async fn frames_carry_axes_and_buttons() {
    let link = Arc::new(MockLink::new());
    let manager = connected(&link).await;
    let control = manager.live_control();

    control.update_x_direction(200);
    control.update_y_direction(50);
    control.on_button_pressed(0);
    control.on_button_pressed(3);
    control.on_button_pressed(8);
    control.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames = link.writes_to(Endpoint::LiveControl);
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame[1], 200);
    assert_eq!(frame[2], 50);
    assert_eq!(frame[11], 0b0000_1001);
    let rest_zero = frame
        .iter()
        .enumerate()
        .filter(|(i, _)| ![1, 2, 11].contains(i))
        .all(|(_, b)| *b == 0);
    assert!(rest_zero);

    control.on_button_released(0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let frames = link.writes_to(Endpoint::LiveControl);
    assert_eq!(frames.last().unwrap()[11], 0b0000_1000);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_frames_and_releases_buttons() {
    let link = Arc::new(MockLink::new());
    let manager = connected(&link).await;
    let control = manager.live_control();

    control.update_x_direction(10);
    control.on_button_pressed(2);
    control.start();
    tokio::time::sleep(Duration::from_millis(350)).await;
    control.stop();

    let sent = link.writes_to(Endpoint::LiveControl).len();
    assert_eq!(sent, 4);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(link.writes_to(Endpoint::LiveControl).len(), sent);

    let state = control.snapshot();
    assert!(!state.running);
    assert_eq!(state.button_mask, 0);
    assert_eq!(state.x, 10);
}

#[tokio::test(start_paused = true)]
async fn restart_resets_the_counter() {
    let link = Arc::new(MockLink::new());
    let manager = connected(&link).await;
    let control = manager.live_control();

    control.start();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(control.snapshot().counter, 3);

    control.start();
    assert_eq!(control.snapshot().counter, 0);
    assert!(control.is_running());
}

#[tokio::test(start_paused = true)]
async fn control_frames_share_the_queue_with_a_transfer() {
    let link = Arc::new(MockLink::new().with_mtu(64).with_op_delay(Duration::from_millis(10)));
    link.push_read(Endpoint::LongMessage, vec![1]);
    link.set_default_read(Endpoint::LongMessage, vec![3]);
    let manager = connected(&link).await;

    manager.live_control().start();
    let handle = manager
        .long_message()
        .update_firmware(vec![0x11; 63 * 50])
        .unwrap();
    assert!(handle.outcome().await.unwrap().is_ok());
    manager.live_control().stop();

    let ops = link.ops();
    let is_upload =
        |op: &LinkOp| matches!(op, LinkOp::Write(Endpoint::LongMessage, w) if w[0] == 0x02);
    let first_upload = ops.iter().position(is_upload).unwrap();
    let last_upload = ops.iter().rposition(is_upload).unwrap();
    let interleaved = ops[first_upload..last_upload]
        .iter()
        .filter(|op| matches!(op, LinkOp::Write(Endpoint::LiveControl, _)))
        .count();
    assert!(interleaved > 0);
}

#[tokio::test(start_paused = true)]
async fn frames_without_a_link_are_dropped() {
    let link = Arc::new(MockLink::new());
    let manager = ConnectionManager::new(link.clone(), LinkConfig::default());

    manager.live_control().start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(manager.live_control().is_running());
    assert!(link.writes_to(Endpoint::LiveControl).is_empty());
    manager.live_control().stop();
}
