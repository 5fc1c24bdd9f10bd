//! Live controller streaming
//! While running, a 20-byte frame with joystick axes, button mask and a rolling
//! keep-alive counter is written every period. Frames are never acknowledged or
//! resent; the next tick simply supersedes a lost one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    DEFAULT_COORDINATE, LIVE_CONTROL_COUNTER_MAX, LIVE_CONTROL_FRAME_LEN, LIVE_CONTROL_PERIOD_MS,
    MAX_BUTTON_INDEX, POSITION_BUTTON, POSITION_KEEP_ALIVE, POSITION_X_COORD, POSITION_Y_COORD,
};
use crate::core::bluetooth::service::{BoundTransport, EndpointService};
use crate::core::bluetooth::transport::TransportHandle;
use crate::core::bluetooth::types::Endpoint;

/// One live controller frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame([u8; LIVE_CONTROL_FRAME_LEN]);

impl ControlFrame {
    /// Lays out a frame. The counter and X share byte 1 and X is written second,
    /// so the counter never reaches the wire.
    pub fn new(counter: u8, x: u8, y: u8, button_mask: u8) -> Self {
        let mut bytes = [0u8; LIVE_CONTROL_FRAME_LEN];
        bytes[POSITION_KEEP_ALIVE] = counter;
        bytes[POSITION_X_COORD] = x;
        bytes[POSITION_Y_COORD] = y;
        bytes[POSITION_BUTTON] = button_mask;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LIVE_CONTROL_FRAME_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn x(&self) -> u8 {
        self.0[POSITION_X_COORD]
    }

    pub fn y(&self) -> u8 {
        self.0[POSITION_Y_COORD]
    }

    pub fn button_mask(&self) -> u8 {
        self.0[POSITION_BUTTON]
    }
}

/// Joystick and button state behind the frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveControlState {
    pub x: u8,
    pub y: u8,
    pub button_mask: u8,
    /// Rolling keep-alive counter, `0..16`
    pub counter: u8,
    pub running: bool,
}

impl Default for LiveControlState {
    fn default() -> Self {
        Self {
            x: DEFAULT_COORDINATE,
            y: DEFAULT_COORDINATE,
            button_mask: 0,
            counter: 0,
            running: false,
        }
    }
}

impl LiveControlState {
    /// Steps the counter and builds the frame for this tick
    pub fn advance(&mut self) -> ControlFrame {
        self.counter = (self.counter + 1) % LIVE_CONTROL_COUNTER_MAX;
        ControlFrame::new(self.counter, self.x, self.y, self.button_mask)
    }

    pub fn press(&mut self, index: u8) {
        self.button_mask |= 1 << index;
    }

    pub fn release(&mut self, index: u8) {
        self.button_mask &= !(1 << index);
    }
}

struct Ticker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live controller capability of the peripheral
pub struct LiveControlService {
    state: Arc<Mutex<LiveControlState>>,
    transport: Arc<BoundTransport>,
    ticker: Mutex<Option<Ticker>>,
    period: Duration,
}

impl Default for LiveControlService {
    fn default() -> Self {
        Self::new(Duration::from_millis(LIVE_CONTROL_PERIOD_MS))
    }
}

impl LiveControlService {
    pub fn new(period: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LiveControlState::default())),
            transport: Arc::new(BoundTransport::default()),
            ticker: Mutex::new(None),
            period,
        }
    }

    /// (Re)starts streaming with the counter reset. Must be called within a tokio runtime.
    pub fn start(&self) {
        self.cancel_ticker();
        {
            let mut state = self.lock_state();
            state.counter = 0;
            state.running = true;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(
            self.state.clone(),
            self.transport.clone(),
            self.period,
            cancel.clone(),
        ));
        *self.lock_ticker() = Some(Ticker { cancel, task });
        info!("Live control started ({:?} period)", self.period);
    }

    /// Stops streaming and releases every button; the axes keep their values
    pub fn stop(&self) {
        let was_running = self.cancel_ticker();
        let mut state = self.lock_state();
        state.button_mask = 0;
        state.running = false;
        if was_running {
            info!("Live control stopped");
        }
    }

    pub fn update_x_direction(&self, x: u8) {
        self.lock_state().x = x;
    }

    pub fn update_y_direction(&self, y: u8) {
        self.lock_state().y = y;
    }

    pub fn on_button_pressed(&self, index: u8) {
        if Self::check_button(index) {
            self.lock_state().press(index);
        }
    }

    pub fn on_button_released(&self, index: u8) {
        if Self::check_button(index) {
            self.lock_state().release(index);
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn snapshot(&self) -> LiveControlState {
        *self.lock_state()
    }

    fn check_button(index: u8) -> bool {
        if index > MAX_BUTTON_INDEX {
            warn!("Ignoring button index {} (max {})", index, MAX_BUTTON_INDEX);
            return false;
        }
        true
    }

    fn cancel_ticker(&self) -> bool {
        match self.lock_ticker().take() {
            Some(ticker) => {
                ticker.cancel.cancel();
                ticker.task.abort();
                true
            }
            None => false,
        }
    }

    async fn run(
        state: Arc<Mutex<LiveControlState>>,
        transport: Arc<BoundTransport>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            // stop() cancels before it takes the state lock, so once it returns
            // no tick can queue another frame
            let mut current = state.lock().unwrap_or_else(|e| e.into_inner());
            if cancel.is_cancelled() {
                break;
            }
            let frame = current.advance();
            match transport.get() {
                Ok(transport) => {
                    transport.write_detached(Endpoint::LiveControl, frame.to_vec());
                }
                Err(_) => debug!("Live control frame dropped: not bound"),
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LiveControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_ticker(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EndpointService for LiveControlService {
    fn name(&self) -> &'static str {
        "live-control"
    }

    fn bind(&self, transport: TransportHandle) {
        self.transport.set(transport);
    }

    fn unbind(&self) {
        self.stop();
        self.transport.clear();
    }
}

impl Drop for LiveControlService {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}
