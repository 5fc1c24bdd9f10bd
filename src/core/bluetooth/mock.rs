//! Scripted in-memory link
//! Records every operation it receives and answers reads from per-endpoint
//! scripts. Used by the tests and the demo binary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::bluetooth::link::GattLink;
use crate::core::bluetooth::types::{Device, Endpoint};
use crate::error::LinkError;

/// An operation as seen by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Connect(String),
    BindEndpoints,
    RequestHighPriority,
    RequestMtu(u16),
    Write(Endpoint, Vec<u8>),
    Read(Endpoint),
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    ops: Vec<(Instant, LinkOp)>,
    /// Status returned by the next connect attempts; `None` entries succeed
    connect_script: VecDeque<Option<i32>>,
    connect_always_fails: Option<i32>,
    missing: Vec<Endpoint>,
    mtu: Option<u16>,
    mtu_fails: bool,
    reads: HashMap<Endpoint, VecDeque<Vec<u8>>>,
    default_reads: HashMap<Endpoint, Vec<u8>>,
    failing_write_tag: Option<(Endpoint, u8, i32)>,
    op_delay: Duration,
}

/// In-memory [`GattLink`]
#[derive(Debug)]
pub struct MockLink {
    state: Mutex<MockState>,
    /// Raised by `drop_link`, lowered by the next connect
    dropped: watch::Sender<bool>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            dropped: watch::channel(false).0,
        }
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt fails with `status`
    pub fn failing_connect(self, status: i32) -> Self {
        self.lock().connect_always_fails = Some(status);
        self
    }

    /// The next `times` connect attempts fail with `status`, later ones succeed
    pub fn failing_connect_times(self, times: usize, status: i32) -> Self {
        self.lock()
            .connect_script
            .extend(std::iter::repeat_n(Some(status), times));
        self
    }

    /// MTU granted when the host asks for more
    pub fn with_mtu(self, mtu: u16) -> Self {
        self.lock().mtu = Some(mtu);
        self
    }

    pub fn with_failing_mtu(self) -> Self {
        self.lock().mtu_fails = true;
        self
    }

    /// The peripheral does not expose `endpoint`
    pub fn without_endpoint(self, endpoint: Endpoint) -> Self {
        self.lock().missing.push(endpoint);
        self
    }

    /// Every read and write takes `delay` before completing
    pub fn with_op_delay(self, delay: Duration) -> Self {
        self.lock().op_delay = delay;
        self
    }

    /// Writes to `endpoint` whose first byte is `tag` fail with `status`
    pub fn failing_writes(self, endpoint: Endpoint, tag: u8, status: i32) -> Self {
        self.lock().failing_write_tag = Some((endpoint, tag, status));
        self
    }

    /// Queue one response for the next read of `endpoint`
    pub fn push_read(&self, endpoint: Endpoint, value: Vec<u8>) {
        self.lock().reads.entry(endpoint).or_default().push_back(value);
    }

    /// Response for reads of `endpoint` once its queue is empty
    pub fn set_default_read(&self, endpoint: Endpoint, value: Vec<u8>) {
        self.lock().default_reads.insert(endpoint, value);
    }

    pub fn ops(&self) -> Vec<LinkOp> {
        self.lock().ops.iter().map(|(_, op)| op.clone()).collect()
    }

    pub fn timed_ops(&self) -> Vec<(Instant, LinkOp)> {
        self.lock().ops.clone()
    }

    /// Payloads written to `endpoint`, in order
    pub fn writes_to(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|(_, op)| match op {
                LinkOp::Write(e, data) if *e == endpoint => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Instants of every connect attempt
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock()
            .ops
            .iter()
            .filter(|(_, op)| matches!(op, LinkOp::Connect(_)))
            .map(|(at, _)| *at)
            .collect()
    }

    /// The peripheral goes away: link-loss waiters wake up and every later
    /// read or write fails until the next connect
    pub fn drop_link(&self) {
        debug!("mock link: peripheral dropped the link");
        self.dropped.send_replace(true);
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a poisoned lock only means a test already panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, op: LinkOp) -> Duration {
        debug!("mock link: {:?}", op);
        let mut state = self.lock();
        state.ops.push((Instant::now(), op));
        state.op_delay
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl GattLink for MockLink {
    async fn connect(&self, device: &Device) -> Result<(), LinkError> {
        self.record(LinkOp::Connect(device.id.clone()));
        self.dropped.send_replace(false);
        let mut state = self.lock();
        if let Some(status) = state.connect_always_fails {
            return Err(LinkError::Connection { status });
        }
        match state.connect_script.pop_front().flatten() {
            Some(status) => Err(LinkError::Connection { status }),
            None => Ok(()),
        }
    }

    async fn bind_endpoints(&self, endpoints: &[Endpoint]) -> Result<Vec<Endpoint>, LinkError> {
        self.record(LinkOp::BindEndpoints);
        let state = self.lock();
        Ok(endpoints
            .iter()
            .copied()
            .filter(|e| !state.missing.contains(e))
            .collect())
    }

    async fn request_high_priority(&self) -> Result<(), LinkError> {
        self.record(LinkOp::RequestHighPriority);
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError> {
        self.record(LinkOp::RequestMtu(mtu));
        let state = self.lock();
        if state.mtu_fails {
            return Err(LinkError::other("MTU exchange rejected"));
        }
        Ok(state.mtu.map_or(mtu, |granted| granted.min(mtu)))
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), LinkError> {
        let delay = self.record(LinkOp::Write(endpoint, data.to_vec()));
        Self::pause(delay).await;
        if *self.dropped.borrow() {
            return Err(LinkError::NotConnected);
        }
        let failing = self.lock().failing_write_tag;
        match failing {
            Some((e, tag, status)) if e == endpoint && data.first() == Some(&tag) => {
                Err(LinkError::Connection { status })
            }
            _ => Ok(()),
        }
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError> {
        let delay = self.record(LinkOp::Read(endpoint));
        Self::pause(delay).await;
        if *self.dropped.borrow() {
            return Err(LinkError::NotConnected);
        }
        let mut state = self.lock();
        if let Some(value) = state.reads.get_mut(&endpoint).and_then(|q| q.pop_front()) {
            return Ok(value);
        }
        state
            .default_reads
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| LinkError::other(format!("no scripted read for {:?}", endpoint)))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.record(LinkOp::Disconnect);
        Ok(())
    }

    async fn wait_disconnected(&self) {
        let mut dropped = self.dropped.subscribe();
        let closed = dropped.wait_for(|dropped| *dropped).await.is_err();
        if closed {
            std::future::pending::<()>().await
        }
    }
}
