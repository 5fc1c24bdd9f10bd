//! Serialized characteristic transport
//! All reads and writes for one link go through a single queue drained by one
//! worker task, so operations complete in submission order and never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::link::GattLink;
use crate::core::bluetooth::types::Endpoint;
use crate::error::LinkError;

pub type RequestId = u64;

#[derive(Debug)]
enum RequestKind {
    Write(Vec<u8>),
    Read,
}

/// Where the result of a request goes
#[derive(Debug)]
enum Reply {
    Write(oneshot::Sender<Result<(), LinkError>>),
    Read(oneshot::Sender<Result<Vec<u8>, LinkError>>),
}

#[derive(Debug)]
struct Request {
    id: RequestId,
    endpoint: Endpoint,
    kind: RequestKind,
    /// `None` for fire-and-forget writes
    reply: Option<Reply>,
}

/// Table of requests waiting for the link.
///
/// An entry is inserted when the worker starts a request and removed exactly
/// once, either by resolving it or by dropping the whole table on shutdown.
#[derive(Debug, Default)]
struct PendingRequests {
    entries: HashMap<RequestId, (Endpoint, Reply)>,
}

impl PendingRequests {
    fn register(&mut self, id: RequestId, endpoint: Endpoint, reply: Reply) {
        self.entries.insert(id, (endpoint, reply));
    }

    /// Delivers `outcome` to the waiter of `id`. Returns false if `id` was not pending.
    fn resolve(&mut self, id: RequestId, outcome: Result<Vec<u8>, LinkError>) -> bool {
        let Some((endpoint, reply)) = self.entries.remove(&id) else {
            return false;
        };
        // a dropped receiver means the caller gave up; nothing to deliver
        let delivered = match reply {
            Reply::Write(tx) => tx.send(outcome.map(|_| ())).is_ok(),
            Reply::Read(tx) => tx.send(outcome).is_ok(),
        };
        if !delivered {
            debug!("Request {} on {:?} completed after its caller left", id, endpoint);
        }
        true
    }

    /// Drops every waiter; their receivers observe a closed channel
    fn drop_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cloneable submission side of the transport
#[derive(Clone, Debug)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<Request>,
    next_id: Arc<AtomicU64>,
    mtu: u16,
}

impl TransportHandle {
    /// MTU negotiated for this link
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit(&self, endpoint: Endpoint, kind: RequestKind, reply: Option<Reply>) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(Request {
                id,
                endpoint,
                kind,
                reply,
            })
            .is_ok()
    }

    /// Queue a write and wait for its acknowledgement
    pub async fn write(&self, endpoint: Endpoint, data: Vec<u8>) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        if !self.submit(endpoint, RequestKind::Write(data), Some(Reply::Write(tx))) {
            return Err(LinkError::NotConnected);
        }
        rx.await.map_err(|_| LinkError::Cancelled)?
    }

    /// Queue a read and wait for the value
    pub async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError> {
        let (tx, rx) = oneshot::channel();
        if !self.submit(endpoint, RequestKind::Read, Some(Reply::Read(tx))) {
            return Err(LinkError::NotConnected);
        }
        rx.await.map_err(|_| LinkError::Cancelled)?
    }

    /// Queue a write nobody waits for. Returns false if the transport is closed.
    pub fn write_detached(&self, endpoint: Endpoint, data: Vec<u8>) -> bool {
        self.submit(endpoint, RequestKind::Write(data), None)
    }
}

/// Owner of the worker task draining the queue onto the link
pub struct CharacteristicTransport {
    handle: TransportHandle,
    cancel: CancellationToken,
    lost: CancellationToken,
    task: JoinHandle<()>,
}

impl CharacteristicTransport {
    /// Spawns the worker. Must be called from within a tokio runtime.
    pub fn start(link: Arc<dyn GattLink>, mtu: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let lost = CancellationToken::new();
        let task = tokio::spawn(Self::run(link, rx, cancel.clone(), lost.clone()));
        info!("Characteristic transport started (MTU {})", mtu);
        Self {
            handle: TransportHandle {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
                mtu,
            },
            cancel,
            lost,
            task,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Cancelled when the worker stops because the peripheral dropped the link
    pub fn link_lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Stops the worker immediately; queued and in-flight requests are dropped
    /// without their callers ever seeing a result from the link.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutting down characteristic transport");
            self.cancel.cancel();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn run(
        link: Arc<dyn GattLink>,
        mut rx: mpsc::UnboundedReceiver<Request>,
        cancel: CancellationToken,
        lost: CancellationToken,
    ) {
        let mut pending = PendingRequests::default();
        let mut link_dropped = link.wait_disconnected();

        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut link_dropped => {
                    lost.cancel();
                    break;
                }
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let Request {
                id,
                endpoint,
                kind,
                reply,
            } = request;
            let tracked = reply.is_some();
            if let Some(reply) = reply {
                pending.register(id, endpoint, reply);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut link_dropped => {
                    lost.cancel();
                    break;
                }
                outcome = Self::execute(link.as_ref(), endpoint, kind) => outcome,
            };

            if tracked {
                pending.resolve(id, outcome);
            } else if let Err(e) = outcome {
                debug!("Unacknowledged write to {:?} failed: {}", endpoint, e);
            }
        }

        if lost.is_cancelled() {
            warn!("Peripheral dropped the link");
        }
        rx.close();
        let mut dropped = pending.drop_all();
        while let Ok(request) = rx.try_recv() {
            if request.reply.is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("Transport stopped with {} pending request(s) dropped", dropped);
        }
        debug!("Transport worker finished");
    }

    async fn execute(
        link: &dyn GattLink,
        endpoint: Endpoint,
        kind: RequestKind,
    ) -> Result<Vec<u8>, LinkError> {
        match kind {
            RequestKind::Write(data) => link.write(endpoint, &data).await.map(|_| Vec::new()),
            RequestKind::Read => link.read(endpoint).await,
        }
    }
}

impl Drop for CharacteristicTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
