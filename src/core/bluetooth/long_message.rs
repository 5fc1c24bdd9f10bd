//! Long message transfer
//! Uploads firmware, framework, configuration and test kit payloads through the
//! long-message characteristic:
//!
//! 1. SELECT `[0x00, function]`, then read the peripheral status
//! 2. INIT `[0x01] + md5` unless the peripheral already holds this payload
//! 3. UPLOAD `[0x02] + slice`, one MTU-sized chunk at a time
//! 4. FINALIZE `[0x03]`, then read the status; `Ready` means success

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::bluetooth::chunker::MessageChunker;
use crate::core::bluetooth::constants::{
    DEFERRED_FINALIZE_DELAY_MS, MD5_LENGTH, MESSAGE_TYPE_FINALIZE, MESSAGE_TYPE_INIT,
    MESSAGE_TYPE_SELECT, MESSAGE_TYPE_UPLOAD, STATUS_READY, STATUS_UNUSED, STATUS_UPLOAD,
    STATUS_VALIDATION, STATUS_VALIDATION_ERROR,
};
use crate::core::bluetooth::service::{BoundTransport, EndpointService};
use crate::core::bluetooth::transport::TransportHandle;
use crate::core::bluetooth::types::{Endpoint, FunctionType, TransferStatus};
use crate::error::{LinkError, TransferError};

pub type Md5Digest = [u8; MD5_LENGTH];

/// MD5 of the whole payload
pub fn md5_digest(payload: &[u8]) -> Md5Digest {
    Md5::digest(payload).into()
}

/// Status byte reported by the peripheral after SELECT and FINALIZE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralStatus {
    Unused,
    Upload,
    Validation,
    Ready,
    ValidationError,
}

impl PeripheralStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATUS_UNUSED => Some(PeripheralStatus::Unused),
            STATUS_UPLOAD => Some(PeripheralStatus::Upload),
            STATUS_VALIDATION => Some(PeripheralStatus::Validation),
            STATUS_READY => Some(PeripheralStatus::Ready),
            STATUS_VALIDATION_ERROR => Some(PeripheralStatus::ValidationError),
            _ => None,
        }
    }
}

pub fn select_message(function_type: FunctionType) -> Vec<u8> {
    vec![MESSAGE_TYPE_SELECT, function_type.code()]
}

pub fn init_message(digest: &Md5Digest) -> Vec<u8> {
    let mut message = Vec::with_capacity(MD5_LENGTH + 1);
    message.push(MESSAGE_TYPE_INIT);
    message.extend_from_slice(digest);
    message
}

pub fn finalize_message() -> Vec<u8> {
    vec![MESSAGE_TYPE_FINALIZE]
}

/// Digest stored on the peripheral, carried at offset 1 of a `Ready` response
fn stored_digest(response: &[u8]) -> Option<&[u8]> {
    response.get(1..MD5_LENGTH + 1)
}

/// Snapshot of the live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub function_type: FunctionType,
    pub payload_len: usize,
    pub local_digest: Md5Digest,
    pub status: TransferStatus,
}

struct ActiveSession {
    id: u64,
    info: TransferSession,
    task: Option<JoinHandle<()>>,
}

type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

fn lock_slot(slot: &SessionSlot) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// The running task's view of its own session
struct SessionProgress {
    slot: SessionSlot,
    id: u64,
}

impl SessionProgress {
    fn set(&self, status: TransferStatus) {
        if let Some(session) = lock_slot(&self.slot).as_mut().filter(|s| s.id == self.id) {
            session.info.status = status;
        }
    }

    /// Ends the session if it is still ours. False means it was stopped or aborted.
    fn finish(&self, status: TransferStatus) -> bool {
        let mut slot = lock_slot(&self.slot);
        match slot.as_ref() {
            Some(session) if session.id == self.id => {
                debug!("Session {} ended as {:?}", self.id, status);
                slot.take();
                true
            }
            _ => false,
        }
    }
}

/// Result of a transfer started with [`LongMessageService::begin`]
#[derive(Debug)]
pub struct TransferHandle {
    function_type: FunctionType,
    outcome: oneshot::Receiver<Result<(), TransferError>>,
}

impl TransferHandle {
    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }

    /// Waits for the transfer. `None` means it was stopped or the link went away,
    /// in which case neither success nor failure is reported.
    pub async fn outcome(self) -> Option<Result<(), TransferError>> {
        self.outcome.await.ok()
    }
}

/// Long-message capability of the peripheral
pub struct LongMessageService {
    transport: BoundTransport,
    session: SessionSlot,
    next_session_id: AtomicU64,
    finalize_delay: Duration,
}

impl Default for LongMessageService {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFERRED_FINALIZE_DELAY_MS))
    }
}

impl LongMessageService {
    /// `finalize_delay` is how long [`stop`](Self::stop) waits before its cleanup FINALIZE
    pub fn new(finalize_delay: Duration) -> Self {
        Self {
            transport: BoundTransport::default(),
            session: Arc::new(Mutex::new(None)),
            next_session_id: AtomicU64::new(1),
            finalize_delay,
        }
    }

    pub fn update_firmware(&self, payload: Vec<u8>) -> Result<TransferHandle, TransferError> {
        self.begin(FunctionType::Firmware, payload)
    }

    pub fn update_framework(&self, payload: Vec<u8>) -> Result<TransferHandle, TransferError> {
        self.begin(FunctionType::Framework, payload)
    }

    pub fn send_configuration(&self, payload: Vec<u8>) -> Result<TransferHandle, TransferError> {
        self.begin(FunctionType::Configuration, payload)
    }

    pub fn run_test_kit(&self, payload: Vec<u8>) -> Result<TransferHandle, TransferError> {
        self.begin(FunctionType::TestKit, payload)
    }

    /// Starts a transfer of `payload`.
    ///
    /// Fails with [`TransferError::AlreadyInProgress`] while another session is
    /// live, leaving that session untouched. Must be called within a tokio runtime.
    pub fn begin(
        &self,
        function_type: FunctionType,
        payload: Vec<u8>,
    ) -> Result<TransferHandle, TransferError> {
        let mut slot = lock_slot(&self.session);
        if slot.is_some() {
            warn!("Rejecting {:?} transfer: another one is in progress", function_type);
            return Err(TransferError::AlreadyInProgress);
        }
        let transport = self.transport.get()?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let digest = md5_digest(&payload);
        info!(
            "Starting {:?} transfer {} ({} bytes, MTU {})",
            function_type,
            id,
            payload.len(),
            transport.mtu()
        );

        let (tx, rx) = oneshot::channel();
        let progress = SessionProgress {
            slot: self.session.clone(),
            id,
        };
        *slot = Some(ActiveSession {
            id,
            info: TransferSession {
                function_type,
                payload_len: payload.len(),
                local_digest: digest,
                status: TransferStatus::AwaitingSelectAck,
            },
            task: None,
        });
        let task = tokio::spawn(async move {
            let result = run_session(&transport, function_type, &payload, &digest, &progress).await;
            let status = match &result {
                Ok(()) => TransferStatus::Completed,
                Err(_) => TransferStatus::Failed,
            };
            if progress.finish(status) {
                match &result {
                    Ok(()) => info!("{:?} transfer {} completed", function_type, id),
                    // the link went away under us; like a disconnect, report nothing
                    Err(TransferError::Link(LinkError::Cancelled | LinkError::NotConnected)) => {
                        info!("{:?} transfer {} dropped with the link", function_type, id);
                        return;
                    }
                    Err(e) => error!("{:?} transfer {} failed: {}", function_type, id, e),
                }
                let _ = tx.send(result);
            }
        });
        if let Some(session) = slot.as_mut() {
            session.task = Some(task);
        }

        Ok(TransferHandle {
            function_type,
            outcome: rx,
        })
    }

    /// Stops the live session, if any.
    ///
    /// Local state is cleared at once so a new transfer may begin immediately;
    /// a FINALIZE is sent to the peripheral after the configured delay as
    /// cleanup. That FINALIZE can land in the middle of a newer session.
    pub fn stop(&self) {
        let Some(session) = self.take_session() else {
            return;
        };
        info!("Stopping transfer {}", session.id);
        if let Some(task) = session.task {
            task.abort();
        }

        let Ok(transport) = self.transport.get() else {
            return;
        };
        let delay = self.finalize_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Sending deferred finalize");
            match finalize(&transport).await {
                Ok(()) => debug!("Deferred finalize acknowledged"),
                Err(e) => warn!("Deferred finalize failed: {}", e),
            }
        });
    }

    /// Drops the live session without finalizing or reporting it
    pub fn abort(&self) {
        if let Some(session) = self.take_session() {
            info!("Aborting transfer {}", session.id);
            if let Some(task) = session.task {
                task.abort();
            }
        }
    }

    pub fn status(&self) -> TransferStatus {
        lock_slot(&self.session)
            .as_ref()
            .map_or(TransferStatus::Idle, |s| s.info.status)
    }

    pub fn session(&self) -> Option<TransferSession> {
        lock_slot(&self.session).as_ref().map(|s| s.info.clone())
    }

    pub fn is_busy(&self) -> bool {
        lock_slot(&self.session).is_some()
    }

    fn take_session(&self) -> Option<ActiveSession> {
        lock_slot(&self.session).take()
    }
}

impl EndpointService for LongMessageService {
    fn name(&self) -> &'static str {
        "long-message"
    }

    fn bind(&self, transport: TransportHandle) {
        self.transport.set(transport);
    }

    fn unbind(&self) {
        self.abort();
        self.transport.clear();
    }
}

async fn run_session(
    transport: &TransportHandle,
    function_type: FunctionType,
    payload: &[u8],
    digest: &Md5Digest,
    progress: &SessionProgress,
) -> Result<(), TransferError> {
    transport
        .write(Endpoint::LongMessage, select_message(function_type))
        .await?;
    let response = transport.read(Endpoint::LongMessage).await?;

    let upload = match response.first().copied().and_then(PeripheralStatus::from_byte) {
        Some(PeripheralStatus::Unused) | Some(PeripheralStatus::Upload) => {
            debug!("Peripheral slot is free, uploading");
            true
        }
        Some(PeripheralStatus::Ready) => {
            let matches = stored_digest(&response) == Some(digest.as_slice());
            if matches {
                info!("Peripheral already holds this payload, skipping upload");
            } else {
                debug!("Peripheral holds a different payload, uploading");
            }
            !matches
        }
        other => {
            warn!("Unexpected select response {:?}, uploading", other);
            true
        }
    };

    if upload {
        progress.set(TransferStatus::Initializing);
        transport
            .write(Endpoint::LongMessage, init_message(digest))
            .await?;
        upload_chunks(transport, payload, progress).await?;
    }

    progress.set(TransferStatus::Finalizing);
    finalize(transport).await
}

async fn upload_chunks(
    transport: &TransportHandle,
    payload: &[u8],
    progress: &SessionProgress,
) -> Result<(), TransferError> {
    let chunker = MessageChunker::new(payload, usize::from(transport.mtu()), MESSAGE_TYPE_UPLOAD)
        .ok_or_else(|| LinkError::other(format!("MTU {} too small", transport.mtu())))?;
    let total = chunker.total();
    debug!("Uploading {} bytes in {} chunk(s)", payload.len(), total);

    for (index, chunk) in chunker {
        progress.set(TransferStatus::Uploading(index));
        transport
            .write(Endpoint::LongMessage, chunk.to_bytes())
            .await?;
    }
    Ok(())
}

async fn finalize(transport: &TransportHandle) -> Result<(), TransferError> {
    transport
        .write(Endpoint::LongMessage, finalize_message())
        .await?;
    let response = transport.read(Endpoint::LongMessage).await?;
    match response.first().copied() {
        Some(STATUS_READY) => Ok(()),
        status => Err(TransferError::Validation {
            status: status.unwrap_or(STATUS_VALIDATION_ERROR),
        }),
    }
}
