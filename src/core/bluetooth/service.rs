//! Endpoint-bound capabilities
//! Each capability of the peripheral is a service bound to the shared transport
//! while the link is ready, and unbound when it goes away.

use std::sync::Mutex;

use crate::core::bluetooth::transport::TransportHandle;
use crate::error::LinkError;

/// A capability that talks to the peripheral through the transport
pub trait EndpointService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach to a freshly started transport
    fn bind(&self, transport: TransportHandle);

    /// Detach and drop any work in progress without reporting it
    fn unbind(&self);
}

/// The transport a service is currently bound to
#[derive(Debug, Default)]
pub struct BoundTransport {
    slot: Mutex<Option<TransportHandle>>,
}

impl BoundTransport {
    pub fn set(&self, transport: TransportHandle) {
        *self.lock() = Some(transport);
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    /// The bound transport, or `NotConnected`
    pub fn get(&self) -> Result<TransportHandle, LinkError> {
        self.lock()
            .as_ref()
            .filter(|t| !t.is_closed())
            .cloned()
            .ok_or(LinkError::NotConnected)
    }

    pub fn is_bound(&self) -> bool {
        self.get().is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TransportHandle>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
