//! GATT link abstraction
//! The link is the only thing that touches the radio. Everything above it goes
//! through the serialized transport queue.

use crate::core::bluetooth::types::{Device, Endpoint};
use crate::error::LinkError;

/// Primitive operations of one physical link.
///
/// Implementations are assumed to deliver each call reliably or fail it;
/// retry and flow control below this line belong to the platform stack.
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    /// Open the physical link to `device`
    async fn connect(&self, device: &Device) -> Result<(), LinkError>;

    /// Resolve as many of `endpoints` as the peripheral exposes and return the ones found
    async fn bind_endpoints(&self, endpoints: &[Endpoint]) -> Result<Vec<Endpoint>, LinkError>;

    /// Ask for a short connection interval
    async fn request_high_priority(&self) -> Result<(), LinkError>;

    /// Negotiate the MTU, returning the value actually in effect
    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError>;

    /// Write `data` to `endpoint`, resolving once the peripheral acknowledged it
    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), LinkError>;

    /// Read the current value of `endpoint`
    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError>;

    /// Close the physical link
    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Resolves once the peripheral drops the connected link, and immediately if
    /// it already has. Backends that cannot observe this never resolve.
    async fn wait_disconnected(&self) {
        std::future::pending::<()>().await
    }
}
