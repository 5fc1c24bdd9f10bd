//! `GattLink` backed by the `bluest` crate.
//!
//! Devices are handed over by whoever did the discovery through
//! [`BluestLink::register_device`]; the link keeps the `bluest::Device`
//! behind the plain [`Device`] descriptor the rest of the crate works with.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic};
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::Mutex;

use crate::core::bluetooth::constants::LINK_POLL_INTERVAL_MS;
use crate::core::bluetooth::link::GattLink;
use crate::core::bluetooth::types::{Device, Endpoint};
use crate::error::LinkError;

const MAC_PATTERN: &str = r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})";

struct ActiveLink {
    device: bluest::Device,
    characteristics: HashMap<Endpoint, Characteristic>,
}

pub struct BluestLink {
    adapter: Adapter,
    known: Mutex<HashMap<String, bluest::Device>>,
    active: Mutex<Option<ActiveLink>>,
}

impl BluestLink {
    /// Opens the default adapter and waits until it is powered on.
    pub async fn new() -> Result<Self, LinkError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| LinkError::other("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            known: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    /// Makes `device` connectable through this link and describes it.
    pub async fn register_device(&self, device: bluest::Device) -> Device {
        let id = device.id().to_string();
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let address = extract_mac_address(&id).unwrap_or_else(|| id.clone());
        debug!("Registering device {} ({})", id, name);

        self.known.lock().await.insert(id.clone(), device);
        Device::new(id, name, address)
    }

    /// Registers every device the system already holds a connection to.
    pub async fn register_connected_devices(&self) -> Result<Vec<Device>, LinkError> {
        let mut devices = Vec::new();
        for device in self.adapter.connected_devices().await? {
            devices.push(self.register_device(device).await);
        }
        Ok(devices)
    }

    async fn characteristic(&self, endpoint: Endpoint) -> Result<Characteristic, LinkError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(LinkError::NotConnected)?;
        active
            .characteristics
            .get(&endpoint)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(endpoint.characteristic_uuid()))
    }
}

#[async_trait]
impl GattLink for BluestLink {
    async fn connect(&self, device: &Device) -> Result<(), LinkError> {
        let handle = self
            .known
            .lock()
            .await
            .get(&device.id)
            .cloned()
            .ok_or_else(|| LinkError::DeviceNotFound(device.id.clone()))?;

        if !handle.is_connected().await {
            info!("Initiating connection to {}...", device.id);
            self.adapter.connect_device(&handle).await?;
        }

        *self.active.lock().await = Some(ActiveLink {
            device: handle,
            characteristics: HashMap::new(),
        });
        Ok(())
    }

    async fn bind_endpoints(&self, endpoints: &[Endpoint]) -> Result<Vec<Endpoint>, LinkError> {
        let device = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .ok_or(LinkError::NotConnected)?
                .device
                .clone()
        };

        let services = device.services().await?;
        let mut found = HashMap::new();
        for endpoint in endpoints {
            let Some(service) = services.iter().find(|s| s.uuid() == endpoint.service_uuid()) else {
                debug!("Service {} not found", endpoint.service_uuid());
                continue;
            };
            let characteristic = service
                .characteristics()
                .await?
                .into_iter()
                .find(|c| c.uuid() == endpoint.characteristic_uuid());
            match characteristic {
                Some(characteristic) => {
                    debug!("Found characteristic {} for {:?}", characteristic.uuid(), endpoint);
                    found.insert(*endpoint, characteristic);
                }
                None => debug!("Characteristic {} not found", endpoint.characteristic_uuid()),
            }
        }

        let bound = endpoints.iter().copied().filter(|e| found.contains_key(e)).collect();
        if let Some(active) = self.active.lock().await.as_mut() {
            active.characteristics = found;
        }
        Ok(bound)
    }

    async fn request_high_priority(&self) -> Result<(), LinkError> {
        // bluest leaves connection parameters to the platform stack
        debug!("Connection priority is managed by the platform");
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError> {
        let characteristic = self.characteristic(Endpoint::LongMessage).await?;
        let max_write = characteristic.max_write_len()?;
        let granted = u16::try_from(max_write).unwrap_or(u16::MAX).min(mtu);
        info!("Requested MTU {}, platform allows writes of {} bytes", mtu, max_write);
        Ok(granted)
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), LinkError> {
        let characteristic = self.characteristic(endpoint).await?;
        characteristic.write(data).await?;
        Ok(())
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic(endpoint).await?;
        Ok(characteristic.read().await?)
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let Some(active) = self.active.lock().await.take() else {
            return Ok(());
        };
        if active.device.is_connected().await {
            if let Err(e) = self.adapter.disconnect_device(&active.device).await {
                warn!("Failed to disconnect device: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn wait_disconnected(&self) {
        let device = match self.active.lock().await.as_ref() {
            Some(active) => active.device.clone(),
            None => return,
        };
        // bluest has no portable disconnect event, so poll the platform state
        let mut ticker = tokio::time::interval(Duration::from_millis(LINK_POLL_INTERVAL_MS));
        loop {
            ticker.tick().await;
            if !device.is_connected().await {
                info!("Device {} is no longer connected", device.id());
                return;
            }
        }
    }
}

fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(MAC_PATTERN).ok()?;
    re.find_iter(device_id).last().map(|m| m.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_taken_from_the_end_of_the_platform_id() {
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLE00:11:22:33:44:55-a0:b1:c2:d3:e4:f5"),
            Some("A0:B1:C2:D3:E4:F5".to_string())
        );
        assert_eq!(extract_mac_address("hci0/dev_no_mac"), None);
    }
}
