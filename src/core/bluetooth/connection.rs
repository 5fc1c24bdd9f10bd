//! Bluetooth connection handling for the robot controller
//! This module owns the link lifecycle: connecting with retry, binding the
//! endpoint services, negotiating the MTU and tearing everything down again,
//! whether the host asks for it or the peripheral drops the link.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::LinkConfig;
use crate::core::bluetooth::link::GattLink;
use crate::core::bluetooth::listeners::{
    ConnectionListenerRegistry, ConnectionStatusListener, ListenerId,
};
use crate::core::bluetooth::live_control::LiveControlService;
use crate::core::bluetooth::long_message::LongMessageService;
use crate::core::bluetooth::motor_sensor::{MotorService, SensorService};
use crate::core::bluetooth::service::EndpointService;
use crate::core::bluetooth::transport::CharacteristicTransport;
use crate::core::bluetooth::types::{ConnectionState, Device, Endpoint};
use crate::error::LinkError;

/// Connection manager for the controller
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// State shared with the link watcher task
struct Shared {
    link: Arc<dyn GattLink>,
    config: LinkConfig,
    state: Mutex<ConnectionState>,
    device: Mutex<Option<Device>>,
    transport: Mutex<Option<CharacteristicTransport>>,
    listeners: ConnectionListenerRegistry,
    /// Serializes connect, disconnect and link-loss handling
    lifecycle: tokio::sync::Mutex<()>,
    /// Shared by every connect waiting for or holding `lifecycle`;
    /// `disconnect` cancels it before queueing itself
    connect_cancel: Mutex<CancellationToken>,
    /// Stops the watcher of the current link
    watcher: Mutex<Option<CancellationToken>>,
    long_message: Arc<LongMessageService>,
    live_control: Arc<LiveControlService>,
    motors: Arc<MotorService>,
    sensors: Arc<SensorService>,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn GattLink>, config: LinkConfig) -> Self {
        let long_message = Arc::new(LongMessageService::new(config.deferred_finalize_delay()));
        let live_control = Arc::new(LiveControlService::new(config.live_control_period()));
        let shared = Shared {
            link,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            device: Mutex::new(None),
            transport: Mutex::new(None),
            listeners: ConnectionListenerRegistry::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            connect_cancel: Mutex::new(CancellationToken::new()),
            watcher: Mutex::new(None),
            long_message,
            live_control,
            motors: Arc::new(MotorService::default()),
            sensors: Arc::new(SensorService::default()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Connects to `device`, retrying per the config within the overall timeout.
    ///
    /// Listeners learn about the connection only once every service is bound.
    /// On failure the final error is reported as [`LinkError::Connection`].
    pub async fn connect(&self, device: &Device) -> Result<(), LinkError> {
        let shared = &self.shared;
        let cancel = {
            let mut slot = lock(&shared.connect_cancel);
            if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }
            slot.clone()
        };
        let _lifecycle = shared.lifecycle.lock().await;

        if shared.state() == ConnectionState::Ready {
            if shared.device().as_ref() == Some(device) {
                info!("Device {} already connected.", device.id);
                return Ok(());
            }
            info!("Switching link to {}", device.id);
            shared.teardown().await?;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LinkError::Cancelled),
            result = tokio::time::timeout(shared.config.connect_timeout(), shared.connect_with_retry(device)) => {
                result.unwrap_or(Err(LinkError::Timeout))
            }
        };

        match result {
            Ok(()) => {
                self.watch_link();
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", device.id, e);
                shared.release_after_failure().await;
                Err(e.into_connection())
            }
        }
    }

    /// Disconnect from the controller.
    ///
    /// Interrupts any connect still in progress. A running transfer is dropped
    /// without FINALIZE and without reporting an outcome; live control stops.
    /// Calling this while disconnected does nothing.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        lock(&self.shared.connect_cancel).cancel();
        let _lifecycle = self.shared.lifecycle.lock().await;

        if self.shared.state() == ConnectionState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return Ok(());
        }
        self.shared.teardown().await
    }

    /// Spawns the task that tears the connection down if the peripheral drops it
    fn watch_link(&self) {
        let Some(lost) = lock(&self.shared.transport)
            .as_ref()
            .map(|t| t.link_lost())
        else {
            return;
        };
        let stop = CancellationToken::new();
        if let Some(previous) = lock(&self.shared.watcher).replace(stop.clone()) {
            previous.cancel();
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = lost.cancelled() => shared.on_link_lost(&stop).await,
            }
        });
    }

    /// Registers `listener`, which is immediately told the current state
    pub fn register_connection_listener(
        &self,
        listener: impl ConnectionStatusListener + 'static,
    ) -> ListenerId {
        self.shared.listeners.register(Arc::new(listener))
    }

    pub fn unregister_connection_listener(&self, id: ListenerId) {
        self.shared.listeners.unregister(id);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The connected device, if any
    pub fn device(&self) -> Option<Device> {
        self.shared.device()
    }

    pub fn negotiated_mtu(&self) -> Option<u16> {
        lock(&self.shared.transport)
            .as_ref()
            .map(|t| t.handle().mtu())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn long_message(&self) -> &LongMessageService {
        &self.shared.long_message
    }

    pub fn live_control(&self) -> &LiveControlService {
        &self.shared.live_control
    }

    pub fn motors(&self) -> &MotorService {
        &self.shared.motors
    }

    pub fn sensors(&self) -> &SensorService {
        &self.shared.sensors
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        lock(&self.shared.connect_cancel).cancel();
        self.shared.release_services();
    }
}

impl Shared {
    /// Connect with retry mechanism
    async fn connect_with_retry(&self, device: &Device) -> Result<(), LinkError> {
        let attempts = self.config.connect_attempts.max(1);
        let retry_delay = self.config.connect_retry_delay();
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.set_state(ConnectionState::Connecting);
            match self.try_connect(device).await {
                Ok(()) => {
                    info!("Successfully connected to device {}", device.id);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    self.release_after_failure().await;
                    last_error = Some(e);

                    if attempt < attempts {
                        info!("Retrying connection in {:?}...", retry_delay);
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LinkError::other(format!("Failed to connect after {} attempts", attempts))
        }))
    }

    /// Try to connect to the controller
    async fn try_connect(&self, device: &Device) -> Result<(), LinkError> {
        info!(
            "Device details - ID: {}, Name: {}, Address: {}",
            device.id, device.name, device.address
        );
        self.link.connect(device).await?;
        self.set_state(ConnectionState::Connected);

        info!("Connection successful, binding services...");
        let bound = self.link.bind_endpoints(&Endpoint::all()).await?;
        if let Some(missing) = Endpoint::REQUIRED.iter().find(|e| !bound.contains(e)) {
            return Err(LinkError::CharacteristicNotFound(missing.characteristic_uuid()));
        }
        for endpoint in Endpoint::all().iter().filter(|e| !bound.contains(e)) {
            debug!("Optional endpoint {:?} not exposed by the device", endpoint);
        }
        self.set_state(ConnectionState::ServicesBound);

        if let Err(e) = self.link.request_high_priority().await {
            warn!("High connection priority not granted: {}", e);
        }

        let mtu = match self.link.request_mtu(self.config.requested_mtu).await {
            Ok(mtu) => mtu,
            Err(e) => {
                warn!(
                    "MTU exchange failed ({}), falling back to {}",
                    e, self.config.fallback_mtu
                );
                self.config.fallback_mtu
            }
        };
        info!("MTU in effect: {}", mtu);

        let transport = CharacteristicTransport::start(self.link.clone(), mtu);
        for service in self.services() {
            debug!("Binding {} service", service.name());
            service.bind(transport.handle());
        }
        *lock(&self.transport) = Some(transport);
        *lock(&self.device) = Some(device.clone());

        self.set_state(ConnectionState::Ready);
        info!("Connection and setup process completed successfully");
        Ok(())
    }

    async fn teardown(&self) -> Result<(), LinkError> {
        if let Some(device) = self.device() {
            info!("Disconnecting from device {}", device.id);
        }
        self.set_state(ConnectionState::Disconnecting);
        self.release_services();

        let result = self.link.disconnect().await;
        lock(&self.device).take();
        self.set_state(ConnectionState::Disconnected);

        match &result {
            Ok(()) => info!("Successfully disconnected"),
            Err(e) => warn!("Link did not close cleanly: {}", e),
        }
        result
    }

    /// Runs when the transport reports that the peripheral dropped the link.
    /// `stop` is cancelled if a local teardown got there first.
    async fn on_link_lost(&self, stop: &CancellationToken) {
        let _lifecycle = self.lifecycle.lock().await;
        if stop.is_cancelled() || self.state() != ConnectionState::Ready {
            return;
        }
        match self.device() {
            Some(device) => warn!("Device {} dropped the connection", device.id),
            None => warn!("Peripheral dropped the connection"),
        }
        if let Err(e) = self.teardown().await {
            debug!("Releasing dropped link: {}", e);
        }
    }

    /// Unbinds every service and stops the transport without awaiting anything
    fn release_services(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.cancel();
        }
        for service in self.services() {
            service.unbind();
        }
        if let Some(transport) = lock(&self.transport).take() {
            transport.shutdown();
        }
    }

    async fn release_after_failure(&self) {
        self.release_services();
        lock(&self.device).take();
        if let Err(e) = self.link.disconnect().await {
            debug!("Releasing failed link: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn services(&self) -> [&dyn EndpointService; 4] {
        [
            self.long_message.as_ref(),
            self.live_control.as_ref(),
            self.motors.as_ref(),
            self.sensors.as_ref(),
        ]
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
        match state {
            ConnectionState::Ready => self.listeners.notify(true),
            ConnectionState::Disconnected => self.listeners.notify(false),
            _ => {}
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn device(&self) -> Option<Device> {
        lock(&self.device).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
