//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_LIVE_CONTROL_CHAR, UUID_LIVE_CONTROL_SERVICE, UUID_LONG_MESSAGE_CHAR,
    UUID_LONG_MESSAGE_SERVICE, UUID_MOTOR_CHARS, UUID_MOTOR_SERVICE, UUID_SENSOR_CHARS,
    UUID_SENSOR_SERVICE,
};

/// Represents a discovered robot controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Platform-specific unique identifier, used by the link backend to find its handle
    pub id: String,
    /// The advertised name of the device
    pub name: String,
    /// The address of the device (MAC address on most platforms)
    pub address: String,
}

impl Device {
    /// Creates a new Device instance
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Lifecycle of the physical link. Only `Ready` is reported as connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ServicesBound,
    Ready,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Ready
    }
}

/// Motor ports of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorPort {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
}

impl MotorPort {
    pub const ALL: [MotorPort; 6] = [
        MotorPort::M1,
        MotorPort::M2,
        MotorPort::M3,
        MotorPort::M4,
        MotorPort::M5,
        MotorPort::M6,
    ];

    pub fn characteristic(self) -> Uuid {
        UUID_MOTOR_CHARS[self as usize]
    }
}

/// Sensor ports of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorPort {
    S1,
    S2,
    S3,
    S4,
}

impl SensorPort {
    pub const ALL: [SensorPort; 4] = [SensorPort::S1, SensorPort::S2, SensorPort::S3, SensorPort::S4];

    pub fn characteristic(self) -> Uuid {
        UUID_SENSOR_CHARS[self as usize]
    }
}

/// An addressable characteristic on the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    LongMessage,
    LiveControl,
    Motor(MotorPort),
    Sensor(SensorPort),
}

impl Endpoint {
    /// Endpoints without which the link is not usable
    pub const REQUIRED: [Endpoint; 2] = [Endpoint::LongMessage, Endpoint::LiveControl];

    /// Every endpoint the crate knows about
    pub fn all() -> Vec<Endpoint> {
        let mut endpoints = Self::REQUIRED.to_vec();
        endpoints.extend(MotorPort::ALL.iter().map(|m| Endpoint::Motor(*m)));
        endpoints.extend(SensorPort::ALL.iter().map(|s| Endpoint::Sensor(*s)));
        endpoints
    }

    pub fn service_uuid(self) -> Uuid {
        match self {
            Endpoint::LongMessage => UUID_LONG_MESSAGE_SERVICE,
            Endpoint::LiveControl => UUID_LIVE_CONTROL_SERVICE,
            Endpoint::Motor(_) => UUID_MOTOR_SERVICE,
            Endpoint::Sensor(_) => UUID_SENSOR_SERVICE,
        }
    }

    pub fn characteristic_uuid(self) -> Uuid {
        match self {
            Endpoint::LongMessage => UUID_LONG_MESSAGE_CHAR,
            Endpoint::LiveControl => UUID_LIVE_CONTROL_CHAR,
            Endpoint::Motor(port) => port.characteristic(),
            Endpoint::Sensor(port) => port.characteristic(),
        }
    }
}

/// What a long message carries; the code is the second byte of SELECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionType {
    Firmware = 1,
    Framework = 2,
    Configuration = 3,
    TestKit = 4,
}

impl FunctionType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FunctionType::Firmware),
            2 => Some(FunctionType::Framework),
            3 => Some(FunctionType::Configuration),
            4 => Some(FunctionType::TestKit),
            _ => None,
        }
    }
}

/// Progress of a long-message transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    Idle,
    AwaitingSelectAck,
    Initializing,
    /// Index of the chunk being written
    Uploading(usize),
    Finalizing,
    Completed,
    Failed,
}
