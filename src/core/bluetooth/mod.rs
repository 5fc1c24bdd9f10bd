//! Bluetooth functionality for the robot controller
//! This module handles the link to the robot: connecting, framing long
//! messages, streaming live control frames and reading motor/sensor ports.

pub mod bluest_link;
pub mod chunker;
pub mod connection;
pub mod constants;
pub mod link;
pub mod listeners;
pub mod live_control;
pub mod long_message;
pub mod mock;
pub mod motor_sensor;
pub mod service;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use bluest_link::BluestLink;
pub use chunker::{Chunk, MessageChunker};
pub use connection::ConnectionManager;
pub use link::GattLink;
pub use listeners::{ConnectionStatusListener, ListenerId};
pub use live_control::{ControlFrame, LiveControlService, LiveControlState};
pub use long_message::{LongMessageService, TransferHandle, TransferSession};
pub use mock::{LinkOp, MockLink};
pub use motor_sensor::{BumperInfo, MotorInfo, MotorService, SensorService, UltrasoundInfo};
pub use types::{
    ConnectionState, Device, Endpoint, FunctionType, MotorPort, SensorPort, TransferStatus,
};
