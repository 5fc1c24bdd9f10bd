//! robot-link library
//! Client side of the robot's Bluetooth LE protocol: connection management,
//! chunked long-message transfers and the live control stream.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::LinkConfig;
pub use crate::core::bluetooth::{ConnectionManager, Device, GattLink};
pub use error::{LinkError, TransferError};
