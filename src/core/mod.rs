//! Core functionality for robot-link
//! This module contains everything that talks to the robot over Bluetooth LE

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{ConnectionManager, Device, GattLink};
