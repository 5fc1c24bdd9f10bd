//! Error types for robot-link

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::{GATT_CONN_TIMEOUT, GATT_ERROR};

/// Link-level failures.
///
/// Every failure can be classified as a GATT status code with
/// [`LinkError::status_code`]; connection setup reports its final failure
/// as [`LinkError::Connection`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// Link or GATT failure carrying the raw status code
    #[error("connection failed with status {status:#04x}")]
    Connection { status: i32 },

    #[error("operation timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// The operation was dropped because the link went away
    #[error("operation cancelled")]
    Cancelled,

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),

    #[error("{0}")]
    Other(String),
}

impl LinkError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// The GATT status this failure maps to
    pub fn status_code(&self) -> i32 {
        match self {
            LinkError::Connection { status } => *status,
            LinkError::Timeout => GATT_CONN_TIMEOUT,
            _ => GATT_ERROR,
        }
    }

    /// Classifies the failure as a connection failure
    pub fn into_connection(self) -> Self {
        match self {
            LinkError::Connection { .. } => self,
            other => LinkError::Connection {
                status: other.status_code(),
            },
        }
    }
}

/// Long-message transfer failures
#[derive(Debug, Error)]
pub enum TransferError {
    /// A transfer is already running on this connection
    #[error("a long message transfer is already in progress")]
    AlreadyInProgress,

    /// FINALIZE was not acknowledged with `Ready`
    #[error("long message validation failed (status {status})")]
    Validation { status: u8 },

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let err = LinkError::Connection { status: 0x85 };
        assert_eq!(err.to_string(), "connection failed with status 0x85");

        let err = LinkError::CharacteristicNotFound(Uuid::nil());
        assert_eq!(
            err.to_string(),
            "characteristic not found: 00000000-0000-0000-0000-000000000000"
        );

        let err = TransferError::Validation { status: 4 };
        assert_eq!(err.to_string(), "long message validation failed (status 4)");

        let err = TransferError::from(LinkError::NotConnected);
        assert_eq!(err.to_string(), "not connected");
    }

    #[test]
    fn test_into_connection_keeps_or_derives_status() {
        match (LinkError::Connection { status: 19 }).into_connection() {
            LinkError::Connection { status } => assert_eq!(status, 19),
            other => panic!("unexpected {other:?}"),
        }
        match LinkError::Timeout.into_connection() {
            LinkError::Connection { status } => assert_eq!(status, GATT_CONN_TIMEOUT),
            other => panic!("unexpected {other:?}"),
        }
        match LinkError::other("boom").into_connection() {
            LinkError::Connection { status } => assert_eq!(status, GATT_ERROR),
            other => panic!("unexpected {other:?}"),
        }
    }
}
