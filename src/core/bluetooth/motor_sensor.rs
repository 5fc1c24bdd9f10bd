//! Motor and sensor port reads

use log::debug;

use crate::core::bluetooth::service::{BoundTransport, EndpointService};
use crate::core::bluetooth::transport::TransportHandle;
use crate::core::bluetooth::types::{Endpoint, MotorPort, SensorPort};
use crate::error::LinkError;

const MOTOR_MESSAGE_SIZE: usize = 9;
const ULTRASOUND_MESSAGE_SIZE: usize = 5;
const BUMPER_PRESSED: u8 = 2;

/// Motor port reading: big-endian speed, position, then power
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorInfo {
    pub speed: f32,
    pub position: i32,
    pub power: u8,
}

impl MotorInfo {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MOTOR_MESSAGE_SIZE {
            return None;
        }
        Some(Self {
            speed: f32::from_be_bytes(bytes[0..4].try_into().ok()?),
            position: i32::from_be_bytes(bytes[4..8].try_into().ok()?),
            power: bytes[8],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumperInfo {
    pub pressed: bool,
}

impl BumperInfo {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self {
            pressed: bytes.get(1) == Some(&BUMPER_PRESSED),
        })
    }
}

/// Ultrasound reading, little-endian distance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UltrasoundInfo {
    pub distance: i32,
}

impl UltrasoundInfo {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ULTRASOUND_MESSAGE_SIZE {
            return None;
        }
        Some(Self {
            distance: i32::from_le_bytes(bytes[0..4].try_into().ok()?),
        })
    }
}

#[derive(Debug, Default)]
pub struct MotorService {
    transport: BoundTransport,
}

impl MotorService {
    pub async fn read(&self, port: MotorPort) -> Result<Vec<u8>, LinkError> {
        let value = self.transport.get()?.read(Endpoint::Motor(port)).await?;
        debug!("Motor {:?}: {:?}", port, value);
        Ok(value)
    }

    /// `Ok(None)` when the port answered with too few bytes
    pub async fn read_info(&self, port: MotorPort) -> Result<Option<MotorInfo>, LinkError> {
        Ok(MotorInfo::from_bytes(&self.read(port).await?))
    }
}

impl EndpointService for MotorService {
    fn name(&self) -> &'static str {
        "motor"
    }

    fn bind(&self, transport: TransportHandle) {
        self.transport.set(transport);
    }

    fn unbind(&self) {
        self.transport.clear();
    }
}

#[derive(Debug, Default)]
pub struct SensorService {
    transport: BoundTransport,
}

impl SensorService {
    pub async fn read(&self, port: SensorPort) -> Result<Vec<u8>, LinkError> {
        let value = self.transport.get()?.read(Endpoint::Sensor(port)).await?;
        debug!("Sensor {:?}: {:?}", port, value);
        Ok(value)
    }

    pub async fn read_bumper(&self, port: SensorPort) -> Result<Option<BumperInfo>, LinkError> {
        Ok(BumperInfo::from_bytes(&self.read(port).await?))
    }

    pub async fn read_ultrasound(
        &self,
        port: SensorPort,
    ) -> Result<Option<UltrasoundInfo>, LinkError> {
        Ok(UltrasoundInfo::from_bytes(&self.read(port).await?))
    }
}

impl EndpointService for SensorService {
    fn name(&self) -> &'static str {
        "sensor"
    }

    fn bind(&self, transport: TransportHandle) {
        self.transport.set(transport);
    }

    fn unbind(&self) {
        self.transport.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::mock::MockLink;
    use crate::core::bluetooth::transport::CharacteristicTransport;
    use std::sync::Arc;

    #[test]
    fn motor_info_is_big_endian() {
        let mut bytes = 1.5f32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(-300i32).to_be_bytes());
        bytes.push(200);
        assert_eq!(
            MotorInfo::from_bytes(&bytes),
            Some(MotorInfo {
                speed: 1.5,
                position: -300,
                power: 200
            })
        );
        assert_eq!(MotorInfo::from_bytes(&bytes[..8]), None);
    }

    #[test]
    fn sensor_decoding() {
        assert_eq!(BumperInfo::from_bytes(&[]), None);
        assert_eq!(BumperInfo::from_bytes(&[0]), Some(BumperInfo { pressed: false }));
        assert_eq!(BumperInfo::from_bytes(&[0, 2]), Some(BumperInfo { pressed: true }));

        let mut bytes = 1234i32.to_le_bytes().to_vec();
        assert_eq!(UltrasoundInfo::from_bytes(&bytes), None);
        bytes.push(0);
        assert_eq!(
            UltrasoundInfo::from_bytes(&bytes),
            Some(UltrasoundInfo { distance: 1234 })
        );
    }

    #[tokio::test]
    async fn reads_go_through_the_transport() {
        let link = Arc::new(MockLink::new());
        link.push_read(Endpoint::Sensor(SensorPort::S2), vec![0, 2]);
        let transport = CharacteristicTransport::start(link, 64);

        let sensors = SensorService::default();
        assert!(matches!(
            sensors.read(SensorPort::S2).await,
            Err(LinkError::NotConnected)
        ));
        sensors.bind(transport.handle());
        assert_eq!(
            sensors.read_bumper(SensorPort::S2).await.unwrap(),
            Some(BumperInfo { pressed: true })
        );
    }
}
