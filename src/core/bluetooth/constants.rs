//! Constants used throughout the crate
//! This module contains the GATT UUIDs exposed by the robot controller, the
//! long-message wire codes and the timing defaults of the link.

use uuid::Uuid;

/// The UUID of the long-message (configuration) service
pub const UUID_LONG_MESSAGE_SERVICE: Uuid = Uuid::from_u128(0x97148a03_5b9d_11e9_8647_d663bd873d93);

/// The UUID of the long-message characteristic, used for SELECT/INIT/UPLOAD/FINALIZE
pub const UUID_LONG_MESSAGE_CHAR: Uuid = Uuid::from_u128(0xd59bb321_7218_4fb9_abac_2f6814f31a4d);

/// The UUID of the live controller service
pub const UUID_LIVE_CONTROL_SERVICE: Uuid = Uuid::from_u128(0xd2d5558c_5b9d_11e9_8647_d663bd873d93);

/// The UUID of the live controller characteristic
pub const UUID_LIVE_CONTROL_CHAR: Uuid = Uuid::from_u128(0x7486bec3_bb6b_4abd_a9ca_20adc281a0a4);

/// Motor and sensor ports share the live controller service
pub const UUID_MOTOR_SERVICE: Uuid = UUID_LIVE_CONTROL_SERVICE;
pub const UUID_SENSOR_SERVICE: Uuid = UUID_LIVE_CONTROL_SERVICE;

/// Motor port characteristics, M1 to M6
pub const UUID_MOTOR_CHARS: [Uuid; 6] = [
    Uuid::from_u128(0x4bdfb409_93cc_433a_83bd_7f4f8e7eaf54),
    Uuid::from_u128(0x454885b9_c9d1_4988_9893_a0437d5e6e9f),
    Uuid::from_u128(0x00fcd93b_0c3c_4940_aac1_b4c21fac3420),
    Uuid::from_u128(0x49aaeaa4_bb74_4f84_aa8f_acf46e5cf922),
    Uuid::from_u128(0xceea8e45_5ff9_4325_be13_48cf40c0e0c3),
    Uuid::from_u128(0x8e4c474f_188e_4d2a_910a_cf66f674f569),
];

/// Sensor port characteristics, S1 to S4
pub const UUID_SENSOR_CHARS: [Uuid; 4] = [
    Uuid::from_u128(0x135032e6_3e86_404f_b0a9_953fd46dcb17),
    Uuid::from_u128(0x36e944ef_34fe_4de2_9310_394d482e20e6),
    Uuid::from_u128(0xb3a71566_9af2_4c9d_bc4a_6f754ab6fcf0),
    Uuid::from_u128(0x9ace575c_0b70_4ed5_96f1_979a8eadbc6b),
];

/// Long-message message types (first byte of every write)
pub const MESSAGE_TYPE_SELECT: u8 = 0x00;
pub const MESSAGE_TYPE_INIT: u8 = 0x01;
pub const MESSAGE_TYPE_UPLOAD: u8 = 0x02;
pub const MESSAGE_TYPE_FINALIZE: u8 = 0x03;

/// Long-message status codes reported by the peripheral
pub const STATUS_UNUSED: u8 = 0;
pub const STATUS_UPLOAD: u8 = 1;
pub const STATUS_VALIDATION: u8 = 2;
pub const STATUS_READY: u8 = 3;
pub const STATUS_VALIDATION_ERROR: u8 = 4;

/// Length of the MD5 digest carried by INIT and by a `Ready` select response
pub const MD5_LENGTH: usize = 16;

/// MTU requested right after service binding
pub const DEFAULT_MTU: u16 = 512;

/// MTU assumed when negotiation fails; some controller firmwares cap at 256
pub const DEFAULT_FALLBACK_MTU: u16 = 256;

/// Overall connection timeout in milliseconds
pub const CONNECT_TIMEOUT_MS: u64 = 100_000;

/// Maximum number of connection attempts
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Delay between connection attempts in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 100;

/// Delay before the best-effort FINALIZE sent after a transfer is stopped
pub const DEFERRED_FINALIZE_DELAY_MS: u64 = 1000;

/// How often a backend without disconnect events checks that the link is up
pub const LINK_POLL_INTERVAL_MS: u64 = 500;

/// Generic GATT failure status, used when a failure carries no code of its own
pub const GATT_ERROR: i32 = 0x85;

/// GATT connection timeout status
pub const GATT_CONN_TIMEOUT: i32 = 0x08;

/// Live controller frame period in milliseconds
pub const LIVE_CONTROL_PERIOD_MS: u64 = 100;

/// Live controller frame size in bytes
pub const LIVE_CONTROL_FRAME_LEN: usize = 20;

/// The rolling keep-alive counter wraps at this value
pub const LIVE_CONTROL_COUNTER_MAX: u8 = 16;

/// Byte positions inside a live controller frame.
/// The keep-alive counter and the X axis share a slot; X is written last.
pub const POSITION_KEEP_ALIVE: usize = 1;
pub const POSITION_X_COORD: usize = 1;
pub const POSITION_Y_COORD: usize = 2;
pub const POSITION_BUTTON: usize = 11;

/// Joystick rest position
pub const DEFAULT_COORDINATE: u8 = 127;

/// Highest button index that fits the one-byte button mask
pub const MAX_BUTTON_INDEX: u8 = 7;
