//! Constants used throughout the application
//! This module contains the protocol and default identity values the client
//! needs: UUIDs, status codes and the fallback alert text.

use uuid::Uuid;

/// The advertised name of the alert peripheral
pub const DEFAULT_TARGET_NAME: &str = "RPi";

/// The UUID of the gesture alert service
pub const UUID_ALERT_SERVICE: Uuid = Uuid::from_u128(0x11111111_2222_3333_4444_56789abcdef0);

/// The UUID of the alert notification characteristic
pub const UUID_ALERT_CHAR: Uuid = Uuid::from_u128(0x11111111_2222_3333_4444_56789abcdef1);

/// Standard Client Characteristic Configuration Descriptor
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value that turns notifications on (little endian 0x0001)
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Generic GATT failure status
pub const GATT_ERROR: u8 = 0x85;

/// Scan could not be started by the platform
pub const SCAN_FAILED_INTERNAL_ERROR: u8 = 3;

/// Title used for every alert popup
pub const ALERT_TITLE: &str = "ALERT!!!";

/// Shown when the peripheral sends an empty alert
pub const DEFAULT_ALERT_MESSAGE: &str = "Emergency gesture detected";

/// Prefix of a payload asking for a phone call
pub const CALL_COMMAND_PREFIX: &str = "CALL:";
