//! Protocol limits and fixed values from the Modbus application protocol.

/// Smallest quantity accepted by any multi-address function.
pub const MIN_COUNT: u16 = 1;
/// Maximum count allowed in a read coils/discrete inputs request
pub const MAX_COIL_COUNT_READ: u16 = 2000;
/// Maximum count allowed in a read holding/input registers request
pub const MAX_REGISTER_COUNT_READ: u16 = 125;
/// Maximum count allowed in a write multiple coils request
pub const MAX_COIL_COUNT_WRITE: u16 = 1968;
/// Maximum count allowed in a write multiple registers request
pub const MAX_REGISTER_COUNT_WRITE: u16 = 123;

pub const MIN_DEVICE_ID: u8 = 1;
pub const MAX_DEVICE_ID: u8 = 247;
pub const BROADCAST_DEVICE_ID: u8 = 0;

/// Write single coil value for ON
pub const COIL_ON: u16 = 0xFF00;
/// Write single coil value for OFF
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// MEI type for Read Device Identification (function 0x2B).
pub const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Largest RTU frame including address and CRC.
pub const MAX_RTU_FRAME_LEN: usize = 256;
