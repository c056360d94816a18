pub mod constants;
pub mod crc;
pub mod protocol;
pub mod server;

pub use crc::{append_crc, crc16_modbus, strip_crc};
pub use protocol::{ErrorCode, FunctionCode, Request, Response};
pub use server::ModbusServer;
