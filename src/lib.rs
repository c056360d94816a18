//! Modbus RTU Server Library
//!
//! This library provides the server side of the Modbus protocol: it decodes
//! request frames, validates them, drives a pluggable device model through the
//! four register spaces and frames the response. A serial RTU host and an
//! in-memory reference device are included.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use devices::{MemoryDevice, ModbusDevice};
pub use modbus::{ErrorCode, FunctionCode, ModbusServer, Request, Response};
pub use services::RtuServer;
pub use utils::error::ModbusError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
