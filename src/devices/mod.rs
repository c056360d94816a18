pub mod memory;
pub mod registers;
pub mod traits;

pub use memory::MemoryDevice;
pub use registers::{Coil, DiscreteInput, HoldingRegister, InputRegister, RegisterType};
pub use traits::{DeviceResult, ModbusDevice};
