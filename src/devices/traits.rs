use super::registers::{Coil, DiscreteInput, HoldingRegister, InputRegister};
use crate::utils::error::ModbusError;

pub type DeviceResult<T> = Result<T, ModbusError>;

/// Backing store for the four Modbus address spaces.
///
/// Every accessor works on one address. `Ok(None)` / `Ok(false)` means the
/// address is not implemented by this device and is answered with
/// IllegalDataAddress. `Err` is a device fault and is answered with
/// SlaveDeviceFailure; the error detail is only logged.
///
/// The server wraps all accesses of one request in exactly one
/// `begin_*`/`end_*` pair. `end_*` runs on every exit path, including early
/// termination on an unimplemented address or a fault. Report faults as
/// `Err`: a panic is not caught, and release builds use `panic = "abort"`,
/// so `end_*` only runs during unwinding in builds that unwind. Devices
/// shared with other threads take their lock in `begin_*` and release it in
/// `end_*`; the server itself does no locking.
pub trait ModbusDevice {
    fn try_read_discrete_input(&mut self, address: u16) -> DeviceResult<Option<DiscreteInput>>;
    fn try_read_coil(&mut self, address: u16) -> DeviceResult<Option<Coil>>;
    fn try_write_coil(&mut self, address: u16, value: bool) -> DeviceResult<bool>;

    fn try_read_input_register(&mut self, address: u16) -> DeviceResult<Option<InputRegister>>;
    fn try_read_holding_register(&mut self, address: u16) -> DeviceResult<Option<HoldingRegister>>;
    fn try_write_holding_register(&mut self, address: u16, value: u16) -> DeviceResult<bool>;

    fn begin_read(&mut self) {}
    fn end_read(&mut self) {}
    fn begin_write(&mut self) {}
    fn end_write(&mut self) {}
}

impl<D: ModbusDevice + ?Sized> ModbusDevice for Box<D> {
    fn try_read_discrete_input(&mut self, address: u16) -> DeviceResult<Option<DiscreteInput>> {
        (**self).try_read_discrete_input(address)
    }

    fn try_read_coil(&mut self, address: u16) -> DeviceResult<Option<Coil>> {
        (**self).try_read_coil(address)
    }

    fn try_write_coil(&mut self, address: u16, value: bool) -> DeviceResult<bool> {
        (**self).try_write_coil(address, value)
    }

    fn try_read_input_register(&mut self, address: u16) -> DeviceResult<Option<InputRegister>> {
        (**self).try_read_input_register(address)
    }

    fn try_read_holding_register(&mut self, address: u16) -> DeviceResult<Option<HoldingRegister>> {
        (**self).try_read_holding_register(address)
    }

    fn try_write_holding_register(&mut self, address: u16, value: u16) -> DeviceResult<bool> {
        (**self).try_write_holding_register(address, value)
    }

    fn begin_read(&mut self) {
        (**self).begin_read()
    }

    fn end_read(&mut self) {
        (**self).end_read()
    }

    fn begin_write(&mut self) {
        (**self).begin_write()
    }

    fn end_write(&mut self) {
        (**self).end_write()
    }
}
