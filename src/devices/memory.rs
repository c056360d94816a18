use log::{debug, info};

use super::registers::{Coil, DiscreteInput, HoldingRegister, InputRegister, RegisterType};
use super::traits::{DeviceResult, ModbusDevice};
use crate::config::settings::{BlockConfig, RegisterMapConfig};

/// Contiguous run of addresses starting at `start`.
#[derive(Debug, Clone)]
struct RegisterBlock<T> {
    start: u16,
    values: Vec<T>,
}

impl<T: Copy + Default> RegisterBlock<T> {
    fn new(block: BlockConfig) -> Self {
        Self {
            start: block.start,
            values: vec![T::default(); block.count as usize],
        }
    }

    fn index(&self, address: u16) -> Option<usize> {
        let offset = address.checked_sub(self.start)? as usize;
        (offset < self.values.len()).then_some(offset)
    }

    fn get(&self, address: u16) -> Option<T> {
        self.index(address).map(|i| self.values[i])
    }

    fn set(&mut self, address: u16, value: T) -> bool {
        match self.index(address) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }
}

/// Device keeping all four address spaces in memory.
///
/// Discrete inputs and input registers are read-only over Modbus; the host
/// updates them through [`MemoryDevice::set_discrete_input`] and
/// [`MemoryDevice::set_input_register`].
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    coils: RegisterBlock<bool>,
    discrete_inputs: RegisterBlock<bool>,
    holding_registers: RegisterBlock<u16>,
    input_registers: RegisterBlock<u16>,
    read_transactions: u64,
    write_transactions: u64,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::from_config(&RegisterMapConfig {
            coils: BlockConfig::default(),
            discrete_inputs: BlockConfig::default(),
            holding_registers: BlockConfig::default(),
            input_registers: BlockConfig::default(),
        })
    }
}

impl MemoryDevice {
    /// A device with no addresses; add blocks with the `with_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(map: &RegisterMapConfig) -> Self {
        info!(
            "🗂️  Register map: coils {}+{}, discrete inputs {}+{}, holding {}+{}, input {}+{}",
            map.coils.start,
            map.coils.count,
            map.discrete_inputs.start,
            map.discrete_inputs.count,
            map.holding_registers.start,
            map.holding_registers.count,
            map.input_registers.start,
            map.input_registers.count
        );

        Self {
            coils: RegisterBlock::new(map.coils),
            discrete_inputs: RegisterBlock::new(map.discrete_inputs),
            holding_registers: RegisterBlock::new(map.holding_registers),
            input_registers: RegisterBlock::new(map.input_registers),
            read_transactions: 0,
            write_transactions: 0,
        }
    }

    pub fn with_coils(mut self, start: u16, count: u16) -> Self {
        self.coils = RegisterBlock::new(BlockConfig::new(start, count));
        self
    }

    pub fn with_discrete_inputs(mut self, start: u16, count: u16) -> Self {
        self.discrete_inputs = RegisterBlock::new(BlockConfig::new(start, count));
        self
    }

    pub fn with_holding_registers(mut self, start: u16, count: u16) -> Self {
        self.holding_registers = RegisterBlock::new(BlockConfig::new(start, count));
        self
    }

    pub fn with_input_registers(mut self, start: u16, count: u16) -> Self {
        self.input_registers = RegisterBlock::new(BlockConfig::new(start, count));
        self
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.coils.get(address)
    }

    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.discrete_inputs.get(address)
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.holding_registers.get(address)
    }

    pub fn input_register(&self, address: u16) -> Option<u16> {
        self.input_registers.get(address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) -> bool {
        self.coils.set(address, value)
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> bool {
        self.discrete_inputs.set(address, value)
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) -> bool {
        self.holding_registers.set(address, value)
    }

    pub fn set_input_register(&mut self, address: u16, value: u16) -> bool {
        self.input_registers.set(address, value)
    }

    /// Completed `begin_read`/`end_read` brackets.
    pub fn read_transactions(&self) -> u64 {
        self.read_transactions
    }

    pub fn write_transactions(&self) -> u64 {
        self.write_transactions
    }

    fn trace_miss(kind: RegisterType, address: u16) {
        debug!("No {} at address {}", kind, address);
    }
}

impl ModbusDevice for MemoryDevice {
    fn try_read_discrete_input(&mut self, address: u16) -> DeviceResult<Option<DiscreteInput>> {
        let value = self.discrete_inputs.get(address);
        if value.is_none() {
            Self::trace_miss(RegisterType::Discrete, address);
        }
        Ok(value.map(|value| DiscreteInput { address, value }))
    }

    fn try_read_coil(&mut self, address: u16) -> DeviceResult<Option<Coil>> {
        let value = self.coils.get(address);
        if value.is_none() {
            Self::trace_miss(RegisterType::Coil, address);
        }
        Ok(value.map(|value| Coil { address, value }))
    }

    fn try_write_coil(&mut self, address: u16, value: bool) -> DeviceResult<bool> {
        let written = self.coils.set(address, value);
        if !written {
            Self::trace_miss(RegisterType::Coil, address);
        }
        Ok(written)
    }

    fn try_read_input_register(&mut self, address: u16) -> DeviceResult<Option<InputRegister>> {
        let value = self.input_registers.get(address);
        if value.is_none() {
            Self::trace_miss(RegisterType::Input, address);
        }
        Ok(value.map(|value| InputRegister { address, value }))
    }

    fn try_read_holding_register(&mut self, address: u16) -> DeviceResult<Option<HoldingRegister>> {
        let value = self.holding_registers.get(address);
        if value.is_none() {
            Self::trace_miss(RegisterType::Holding, address);
        }
        Ok(value.map(|value| HoldingRegister { address, value }))
    }

    fn try_write_holding_register(&mut self, address: u16, value: u16) -> DeviceResult<bool> {
        let written = self.holding_registers.set(address, value);
        if !written {
            Self::trace_miss(RegisterType::Holding, address);
        }
        Ok(written)
    }

    fn end_read(&mut self) {
        self.read_transactions += 1;
    }

    fn end_write(&mut self) {
        self.write_transactions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_addressing_with_offset() {
        let mut device = MemoryDevice::new().with_holding_registers(100, 4);
        assert!(device.try_read_holding_register(99).unwrap().is_none());
        assert!(device.try_read_holding_register(104).unwrap().is_none());
        assert!(device.try_write_holding_register(103, 0xBEEF).unwrap());
        assert_eq!(
            device.try_read_holding_register(103).unwrap(),
            Some(HoldingRegister { address: 103, value: 0xBEEF })
        );
    }

    #[test]
    fn test_read_only_spaces_have_host_setters() {
        let mut device = MemoryDevice::new().with_discrete_inputs(0, 2).with_input_registers(10, 1);
        assert!(device.set_discrete_input(1, true));
        assert!(!device.set_discrete_input(2, true));
        assert!(device.set_input_register(10, 42));

        assert_eq!(device.try_read_discrete_input(1).unwrap().map(|d| d.value), Some(true));
        assert_eq!(device.try_read_input_register(10).unwrap().map(|r| r.value), Some(42));
    }

    #[test]
    fn test_from_config() {
        let device = MemoryDevice::from_config(&RegisterMapConfig::default());
        assert_eq!(device.coil(63), Some(false));
        assert_eq!(device.coil(64), None);
        assert_eq!(device.holding_register(127), Some(0));
        assert_eq!(device.input_register(128), None);
    }

    #[test]
    fn test_empty_device_implements_nothing() {
        let mut device = MemoryDevice::new();
        assert!(device.try_read_coil(0).unwrap().is_none());
        assert!(!device.try_write_coil(0, true).unwrap());
    }
}
