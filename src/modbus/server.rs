use log::{debug, trace, warn};
use std::ops::{Deref, DerefMut};

use super::constants::{
    BROADCAST_DEVICE_ID, COIL_OFF, COIL_ON, MAX_COIL_COUNT_READ, MAX_COIL_COUNT_WRITE,
    MAX_DEVICE_ID, MAX_REGISTER_COUNT_READ, MAX_REGISTER_COUNT_WRITE, MEI_READ_DEVICE_ID,
    MIN_COUNT, MIN_DEVICE_ID,
};
use super::protocol::{
    bit_at, pack_bits, pack_registers, ErrorCode, FunctionCode, Request, Response,
};
use crate::devices::traits::{DeviceResult, ModbusDevice};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Holds the device between `begin_*` and `end_*`; the end hook runs on drop.
struct Transaction<'a, D: ModbusDevice + ?Sized> {
    device: &'a mut D,
    access: Access,
}

impl<'a, D: ModbusDevice + ?Sized> Transaction<'a, D> {
    fn begin(device: &'a mut D, access: Access) -> Self {
        match access {
            Access::Read => device.begin_read(),
            Access::Write => device.begin_write(),
        }
        Self { device, access }
    }
}

impl<D: ModbusDevice + ?Sized> Deref for Transaction<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: ModbusDevice + ?Sized> DerefMut for Transaction<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: ModbusDevice + ?Sized> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        match self.access {
            Access::Read => self.device.end_read(),
            Access::Write => self.device.end_write(),
        }
    }
}

type Handled = Result<Vec<u8>, ErrorCode>;

/// Modbus server engine for one device on the bus.
///
/// Turns decoded requests into device accesses and builds the reply. All
/// protocol and device errors end up as exception responses; nothing is
/// returned to the caller as an `Err`.
pub struct ModbusServer<D> {
    device_id: u8,
    accept_broadcast: bool,
    device: D,
}

impl<D: ModbusDevice> ModbusServer<D> {
    pub fn new(device_id: u8, device: D) -> Result<Self, ModbusError> {
        if !(MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&device_id) {
            return Err(ModbusError::ConfigError(format!(
                "Device id {} outside {}..={}",
                device_id, MIN_DEVICE_ID, MAX_DEVICE_ID
            )));
        }

        Ok(Self {
            device_id,
            accept_broadcast: false,
            device,
        })
    }

    /// Execute writes sent to the broadcast address (never answered).
    pub fn with_broadcast(mut self, accept: bool) -> Self {
        self.accept_broadcast = accept;
        self
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Decode a checksum-verified frame, handle it and encode the reply.
    ///
    /// `None` means nothing goes on the wire. A malformed frame addressed to
    /// this device yields `Some` of an empty buffer.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let request = Request::decode(frame)?;
        self.handle(&request).map(|response| response.encode())
    }

    pub fn handle(&mut self, request: &Request) -> Option<Response> {
        if request.device_id != self.device_id {
            if request.device_id == BROADCAST_DEVICE_ID
                && self.accept_broadcast
                && request.is_valid
                && request.function.is_write()
            {
                let response = self.dispatch(request);
                debug!(
                    "Broadcast {} at {} executed with {:?}",
                    request.function,
                    request.address,
                    response.error_code()
                );
            } else {
                trace!("Ignoring frame for device {}", request.device_id);
            }
            return None;
        }

        if !request.is_valid {
            warn!("⚠️  Malformed {} frame, sending empty acknowledgement", request.function);
            let mut response = Response::for_request(request);
            response.set_error(ErrorCode::Acknowledge);
            return Some(response);
        }

        let response = self.dispatch(request);
        if response.is_error() {
            debug!(
                "{} at {} x{} rejected with {:?}",
                request.function,
                request.address,
                request.count,
                response.error_code()
            );
        }
        Some(response)
    }

    fn dispatch(&mut self, request: &Request) -> Response {
        let mut response = Response::for_request(request);

        let result = match request.function {
            FunctionCode::ReadCoils => self.read_coils(request),
            FunctionCode::ReadDiscreteInputs => self.read_discrete_inputs(request),
            FunctionCode::ReadHoldingRegisters => self.read_holding_registers(request),
            FunctionCode::ReadInputRegisters => self.read_input_registers(request),
            FunctionCode::WriteSingleCoil => self.write_single_coil(request),
            FunctionCode::WriteSingleRegister => self.write_single_register(request),
            FunctionCode::WriteMultipleCoils => self.write_multiple_coils(request),
            FunctionCode::WriteMultipleRegisters => self.write_multiple_registers(request),
            FunctionCode::EncapsulatedInterface => Err(encapsulated_interface(request)),
            FunctionCode::Unknown(_) => Err(ErrorCode::IllegalFunction),
        };

        match result {
            Ok(data) => {
                response.set_error(ErrorCode::NoError);
                response.set_data(data);
            }
            Err(code) => response.set_error(code),
        }
        response
    }

    fn read_coils(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_COIL_COUNT_READ)?;
        let bits = run_transaction(&mut self.device, Access::Read, request, |device, address, _| {
            Ok(device.try_read_coil(address)?.map(|coil| coil.value))
        })?;
        Ok(pack_bits(&bits))
    }

    fn read_discrete_inputs(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_COIL_COUNT_READ)?;
        let bits = run_transaction(&mut self.device, Access::Read, request, |device, address, _| {
            Ok(device.try_read_discrete_input(address)?.map(|input| input.value))
        })?;
        Ok(pack_bits(&bits))
    }

    fn read_holding_registers(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_REGISTER_COUNT_READ)?;
        let words = run_transaction(&mut self.device, Access::Read, request, |device, address, _| {
            Ok(device.try_read_holding_register(address)?.map(|register| register.value))
        })?;
        Ok(pack_registers(&words))
    }

    fn read_input_registers(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_REGISTER_COUNT_READ)?;
        let words = run_transaction(&mut self.device, Access::Read, request, |device, address, _| {
            Ok(device.try_read_input_register(address)?.map(|register| register.value))
        })?;
        Ok(pack_registers(&words))
    }

    fn write_single_coil(&mut self, request: &Request) -> Handled {
        let value = match single_value(request)? {
            COIL_ON => true,
            COIL_OFF => false,
            _ => return Err(ErrorCode::IllegalDataValue),
        };
        run_transaction(&mut self.device, Access::Write, &single(request), |device, address, _| {
            Ok(device.try_write_coil(address, value)?.then_some(()))
        })?;
        Ok(request.data.clone())
    }

    fn write_single_register(&mut self, request: &Request) -> Handled {
        let value = single_value(request)?;
        run_transaction(&mut self.device, Access::Write, &single(request), |device, address, _| {
            Ok(device.try_write_holding_register(address, value)?.then_some(()))
        })?;
        Ok(request.data.clone())
    }

    fn write_multiple_coils(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_COIL_COUNT_WRITE)?;
        if (request.count as usize).div_ceil(8) != request.data.len() {
            return Err(ErrorCode::IllegalDataValue);
        }
        let data = &request.data;
        run_transaction(&mut self.device, Access::Write, request, |device, address, index| {
            Ok(device.try_write_coil(address, bit_at(data, index))?.then_some(()))
        })?;
        Ok(Vec::new())
    }

    fn write_multiple_registers(&mut self, request: &Request) -> Handled {
        check_count(request.count, MAX_REGISTER_COUNT_WRITE)?;
        if request.count as usize * 2 != request.data.len() {
            return Err(ErrorCode::IllegalDataValue);
        }
        let data = &request.data;
        run_transaction(&mut self.device, Access::Write, request, |device, address, index| {
            let value = u16::from_be_bytes([data[index * 2], data[index * 2 + 1]]);
            Ok(device.try_write_holding_register(address, value)?.then_some(()))
        })?;
        Ok(Vec::new())
    }
}

/// Run `step` for every address of the request inside one begin/end bracket.
///
/// Stops at the first unimplemented address or device fault. Writes already
/// applied are kept.
fn run_transaction<D, T, F>(
    device: &mut D,
    access: Access,
    request: &Request,
    mut step: F,
) -> Result<Vec<T>, ErrorCode>
where
    D: ModbusDevice + ?Sized,
    F: FnMut(&mut D, u16, usize) -> DeviceResult<Option<T>>,
{
    let mut transaction = Transaction::begin(device, access);
    let mut values = Vec::with_capacity(request.count as usize);

    for index in 0..request.count as usize {
        let Some(address) = request.address.checked_add(index as u16) else {
            return Err(ErrorCode::IllegalDataAddress);
        };

        match step(&mut *transaction, address, index) {
            Ok(Some(value)) => values.push(value),
            Ok(None) => return Err(ErrorCode::IllegalDataAddress),
            Err(e) => {
                warn!("❌ Device fault during {} at address {}: {}", request.function, address, e);
                return Err(ErrorCode::SlaveDeviceFailure);
            }
        }
    }

    Ok(values)
}

fn check_count(count: u16, max: u16) -> Result<(), ErrorCode> {
    if (MIN_COUNT..=max).contains(&count) {
        Ok(())
    } else {
        Err(ErrorCode::IllegalDataValue)
    }
}

fn single_value(request: &Request) -> Result<u16, ErrorCode> {
    match request.data.as_slice() {
        [high, low] => Ok(u16::from_be_bytes([*high, *low])),
        _ => Err(ErrorCode::IllegalDataValue),
    }
}

/// Single writes touch exactly one address whatever `count` says.
fn single(request: &Request) -> Request {
    Request {
        count: 1,
        data: Vec::new(),
        ..request.clone()
    }
}

/// Device identification is not implemented; other MEI types are refused.
fn encapsulated_interface(request: &Request) -> ErrorCode {
    match request.data.first() {
        Some(&MEI_READ_DEVICE_ID) => ErrorCode::IllegalFunction,
        _ => ErrorCode::NegativeAcknowledge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::memory::MemoryDevice;
    use crate::devices::registers::{Coil, DiscreteInput, HoldingRegister, InputRegister};

    fn ten_coil_server() -> ModbusServer<MemoryDevice> {
        let device = MemoryDevice::new().with_coils(0, 10).with_holding_registers(0, 10);
        ModbusServer::new(1, device).unwrap()
    }

    /// Records hook calls and writes; fails on demand.
    #[derive(Default)]
    struct RecordingDevice {
        missing: Option<u16>,
        faulty: Option<u16>,
        begin_read: u32,
        end_read: u32,
        begin_write: u32,
        end_write: u32,
        coil_writes: Vec<(u16, bool)>,
        register_writes: Vec<(u16, u16)>,
    }

    impl RecordingDevice {
        fn check(&self, address: u16) -> DeviceResult<bool> {
            if self.faulty == Some(address) {
                return Err(ModbusError::DeviceFault("sensor offline".to_string()));
            }
            Ok(self.missing != Some(address))
        }
    }

    impl ModbusDevice for RecordingDevice {
        fn try_read_discrete_input(&mut self, address: u16) -> DeviceResult<Option<DiscreteInput>> {
            Ok(self.check(address)?.then_some(DiscreteInput { address, value: true }))
        }

        fn try_read_coil(&mut self, address: u16) -> DeviceResult<Option<Coil>> {
            Ok(self.check(address)?.then_some(Coil { address, value: address % 2 == 0 }))
        }

        fn try_write_coil(&mut self, address: u16, value: bool) -> DeviceResult<bool> {
            let ok = self.check(address)?;
            if ok {
                self.coil_writes.push((address, value));
            }
            Ok(ok)
        }

        fn try_read_input_register(&mut self, address: u16) -> DeviceResult<Option<InputRegister>> {
            Ok(self.check(address)?.then_some(InputRegister { address, value: address + 1000 }))
        }

        fn try_read_holding_register(
            &mut self,
            address: u16,
        ) -> DeviceResult<Option<HoldingRegister>> {
            Ok(self.check(address)?.then_some(HoldingRegister { address, value: address }))
        }

        fn try_write_holding_register(&mut self, address: u16, value: u16) -> DeviceResult<bool> {
            let ok = self.check(address)?;
            if ok {
                self.register_writes.push((address, value));
            }
            Ok(ok)
        }

        fn begin_read(&mut self) {
            self.begin_read += 1;
        }

        fn end_read(&mut self) {
            self.end_read += 1;
        }

        fn begin_write(&mut self) {
            self.begin_write += 1;
        }

        fn end_write(&mut self) {
            self.end_write += 1;
        }
    }

    fn recording_server(device: RecordingDevice) -> ModbusServer<RecordingDevice> {
        ModbusServer::new(7, device).unwrap()
    }

    #[test]
    fn test_read_ten_coils_all_off() {
        let mut server = ten_coil_server();
        let request = Request::new(1, FunctionCode::ReadCoils, 0, 10, Vec::new());
        let response = server.handle(&request).unwrap();
        assert_eq!(response.error_code(), ErrorCode::NoError);
        assert_eq!(response.data(), Some(&[0x00, 0x00][..]));
    }

    #[test]
    fn test_write_multiple_coils_then_read_back() {
        let mut server = ten_coil_server();
        let write = Request::new(1, FunctionCode::WriteMultipleCoils, 0, 3, vec![0b0000_0101]);
        let response = server.handle(&write).unwrap();
        assert_eq!(response.error_code(), ErrorCode::NoError);
        assert_eq!(response.data(), Some(&[][..]));

        assert_eq!(server.device().coil(0), Some(true));
        assert_eq!(server.device().coil(1), Some(false));
        assert_eq!(server.device().coil(2), Some(true));

        let read = Request::new(1, FunctionCode::ReadCoils, 0, 3, Vec::new());
        let response = server.handle(&read).unwrap();
        assert_eq!(response.data(), Some(&[0b0000_0101][..]));
    }

    #[test]
    fn test_coil_read_length_is_ceil_count_over_eight() {
        let device = MemoryDevice::new().with_coils(0, MAX_COIL_COUNT_READ);
        let mut server = ModbusServer::new(1, device).unwrap();
        for count in MIN_COUNT..=MAX_COIL_COUNT_READ {
            let request = Request::new(1, FunctionCode::ReadCoils, 0, count, Vec::new());
            let response = server.handle(&request).unwrap();
            assert_eq!(response.error_code(), ErrorCode::NoError);
            assert_eq!(response.data().unwrap().len(), (count as usize).div_ceil(8));
        }
    }

    #[test]
    fn test_register_read_length_is_twice_count() {
        let device = MemoryDevice::new().with_holding_registers(0, MAX_REGISTER_COUNT_READ);
        let mut server = ModbusServer::new(1, device).unwrap();
        for count in MIN_COUNT..=MAX_REGISTER_COUNT_READ {
            let request = Request::new(1, FunctionCode::ReadHoldingRegisters, 0, count, Vec::new());
            let response = server.handle(&request).unwrap();
            assert_eq!(response.data().unwrap().len(), count as usize * 2);
        }
    }

    #[test]
    fn test_register_read_over_limit() {
        let mut server = ten_coil_server();
        let request = Request::new(1, FunctionCode::ReadHoldingRegisters, 5, 200, Vec::new());
        let response = server.handle(&request).unwrap();
        assert_eq!(response.error_code(), ErrorCode::IllegalDataValue);
        assert!(response.data().is_none());
    }

    #[test]
    fn test_count_bounds() {
        let mut server = recording_server(RecordingDevice::default());
        let cases = [
            (FunctionCode::ReadCoils, 0, Vec::new()),
            (FunctionCode::ReadCoils, MAX_COIL_COUNT_READ + 1, Vec::new()),
            (FunctionCode::ReadDiscreteInputs, MAX_COIL_COUNT_READ + 1, Vec::new()),
            (FunctionCode::ReadHoldingRegisters, 0, Vec::new()),
            (FunctionCode::ReadHoldingRegisters, MAX_REGISTER_COUNT_READ + 1, Vec::new()),
            (FunctionCode::ReadInputRegisters, MAX_REGISTER_COUNT_READ + 1, Vec::new()),
            (FunctionCode::WriteMultipleCoils, 0, Vec::new()),
            (FunctionCode::WriteMultipleCoils, MAX_COIL_COUNT_WRITE + 1, vec![0; 247]),
            (FunctionCode::WriteMultipleRegisters, 0, Vec::new()),
            (FunctionCode::WriteMultipleRegisters, MAX_REGISTER_COUNT_WRITE + 1, vec![0; 248]),
        ];
        for (function, count, data) in cases {
            let response = server.handle(&Request::new(7, function, 0, count, data)).unwrap();
            let code = response.error_code();
            assert_eq!(code, ErrorCode::IllegalDataValue, "{} x{}", function, count);
        }
        let device = server.device();
        assert_eq!(device.begin_read + device.begin_write, 0);
    }

    #[test]
    fn test_multiple_write_data_length_mismatch() {
        let mut server = recording_server(RecordingDevice::default());
        let coils = Request::new(7, FunctionCode::WriteMultipleCoils, 0, 9, vec![0xFF]);
        assert_eq!(server.handle(&coils).unwrap().error_code(), ErrorCode::IllegalDataValue);
        let registers = Request::new(7, FunctionCode::WriteMultipleRegisters, 0, 2, vec![0, 1, 0]);
        assert_eq!(server.handle(&registers).unwrap().error_code(), ErrorCode::IllegalDataValue);
        assert!(server.device().coil_writes.is_empty());
        assert!(server.device().register_writes.is_empty());
    }

    #[test]
    fn test_write_single_coil_rejects_other_values() {
        let mut server = recording_server(RecordingDevice::default());
        for value in [0x0001u16, 0x00FF, 0xFF01, 0xFFFF, 0x1234] {
            let data = value.to_be_bytes().to_vec();
            let request = Request::new(7, FunctionCode::WriteSingleCoil, 3, 1, data);
            let response = server.handle(&request).unwrap();
            assert_eq!(response.error_code(), ErrorCode::IllegalDataValue);
        }
        assert!(server.device().coil_writes.is_empty());
        assert_eq!(server.device().begin_write, 0);
    }

    #[test]
    fn test_write_single_coil_echoes_request() {
        let mut server = recording_server(RecordingDevice::default());
        let request = Request::new(7, FunctionCode::WriteSingleCoil, 3, 1, vec![0xFF, 0x00]);
        let response = server.handle(&request).unwrap();
        assert_eq!(response.data(), Some(&[0xFF, 0x00][..]));
        assert_eq!(server.device().coil_writes, vec![(3, true)]);
        assert_eq!(response.encode(), vec![0x07, 0x05, 0x00, 0x03, 0xFF, 0x00]);
    }

    #[test]
    fn test_write_single_register_round_trip() {
        let mut server = ten_coil_server();
        let write = Request::new(1, FunctionCode::WriteSingleRegister, 4, 1, vec![0xAB, 0xCD]);
        let response = server.handle(&write).unwrap();
        assert_eq!(response.data(), Some(&[0xAB, 0xCD][..]));

        let read = Request::new(1, FunctionCode::ReadHoldingRegisters, 4, 1, Vec::new());
        let response = server.handle(&read).unwrap();
        assert_eq!(response.data(), Some(&[0xAB, 0xCD][..]));
    }

    #[test]
    fn test_missing_address_still_ends_transaction() {
        let mut server = recording_server(RecordingDevice {
            missing: Some(12),
            ..Default::default()
        });
        let read = Request::new(7, FunctionCode::ReadHoldingRegisters, 10, 5, Vec::new());
        let response = server.handle(&read).unwrap();
        assert_eq!(response.error_code(), ErrorCode::IllegalDataAddress);
        assert!(response.data().is_none());
        assert_eq!((server.device().begin_read, server.device().end_read), (1, 1));

        let write = Request::new(7, FunctionCode::WriteSingleCoil, 12, 1, vec![0x00, 0x00]);
        let response = server.handle(&write).unwrap();
        assert_eq!(response.error_code(), ErrorCode::IllegalDataAddress);
        assert_eq!((server.device().begin_write, server.device().end_write), (1, 1));
    }

    #[test]
    fn test_missing_address_ends_one_bracket_for_every_function() {
        let cases = [
            (FunctionCode::ReadCoils, 10, 3, Vec::new()),
            (FunctionCode::ReadDiscreteInputs, 10, 3, Vec::new()),
            (FunctionCode::ReadHoldingRegisters, 10, 3, Vec::new()),
            (FunctionCode::ReadInputRegisters, 10, 3, Vec::new()),
            (FunctionCode::WriteSingleCoil, 12, 1, vec![0xFF, 0x00]),
            (FunctionCode::WriteSingleRegister, 12, 1, vec![0x00, 0x05]),
            (FunctionCode::WriteMultipleCoils, 10, 3, vec![0x07]),
            (FunctionCode::WriteMultipleRegisters, 10, 3, vec![0; 6]),
        ];
        for (function, address, count, data) in cases {
            let mut server = recording_server(RecordingDevice {
                missing: Some(12),
                ..Default::default()
            });
            let request = Request::new(7, function, address, count, data);
            let response = server.handle(&request).unwrap();
            assert_eq!(response.error_code(), ErrorCode::IllegalDataAddress, "{}", function);
            assert!(response.data().is_none(), "{}", function);

            let device = server.device();
            let (reads, writes) = if function.is_read() {
                ((1, 1), (0, 0))
            } else {
                ((0, 0), (1, 1))
            };
            assert_eq!((device.begin_read, device.end_read), reads, "{}", function);
            assert_eq!((device.begin_write, device.end_write), writes, "{}", function);
        }
    }

    #[test]
    fn test_partial_write_is_not_rolled_back() {
        let mut server = recording_server(RecordingDevice {
            missing: Some(2),
            ..Default::default()
        });
        let data = vec![0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04];
        let request = Request::new(7, FunctionCode::WriteMultipleRegisters, 0, 4, data);
        let response = server.handle(&request).unwrap();
        assert_eq!(response.error_code(), ErrorCode::IllegalDataAddress);
        assert_eq!(server.device().register_writes, vec![(0, 1), (1, 2)]);
        assert_eq!(server.device().end_write, 1);
    }

    #[test]
    fn test_device_fault_becomes_slave_failure() {
        let mut server = recording_server(RecordingDevice {
            faulty: Some(1),
            ..Default::default()
        });
        let request = Request::new(7, FunctionCode::ReadInputRegisters, 0, 3, Vec::new());
        let response = server.handle(&request).unwrap();
        assert_eq!(response.error_code(), ErrorCode::SlaveDeviceFailure);
        assert!(response.data().is_none());
        assert_eq!(server.device().end_read, 1);
        assert_eq!(response.encode(), vec![0x07, 0x84, 0x04]);
    }

    #[test]
    fn test_one_bracket_per_request() {
        let mut server = recording_server(RecordingDevice::default());
        server.handle(&Request::new(7, FunctionCode::ReadCoils, 0, 16, Vec::new()));
        server.handle(&Request::new(7, FunctionCode::ReadDiscreteInputs, 0, 16, Vec::new()));
        server.handle(&Request::new(7, FunctionCode::WriteMultipleCoils, 0, 16, vec![0xFF, 0x00]));
        let device = server.device();
        assert_eq!((device.begin_read, device.end_read), (2, 2));
        assert_eq!((device.begin_write, device.end_write), (1, 1));
        assert_eq!(device.coil_writes.len(), 16);
        assert!(device.coil_writes[..8].iter().all(|(_, value)| *value));
        assert!(device.coil_writes[8..].iter().all(|(_, value)| !*value));
    }

    #[test]
    fn test_read_payload_packing() {
        let mut server = recording_server(RecordingDevice::default());
        // even addresses read true
        let response = server
            .handle(&Request::new(7, FunctionCode::ReadCoils, 0, 10, Vec::new()))
            .unwrap();
        assert_eq!(response.data(), Some(&[0x55, 0x01][..]));

        let response = server
            .handle(&Request::new(7, FunctionCode::ReadInputRegisters, 1, 2, Vec::new()))
            .unwrap();
        assert_eq!(response.data(), Some(&[0x03, 0xE9, 0x03, 0xEA][..]));
    }

    #[test]
    fn test_address_overflow_is_illegal_address() {
        let mut server = recording_server(RecordingDevice::default());
        let request = Request::new(7, FunctionCode::ReadHoldingRegisters, 0xFFFF, 2, Vec::new());
        let response = server.handle(&request).unwrap();
        assert_eq!(response.error_code(), ErrorCode::IllegalDataAddress);
        assert_eq!(server.device().end_read, 1);
    }

    #[test]
    fn test_device_id_mismatch_never_replies() {
        let mut server = recording_server(RecordingDevice::default());
        let requests = [
            Request::new(8, FunctionCode::ReadCoils, 0, 1, Vec::new()),
            Request::new(8, FunctionCode::Unknown(0x41), 0, 0, Vec::new()),
            Request::new(0, FunctionCode::WriteSingleCoil, 0, 1, vec![0xFF, 0x00]),
            Request::malformed(8, FunctionCode::ReadCoils),
        ];
        for request in &requests {
            assert!(server.handle(request).is_none());
        }
        assert_eq!(server.device().begin_read + server.device().begin_write, 0);
    }

    #[test]
    fn test_broadcast_write_executes_silently() {
        let mut server = recording_server(RecordingDevice::default()).with_broadcast(true);
        let write = Request::new(0, FunctionCode::WriteSingleRegister, 9, 1, vec![0x00, 0x2A]);
        assert!(server.handle(&write).is_none());
        assert_eq!(server.device().register_writes, vec![(9, 42)]);

        let read = Request::new(0, FunctionCode::ReadHoldingRegisters, 0, 1, Vec::new());
        assert!(server.handle(&read).is_none());
        assert_eq!(server.device().begin_read, 0);
    }

    #[test]
    fn test_malformed_frame_gets_empty_acknowledgement() {
        let mut server = recording_server(RecordingDevice::default());
        let response = server.handle(&Request::malformed(7, FunctionCode::ReadCoils)).unwrap();
        assert!(response.is_error());
        assert!(response.data().is_none());
        assert!(response.encode().is_empty());
    }

    #[test]
    fn test_unknown_and_encapsulated_functions() {
        let mut server = recording_server(RecordingDevice::default());

        let device_id = server.handle_frame(&[0x07, 0x2B, 0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(device_id, vec![0x07, 0xAB, 0x01]);

        let other_mei = Request::new(7, FunctionCode::EncapsulatedInterface, 0, 0, vec![0x0D]);
        let response = server.handle(&other_mei).unwrap();
        assert_eq!(response.error_code(), ErrorCode::NegativeAcknowledge);

        let unknown = server.handle_frame(&[0x07, 0x41, 0x00, 0x00]).unwrap();
        assert_eq!(unknown, vec![0x07, 0xC1, 0x01]);
    }

    #[test]
    fn test_handle_frame_read_holding_registers() {
        let mut server = ten_coil_server();
        server.device_mut().set_holding_register(1, 0x022B);
        let reply = server.handle_frame(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(reply, vec![0x01, 0x03, 0x04, 0x02, 0x2B, 0x00, 0x00]);
        assert!(server.handle_frame(&[0x02, 0x03, 0x00, 0x01, 0x00, 0x02]).is_none());
        assert!(server.handle_frame(&[]).is_none());
    }

    #[test]
    fn test_rejects_out_of_range_device_id() {
        assert!(ModbusServer::new(0, MemoryDevice::new()).is_err());
        assert!(ModbusServer::new(248, MemoryDevice::new()).is_err());
        assert!(ModbusServer::new(247, MemoryDevice::new()).is_ok());
    }
}
