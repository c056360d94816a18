use std::fmt;

use super::constants::EXCEPTION_FLAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    EncapsulatedInterface,
    Unknown(u8),
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
            FunctionCode::EncapsulatedInterface => 0x2B,
            FunctionCode::Unknown(code) => code,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
        )
    }
}

impl From<u8> for FunctionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => FunctionCode::ReadCoils,
            0x02 => FunctionCode::ReadDiscreteInputs,
            0x03 => FunctionCode::ReadHoldingRegisters,
            0x04 => FunctionCode::ReadInputRegisters,
            0x05 => FunctionCode::WriteSingleCoil,
            0x06 => FunctionCode::WriteSingleRegister,
            0x0F => FunctionCode::WriteMultipleCoils,
            0x10 => FunctionCode::WriteMultipleRegisters,
            0x2B => FunctionCode::EncapsulatedInterface,
            other => FunctionCode::Unknown(other),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCode::Unknown(code) => write!(f, "Unknown(0x{:02x})", code),
            other => write!(f, "{:?}(0x{:02x})", other, other.code()),
        }
    }
}

/// Modbus exception codes. `NoError` never goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    NoError = 0x00,
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    /// Also used for the zero-length reply to a malformed frame.
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub count: u16,
    pub data: Vec<u8>,
    pub is_valid: bool,
}

impl Request {
    pub fn new(
        device_id: u8,
        function: FunctionCode,
        address: u16,
        count: u16,
        data: Vec<u8>,
    ) -> Self {
        Self {
            device_id,
            function,
            address,
            count,
            data,
            is_valid: true,
        }
    }

    pub fn malformed(device_id: u8, function: FunctionCode) -> Self {
        Self {
            device_id,
            function,
            address: 0,
            count: 0,
            data: Vec::new(),
            is_valid: false,
        }
    }

    /// Decode a frame whose checksum has already been verified and removed.
    ///
    /// Returns `None` only for an empty frame. Frames with an inconsistent
    /// shape come back with `is_valid == false`.
    ///
    /// Single writes are decoded with `count == 1` and the written value in `data`.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let (&device_id, rest) = frame.split_first()?;
        let Some((&code, body)) = rest.split_first() else {
            return Some(Self::malformed(device_id, FunctionCode::Unknown(0)));
        };
        let function = FunctionCode::from(code);

        let request = match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                if body.len() != 4 {
                    return Some(Self::malformed(device_id, function));
                }
                Self::new(device_id, function, be_u16(body, 0), be_u16(body, 2), Vec::new())
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                if body.len() != 4 {
                    return Some(Self::malformed(device_id, function));
                }
                Self::new(device_id, function, be_u16(body, 0), 1, body[2..4].to_vec())
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                if body.len() < 5 {
                    return Some(Self::malformed(device_id, function));
                }
                let byte_count = body[4] as usize;
                let data = &body[5..];
                if data.len() != byte_count {
                    return Some(Self::malformed(device_id, function));
                }
                Self::new(device_id, function, be_u16(body, 0), be_u16(body, 2), data.to_vec())
            }
            FunctionCode::EncapsulatedInterface | FunctionCode::Unknown(_) => {
                Self::new(device_id, function, 0, 0, body.to_vec())
            }
        };

        Some(request)
    }
}

/// Reply under construction for one request.
///
/// Once an exception code is set the payload is dropped and further
/// `set_data` calls are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    device_id: u8,
    function: FunctionCode,
    address: u16,
    count: u16,
    error_code: ErrorCode,
    data: Option<Vec<u8>>,
}

impl Response {
    pub fn for_request(request: &Request) -> Self {
        Self {
            device_id: request.device_id,
            function: request.function,
            address: request.address,
            count: request.count,
            error_code: ErrorCode::NoError,
            data: None,
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn function(&self) -> FunctionCode {
        self.function
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    pub fn is_error(&self) -> bool {
        self.error_code != ErrorCode::NoError
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn set_error(&mut self, error_code: ErrorCode) {
        self.error_code = error_code;
        if self.is_error() {
            self.data = None;
        }
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        if !self.is_error() {
            self.data = Some(data);
        }
    }

    /// Serialize to `[device id][PDU]` without checksum.
    pub fn encode(&self) -> Vec<u8> {
        let code = self.function.code();

        match self.error_code {
            ErrorCode::NoError => {}
            ErrorCode::Acknowledge => return Vec::new(),
            error => return vec![self.device_id, code | EXCEPTION_FLAG, error.code()],
        }

        let data = self.data.as_deref().unwrap_or_default();
        let mut frame = Vec::with_capacity(data.len() + 6);
        frame.push(self.device_id);
        frame.push(code);

        match self.function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                frame.push(data.len() as u8);
                frame.extend_from_slice(data);
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                frame.extend_from_slice(&self.address.to_be_bytes());
                frame.extend_from_slice(data);
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                frame.extend_from_slice(&self.address.to_be_bytes());
                frame.extend_from_slice(&self.count.to_be_bytes());
            }
            FunctionCode::EncapsulatedInterface | FunctionCode::Unknown(_) => {
                frame.extend_from_slice(data);
            }
        }

        frame
    }
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// Pack coil states LSB-first, `ceil(n/8)` bytes.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Bit `index` of an LSB-first packed buffer. Out-of-range bits read as false.
pub fn bit_at(packed: &[u8], index: usize) -> bool {
    packed
        .get(index / 8)
        .map(|byte| byte & (1 << (index % 8)) != 0)
        .unwrap_or(false)
}

pub fn pack_registers(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_be_bytes()).collect()
}
