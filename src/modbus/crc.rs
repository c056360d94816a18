use crate::utils::error::ModbusError;

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    let poly: u16 = 0xA001;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the RTU checksum, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Verify and remove the trailing checksum of an RTU frame.
pub fn strip_crc(frame: &[u8]) -> Result<&[u8], ModbusError> {
    if frame.len() < 4 {
        return Err(ModbusError::InvalidFrame(format!(
            "{} bytes is too short for an RTU frame",
            frame.len()
        )));
    }

    let data_len = frame.len() - 2;
    let received_crc = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let calculated_crc = crc16_modbus(&frame[..data_len]);

    if received_crc != calculated_crc {
        return Err(ModbusError::CrcError);
    }

    Ok(&frame[..data_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus() {
        // read coils, slave 1, address 0, quantity 1
        let data = vec![0x01, 0x01, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16_modbus(&data), 0xCAFD);

        let data = vec![0x01, 0x05, 0x00, 0x03, 0xFF, 0x00];
        assert_eq!(crc16_modbus(&data), 0x3A7C);
    }

    #[test]
    fn test_append_then_strip() {
        let mut frame = vec![0x01, 0x01, 0x00, 0x00, 0x00, 0x01];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0xFD, 0xCA]);
        assert_eq!(strip_crc(&frame).unwrap(), &[0x01, 0x01, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_strip_rejects_corrupt_frame() {
        let frame = [0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFD, 0xCB];
        assert!(matches!(strip_crc(&frame), Err(ModbusError::CrcError)));
        assert!(matches!(strip_crc(&[0x01, 0x02]), Err(ModbusError::InvalidFrame(_))));
    }
}
