//! Fixed-layout little-endian codecs for the DUT control link.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::plan::TestInvocation;

/// Control packet size on the wire.
pub const CONTROL_PACKET_LEN: usize = 160;

/// Acknowledgement packet size on the wire.
pub const ACK_PACKET_LEN: usize = 10;

/// Width of the NUL-padded interface name field.
pub const INTERFACE_FIELD_LEN: usize = 128;

/// Magic marker of a readiness beacon, little-endian at byte offset 2.
pub const READY_MAGIC: u32 = 0xFEE1_7357;

/// Sentinel of a readiness beacon, little-endian at byte offset 6.
pub const READY_SENTINEL: u32 = 0xFFFF_FFFF;

// DUT firmware checks this length field verbatim.
const FIXED_LENGTH: i32 = 136;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("ack datagram too short: got {0} bytes, need {ACK_PACKET_LEN}")]
    MalformedAck(usize),

    #[error("control datagram too short: got {0} bytes, need {CONTROL_PACKET_LEN}")]
    MalformedControl(usize),

    #[error("interface name '{0}' exceeds the {INTERFACE_FIELD_LEN}-byte wire field")]
    InterfaceTooLong(String),
}

/// Ack status as reported by the DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Test accepted.
    Ack,
    /// The DUT firmware does not know this test type.
    UnknownTestType,
    /// The DUT is still busy with a previous request; keep reading.
    Busy,
    /// Any other status code.
    Nack(u32),
}

impl From<u32> for AckStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => AckStatus::Ack,
            1 => AckStatus::UnknownTestType,
            2 => AckStatus::Busy,
            other => AckStatus::Nack(other),
        }
    }
}

/// Decoded acknowledgement datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub test_id: i32,
    pub status: AckStatus,
}

/// Encode one invocation as a start (`stop = false`) or stop (`stop = true`)
/// control packet.
///
/// The sequence field is written twice; deployed DUT firmware expects both
/// copies, so the duplicate is kept for wire compatibility.
pub fn encode_control(invocation: &TestInvocation, stop: bool) -> Result<Bytes, WireError> {
    let name = invocation.interface.as_bytes();
    if name.len() > INTERFACE_FIELD_LEN {
        return Err(WireError::InterfaceTooLong(invocation.interface.clone()));
    }

    let mut buf = BytesMut::with_capacity(CONTROL_PACKET_LEN);
    buf.put_u32_le(invocation.sequence);
    buf.put_u32_le(invocation.sequence);
    buf.put_u32_le(invocation.test_id);
    buf.put_i32_le(FIXED_LENGTH);
    buf.put_u32_le(invocation.duration_secs);
    buf.put_u32_le(u32::from(stop));
    buf.put_slice(name);
    buf.put_bytes(0, INTERFACE_FIELD_LEN - name.len());
    buf.put_u32_le(invocation.address);
    buf.put_u32_le(invocation.mask);
    debug_assert_eq!(buf.len(), CONTROL_PACKET_LEN);

    Ok(buf.freeze())
}

/// Decode an acknowledgement datagram.
pub fn decode_ack(data: &[u8]) -> Result<AckPacket, WireError> {
    if data.len() < ACK_PACKET_LEN {
        return Err(WireError::MalformedAck(data.len()));
    }

    let mut buf = &data[2..ACK_PACKET_LEN];
    let test_id = buf.get_i32_le();
    let status = AckStatus::from(buf.get_u32_le());
    Ok(AckPacket { test_id, status })
}

/// A control packet as the DUT firmware sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub sequence: u32,
    pub test_id: u32,
    pub duration_secs: u32,
    pub stop: bool,
    pub interface: String,
    pub address: u32,
    pub mask: u32,
}

/// Decode a control packet.
pub fn decode_control(data: &[u8]) -> Result<ControlFrame, WireError> {
    if data.len() < CONTROL_PACKET_LEN {
        return Err(WireError::MalformedControl(data.len()));
    }

    let mut buf = data;
    let sequence = buf.get_u32_le();
    let _duplicate = buf.get_u32_le();
    let test_id = buf.get_u32_le();
    let _fixed_length = buf.get_i32_le();
    let duration_secs = buf.get_u32_le();
    let stop = buf.get_u32_le() != 0;

    let name = &buf[..INTERFACE_FIELD_LEN];
    let end = name.iter().position(|&b| b == 0).unwrap_or(INTERFACE_FIELD_LEN);
    let interface = String::from_utf8_lossy(&name[..end]).into_owned();
    buf.advance(INTERFACE_FIELD_LEN);

    let address = buf.get_u32_le();
    let mask = buf.get_u32_le();

    Ok(ControlFrame {
        sequence,
        test_id,
        duration_secs,
        stop,
        interface,
        address,
        mask,
    })
}

/// Check whether a broadcast datagram is a valid DUT readiness beacon.
pub fn is_ready_beacon(data: &[u8]) -> bool {
    if data.len() < 10 {
        return false;
    }
    let magic = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
    let sentinel = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
    magic == READY_MAGIC && sentinel == READY_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> TestInvocation {
        TestInvocation {
            sequence: 7,
            test_id: 3,
            interface: "eth0".to_string(),
            duration_secs: 30,
            address: 0x1000,
            mask: 0xFF,
        }
    }

    #[test]
    fn control_packet_layout() {
        let packet = encode_control(&invocation(), false).unwrap();
        assert_eq!(packet.len(), CONTROL_PACKET_LEN);

        // sequence is duplicated in the first eight bytes
        assert_eq!(&packet[0..4], &7u32.to_le_bytes());
        assert_eq!(&packet[4..8], &7u32.to_le_bytes());
        assert_eq!(&packet[8..12], &3u32.to_le_bytes());
        assert_eq!(&packet[12..16], &136i32.to_le_bytes());
        assert_eq!(&packet[16..20], &30u32.to_le_bytes());
        assert_eq!(&packet[20..24], &0u32.to_le_bytes());
        assert_eq!(&packet[24..28], b"eth0");
        assert!(packet[28..152].iter().all(|&b| b == 0));
        assert_eq!(&packet[152..156], &0x1000u32.to_le_bytes());
        assert_eq!(&packet[156..160], &0xFFu32.to_le_bytes());
    }

    #[test]
    fn stop_flag_set_on_stop_packet() {
        let packet = encode_control(&invocation(), true).unwrap();
        assert_eq!(&packet[20..24], &1u32.to_le_bytes());
    }

    #[test]
    fn control_round_trip() {
        let inv = invocation();
        let frame = decode_control(&encode_control(&inv, false).unwrap()).unwrap();
        assert_eq!(frame.sequence, inv.sequence);
        assert_eq!(frame.test_id, inv.test_id);
        assert_eq!(frame.interface, inv.interface);
        assert_eq!(frame.duration_secs, inv.duration_secs);
        assert_eq!(frame.address, inv.address);
        assert_eq!(frame.mask, inv.mask);
        assert!(!frame.stop);

        let frame = decode_control(&encode_control(&inv, true).unwrap()).unwrap();
        assert!(frame.stop);
        assert_eq!(frame.sequence, inv.sequence);
        assert_eq!(frame.test_id, inv.test_id);
    }

    #[test]
    fn interface_name_too_long_rejected() {
        let mut inv = invocation();
        inv.interface = "x".repeat(INTERFACE_FIELD_LEN + 1);
        assert!(matches!(
            encode_control(&inv, false),
            Err(WireError::InterfaceTooLong(_))
        ));
    }

    fn ack_bytes(test_id: i32, status: u32) -> [u8; ACK_PACKET_LEN] {
        let mut buf = [0u8; ACK_PACKET_LEN];
        buf[2..6].copy_from_slice(&test_id.to_le_bytes());
        buf[6..10].copy_from_slice(&status.to_le_bytes());
        buf
    }

    #[test]
    fn ack_status_mapping() {
        assert_eq!(decode_ack(&ack_bytes(3, 0)).unwrap().status, AckStatus::Ack);
        assert_eq!(
            decode_ack(&ack_bytes(3, 1)).unwrap().status,
            AckStatus::UnknownTestType
        );
        assert_eq!(decode_ack(&ack_bytes(3, 2)).unwrap().status, AckStatus::Busy);
        assert_eq!(
            decode_ack(&ack_bytes(3, 9)).unwrap().status,
            AckStatus::Nack(9)
        );
        assert_eq!(decode_ack(&ack_bytes(-5, 0)).unwrap().test_id, -5);
    }

    #[test]
    fn short_ack_rejected() {
        assert!(matches!(
            decode_ack(&[0u8; ACK_PACKET_LEN - 1]),
            Err(WireError::MalformedAck(9))
        ));
    }

    #[test]
    fn beacon_validation() {
        let mut beacon = [0u8; 16];
        beacon[2..6].copy_from_slice(&READY_MAGIC.to_le_bytes());
        beacon[6..10].copy_from_slice(&READY_SENTINEL.to_le_bytes());
        assert!(is_ready_beacon(&beacon));

        // wrong magic
        beacon[2] ^= 0xFF;
        assert!(!is_ready_beacon(&beacon));
        beacon[2] ^= 0xFF;

        // wrong sentinel
        beacon[6] = 0;
        assert!(!is_ready_beacon(&beacon));

        // too short
        assert!(!is_ready_beacon(&[0u8; 9]));
    }
}
