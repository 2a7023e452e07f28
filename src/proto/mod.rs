//! DUT control protocol: fixed ports and wire codecs.

pub mod wire;

pub use wire::{
    decode_ack, decode_control, encode_control, is_ready_beacon, AckPacket, AckStatus,
    ControlFrame, WireError,
};

/// UDP port of the control/test exchange, both ends.
pub const CONTROL_PORT: u16 = 7999;

/// UDP port the DUT broadcasts its post-boot readiness beacon on.
pub const READINESS_PORT: u16 = 4094;
