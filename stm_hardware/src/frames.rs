//! Wire framing for the piezo DAC and the TIA ADC.
//!
//! The DAC takes 32-bit frames: a command byte, then the channel address in the
//! high nibble of byte 1 followed by the 16-bit code left-aligned over the
//! remaining 20 bits. The ADC returns its 16-bit code MSB first.

use crate::error::{HwError, Result};

/// Highest addressable DAC channel.
pub const MAX_CHANNEL: u8 = 7;

/// Write input register and update output.
pub const CMD_WRITE_UPDATE: u8 = 0b0000_0011;

/// Power up all eight outputs.
pub const ENABLE_ALL_OUTPUTS: [u8; 4] = [0b0000_0100, 0x00, 0x00, 0xFF];

/// Switch the DAC to its internal voltage reference.
pub const INTERNAL_REFERENCE: [u8; 4] = [0b0000_1000, 0x00, 0x00, 0x01];

/// Frame a write-and-update of one channel.
pub fn encode_channel_write(channel: u8, value: u16) -> Result<[u8; 4]> {
    if channel > MAX_CHANNEL {
        return Err(HwError::ChannelOutOfRange(channel));
    }
    let [msb, lsb] = value.to_be_bytes();
    Ok([
        CMD_WRITE_UPDATE,
        (channel << 4) | (msb >> 4),
        (msb << 4) | (lsb >> 4),
        lsb << 4,
    ])
}

/// Inverse of [`encode_channel_write`]; used by loopback tests and the simulator.
pub fn decode_channel_write(frame: [u8; 4]) -> Option<(u8, u16)> {
    if frame[0] != CMD_WRITE_UPDATE {
        return None;
    }
    let channel = frame[1] >> 4;
    let msb = (frame[1] << 4) | (frame[2] >> 4);
    let lsb = (frame[2] << 4) | (frame[3] >> 4);
    Some((channel, u16::from_be_bytes([msb, lsb])))
}

/// Assemble the two bytes clocked out of the TIA ADC.
#[inline]
pub fn decode_sample(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}
