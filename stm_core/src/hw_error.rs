//! Maps `Box<dyn Error>` from trait boundaries to typed `StmError`.
//!
//! With the `hardware-errors` feature, `stm_hardware::HwError` is downcast
//! for a precise mapping; anything else falls back to its message.

use crate::error::StmError;

/// Map a trait-boundary error to a typed `StmError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> StmError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<stm_hardware::HwError>() {
            return match hw {
                stm_hardware::HwError::ChannelOutOfRange(_) => StmError::Config(hw.to_string()),
                other => StmError::HardwareFault(other.to_string()),
            };
        }
    }

    StmError::Hardware(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_errors_keep_their_message() {
        let e = std::io::Error::other("bus wedged");
        match map_hw_error(&e) {
            StmError::Hardware(msg) => assert!(msg.contains("bus wedged")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_are_faults() {
        let e = stm_hardware::HwError::Spi("no ack".into());
        assert!(matches!(map_hw_error(&e), StmError::HardwareFault(_)));
        let e = stm_hardware::HwError::ChannelOutOfRange(9);
        assert!(matches!(map_hw_error(&e), StmError::Config(_)));
    }
}
