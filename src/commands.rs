//! Typed wrappers around the device's request payloads.
//!
//! Each variant encodes to the bytes the wire protocol expects; see §4.2
//! of the protocol notes. `0xB7` is overloaded: alone it means "abort the
//! bulk transfer", followed by a packet number it means "resend this packet".

/// A single outbound command payload, before the `00 02 len` frame header
/// is applied by [`crate::framing::write_command`].
#[derive(Copy, Clone, Debug)]
pub enum Command {
    /// `0x95` - ask the device to identify itself.
    Info,
    /// `0xB0` - wipe the on-device note storage.
    Erase,
    /// `0xB5` - ask for the packet count ahead of a bulk transfer.
    BeginDownload,
    /// `0xB6` - acknowledge and (re)start, or conclude, the bulk transfer.
    Accept,
    /// `0xB7` - abort the bulk transfer.
    Reject,
    /// `0xB7` followed by a big-endian packet number - ask for a resend.
    Resend(u16),
}

impl Command {
    /// Encode this command to its wire payload (1-4 bytes).
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Command::Info => vec![0x95],
            Command::Erase => vec![0xB0],
            Command::BeginDownload => vec![0xB5],
            Command::Accept => vec![0xB6],
            Command::Reject => vec![0xB7],
            Command::Resend(n) => {
                let [hi, lo] = n.to_be_bytes();
                vec![0xB7, hi, lo]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_commands() {
        assert_eq!(Command::Info.to_bytes(), vec![0x95]);
        assert_eq!(Command::Erase.to_bytes(), vec![0xB0]);
        assert_eq!(Command::BeginDownload.to_bytes(), vec![0xB5]);
        assert_eq!(Command::Accept.to_bytes(), vec![0xB6]);
        assert_eq!(Command::Reject.to_bytes(), vec![0xB7]);
    }

    #[test]
    fn resend_does_not_collapse_with_reject() {
        let reject = Command::Reject.to_bytes();
        let resend = Command::Resend(3).to_bytes();
        assert_ne!(reject, resend);
        assert_eq!(resend, vec![0xB7, 0x00, 0x03]);
    }

    #[test]
    fn resend_is_big_endian() {
        assert_eq!(Command::Resend(0x0102).to_bytes(), vec![0xB7, 0x01, 0x02]);
    }
}
