use thiserror::Error;

/// Errors surfaced by every layer of the driver: framing, commands, the
/// session state machine and the note-stream decoder.
#[derive(Error, Debug)]
pub enum M210Error {
    #[error("USB transport error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no M210 device found")]
    NoDevice,

    #[error("opened device does not identify as a Pegasus M210 (vendor/product mismatch)")]
    BadDevice,

    #[error("unexpected response from device: {0}")]
    BadMessage(String),

    #[error("timed out waiting for a response from the device")]
    Timeout,

    #[error("malformed note head: {0}")]
    BadNoteHead(String),

    #[error("malformed note body: {0}")]
    BadNoteBody(String),

    #[error("note stream ended before the expected data was read")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, M210Error>;
