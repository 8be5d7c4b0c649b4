//! Wire framing for the M210 HID protocol: the 3-byte outbound report
//! prefix and the bounded-wait inbound reads, including suppression of
//! spontaneous mode-button events on interface 0.

use std::time::Duration;

use log::trace;

use crate::error::{M210Error, Result};

/// Default wait for a single poll-style read, used when a [`crate::session::SessionConfig`]
/// does not override it.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Default wait for a bulk packet read, used when a [`crate::session::SessionConfig`]
/// does not override it.
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum bytes of an inbound frame on interface 0 (commands and data).
pub const MAX_FRAME_CONTROL: usize = 64;
/// Maximum bytes of an inbound frame on interface 1 (realtime events).
pub const MAX_FRAME_EVENT: usize = 9;

/// A spontaneous "mode button" frame begins with these two bytes and must
/// be discarded wherever it appears in the command conversation.
const MODE_BUTTON_PREFIX: [u8; 2] = [0x80, 0xB5];

/// The two HID interfaces the device exposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interface {
    /// Interface 0: commands and bulk data.
    Control,
    /// Interface 1: realtime pen events. Unused by the download core.
    Event,
}

impl Interface {
    fn max_frame(self) -> usize {
        match self {
            Interface::Control => MAX_FRAME_CONTROL,
            Interface::Event => MAX_FRAME_EVENT,
        }
    }
}

/// The byte-level seam the session layer talks through. Implemented by the
/// real `rusb`-backed device handle and, in tests, by an in-memory fake.
pub trait Transport {
    /// Write `frame` to interface 0 in a single call. A short write is an error.
    fn write_frame(&self, frame: &[u8]) -> Result<()>;

    /// Attempt to read up to `buf.len()` bytes from `interface`, waiting at
    /// most `timeout`. Returns the number of bytes read, or `M210Error::Timeout`
    /// if the wait elapsed with nothing available.
    fn read_frame(&self, interface: Interface, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Prepend the mandatory `00 02 len` prefix to `payload` and write the
/// resulting frame to endpoint 0.
pub fn write_command<T: Transport + ?Sized>(transport: &T, payload: &[u8]) -> Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(0x00); // padding: without this byte the device withholds its response
    frame.push(0x02); // report id
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    trace!("write frame: {:02x?}", frame);
    transport.write_frame(&frame)
}

/// Read one frame from `interface`, silently dropping and retrying any
/// spontaneous mode-button event, and copying into a fixed-size buffer
/// truncated or zero-padded to `N` bytes.
pub fn read_frame<T: Transport + ?Sized, const N: usize>(
    transport: &T,
    interface: Interface,
    timeout: Duration,
) -> Result<[u8; N]> {
    let mut raw = vec![0u8; interface.max_frame()];
    loop {
        let n = transport.read_frame(interface, &mut raw, timeout)?;
        if interface == Interface::Control && raw.starts_with(&MODE_BUTTON_PREFIX) {
            trace!("dropping spontaneous mode-button frame");
            continue;
        }
        trace!("read frame ({} bytes): {:02x?}", n, &raw[..n]);
        let mut out = [0u8; N];
        let copy_len = n.min(N);
        out[..copy_len].copy_from_slice(&raw[..copy_len]);
        return Ok(out);
    }
}

pub(crate) fn bad_message(what: impl Into<String>) -> M210Error {
    M210Error::BadMessage(what.into())
}
