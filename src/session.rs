//! Stateful request/response conversations with the device: `get_info`,
//! `get_packet_count`, `download_all_packets` and `erase`. This is where
//! the "empty on timeout" inference and the packet-loss recovery loop
//! live; everything below is otherwise-stateless framing and commands.

use std::io::Write as IoWrite;
use std::time::Duration;

use log::{debug, info, warn};

use crate::commands::Command;
use crate::error::{M210Error, Result};
use crate::framing::{self, read_frame, write_command, Interface};

/// Size in bytes of one packet's payload, once the 2-byte sequence number
/// has been stripped.
pub const PACKET_PAYLOAD_SIZE: usize = 62;

/// Runtime-tunable timeouts for a [`Session`]. Overriding these is mainly
/// useful for driving a fake transport in tests faster than real hardware
/// would ever respond.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `get_info`'s poll loop waits per attempt.
    pub poll_timeout: Duration,
    /// How long a bulk packet read waits before giving up.
    pub bulk_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: framing::DEFAULT_POLL_TIMEOUT,
            bulk_timeout: framing::DEFAULT_BULK_TIMEOUT,
        }
    }
}

/// Device identification and storage usage, as reported by `info`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version: u16,
    pub analog_version: u16,
    pub pad_version: u16,
    pub mode: u8,
    pub used_memory: u32,
}

/// A single conversation with an M210 device over `T`. Holds no state of
/// its own between calls: every public method leaves the device ready,
/// on both the success and the handled-error path.
pub struct Session<'a, T: framing::Transport + ?Sized> {
    transport: &'a T,
    config: SessionConfig,
}

impl<'a, T: framing::Transport + ?Sized> Session<'a, T> {
    /// Build a session with the default poll/bulk timeouts.
    pub fn new(transport: &'a T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Build a session with explicit timeouts.
    pub fn with_config(transport: &'a T, config: SessionConfig) -> Self {
        Self { transport, config }
    }

    /// Ask the device to identify itself: firmware/analog/pad versions and
    /// current operating mode. Does not report `used_memory`; see [`Self::info`].
    pub fn get_info(&self) -> Result<(u16, u16, u16, u8)> {
        let frame = self.wait_for_info_frame()?;
        if frame[0] != 0x80 || frame[1] != 0xA9 || frame[2] != 0x28 || frame[9] != 0x0E {
            return Err(framing::bad_message(format!(
                "bad info signature: {frame:02x?}"
            )));
        }
        let firmware_version = u16::from_be_bytes([frame[3], frame[4]]);
        let analog_version = u16::from_be_bytes([frame[5], frame[6]]);
        let pad_version = u16::from_be_bytes([frame[7], frame[8]]);
        let mode = frame[10];
        debug!(
            "get_info: firmware={firmware_version} analog={analog_version} pad={pad_version} mode={mode}"
        );
        Ok((firmware_version, analog_version, pad_version, mode))
    }

    /// Poll interface 0 with `Info`, resending every `config.poll_timeout`
    /// until a response arrives. The device may take tens of milliseconds
    /// to reply.
    fn wait_for_info_frame(&self) -> Result<[u8; 11]> {
        loop {
            write_command(self.transport, &Command::Info.to_bytes())?;
            match read_frame::<T, 11>(self.transport, Interface::Control, self.config.poll_timeout) {
                Ok(frame) => return Ok(frame),
                Err(M210Error::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the device how many packets it has queued for download.
    ///
    /// A timeout here is not an error: it means the device has no notes,
    /// and `Ok(0)` is returned without sending any follow-up message.
    pub fn get_packet_count(&self) -> Result<u16> {
        write_command(self.transport, &Command::BeginDownload.to_bytes())?;
        let frame: [u8; 9] =
            match read_frame(self.transport, Interface::Control, self.config.poll_timeout) {
                Ok(frame) => frame,
                Err(M210Error::Timeout) => {
                    debug!("get_packet_count: timed out, treating as zero notes");
                    return Ok(0);
                }
                Err(e) => return Err(e),
            };

        let sig_ok = frame[0..5] == [0xAA; 5] && frame[7..9] == [0x55, 0x55];
        if !sig_ok {
            self.reject_best_effort();
            return Err(framing::bad_message(format!(
                "bad packet-count signature: {frame:02x?}"
            )));
        }

        let packet_count = u16::from_be_bytes([frame[5], frame[6]]);
        debug!("get_packet_count: {packet_count}");
        Ok(packet_count)
    }

    /// Compose `get_info` with `get_packet_count` to report full device
    /// status, including the derived `used_memory` field.
    pub fn info(&self) -> Result<DeviceInfo> {
        let (firmware_version, analog_version, pad_version, mode) = self.get_info()?;
        let packet_count = self.get_packet_count()?;
        self.reject_best_effort();
        Ok(DeviceInfo {
            firmware_version,
            analog_version,
            pad_version,
            mode,
            used_memory: packet_count as u32 * PACKET_PAYLOAD_SIZE as u32,
        })
    }

    /// Full download conversation: ask how many packets are queued, fetch
    /// them all in order, and return the packet count actually written to
    /// `sink`. An empty device (count 0) is rejected rather than accepted,
    /// since there is nothing to accept.
    pub fn download<W: IoWrite>(&self, sink: &mut W) -> Result<u16> {
        let packet_count = self.get_packet_count()?;
        if packet_count == 0 {
            self.reject_best_effort();
            return Ok(0);
        }
        self.download_all_packets(packet_count, sink)?;
        Ok(packet_count)
    }

    /// Download all `packet_count` packets, writing their payloads to
    /// `sink` in strict packet-number order regardless of how the wire
    /// actually delivered them. `packet_count` must be the value most
    /// recently returned by [`Self::get_packet_count`] and greater than 0.
    pub fn download_all_packets<W: IoWrite>(
        &self,
        packet_count: u16,
        sink: &mut W,
    ) -> Result<()> {
        match self.download_all_packets_inner(packet_count, sink) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reject_best_effort();
                Err(e)
            }
        }
    }

    fn download_all_packets_inner<W: IoWrite>(
        &self,
        packet_count: u16,
        sink: &mut W,
    ) -> Result<()> {
        let total_bytes = packet_count as usize * PACKET_PAYLOAD_SIZE;
        let mut buffer: Vec<u8> = Vec::new();
        buffer
            .try_reserve_exact(total_bytes)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
        buffer.resize(total_bytes, 0);

        write_command(self.transport, &Command::Accept.to_bytes())?;

        let mut lost: Vec<u16> = Vec::new();
        for i in 1..=packet_count {
            match self.read_packet(self.config.bulk_timeout) {
                Ok((num, payload)) => {
                    if num == i {
                        self.commit(&mut buffer, i, &payload);
                    } else {
                        lost.push(i);
                    }
                }
                Err(M210Error::Timeout) => {
                    warn!("timed out reading packet {i}, marking {i}..={packet_count} as lost");
                    for j in i..=packet_count {
                        lost.push(j);
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        while !lost.is_empty() {
            let target = lost[0];
            write_command(self.transport, &Command::Resend(target).to_bytes())?;
            match self.read_packet(self.config.bulk_timeout) {
                Ok((num, payload)) if num == target => {
                    self.commit(&mut buffer, target, &payload);
                    lost.swap_remove(0);
                }
                Ok(_) => {
                    // Wrong packet number: drop the reply and resend the same request.
                }
                Err(M210Error::Timeout) => {
                    // The device has promised this packet; keep asking.
                }
                Err(e) => return Err(e),
            }
        }

        write_command(self.transport, &Command::Accept.to_bytes())?;
        sink.write_all(&buffer)?;
        info!("download complete: {packet_count} packets, {total_bytes} bytes");
        Ok(())
    }

    fn commit(&self, buffer: &mut [u8], packet_number: u16, payload: &[u8; PACKET_PAYLOAD_SIZE]) {
        let start = (packet_number as usize - 1) * PACKET_PAYLOAD_SIZE;
        buffer[start..start + PACKET_PAYLOAD_SIZE].copy_from_slice(payload);
    }

    fn read_packet(&self, timeout: std::time::Duration) -> Result<(u16, [u8; PACKET_PAYLOAD_SIZE])> {
        let frame: [u8; 64] = read_frame(self.transport, Interface::Control, timeout)?;
        let num = u16::from_be_bytes([frame[0], frame[1]]);
        let mut payload = [0u8; PACKET_PAYLOAD_SIZE];
        payload.copy_from_slice(&frame[2..64]);
        Ok((num, payload))
    }

    /// Instruct the device to wipe its note storage. Firmware acknowledgement
    /// after `0xB0` is version-dependent (some reply with an info frame,
    /// others stay silent), so this polls `Info` to confirm the device is
    /// ready rather than assuming either behaviour.
    pub fn erase(&self) -> Result<()> {
        write_command(self.transport, &Command::Erase.to_bytes())?;
        self.wait_for_info_frame()?;
        Ok(())
    }

    fn reject_best_effort(&self) {
        let _ = write_command(self.transport, &Command::Reject.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::Transport;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Scripts a sequence of responses (and writes seen) for a fake device.
    struct FakeDevice {
        writes: RefCell<Vec<Vec<u8>>>,
        reads: RefCell<Vec<Result<Vec<u8>>>>,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self { writes: RefCell::new(Vec::new()), reads: RefCell::new(Vec::new()) }
        }

        fn push_ok(&self, bytes: Vec<u8>) {
            self.reads.borrow_mut().push(Ok(bytes));
        }

        fn push_timeout(&self) {
            self.reads.borrow_mut().push(Err(M210Error::Timeout));
        }
    }

    impl Transport for FakeDevice {
        fn write_frame(&self, frame: &[u8]) -> Result<()> {
            self.writes.borrow_mut().push(frame.to_vec());
            Ok(())
        }

        fn read_frame(&self, _interface: Interface, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let mut reads = self.reads.borrow_mut();
            if reads.is_empty() {
                return Err(M210Error::Timeout);
            }
            match reads.remove(0) {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        }
    }

    fn info_response(fw: u16, an: u16, pad: u16, mode: u8) -> Vec<u8> {
        let mut resp = vec![0x80, 0xA9, 0x28];
        resp.extend_from_slice(&fw.to_be_bytes());
        resp.extend_from_slice(&an.to_be_bytes());
        resp.extend_from_slice(&pad.to_be_bytes());
        resp.push(0x0E);
        resp.push(mode);
        resp
    }

    fn packet_count_response(count: u16) -> Vec<u8> {
        let mut resp = vec![0xAA; 5];
        resp.extend_from_slice(&count.to_be_bytes());
        resp.extend_from_slice(&[0x55, 0x55]);
        resp
    }

    fn packet(num: u16, fill: u8) -> Vec<u8> {
        let mut p = num.to_be_bytes().to_vec();
        p.extend(vec![fill; PACKET_PAYLOAD_SIZE]);
        p
    }

    #[test]
    fn with_config_overrides_default_timeouts() {
        let dev = FakeDevice::new();
        dev.push_ok(info_response(1, 2, 3, 4));
        let config = SessionConfig {
            poll_timeout: Duration::from_millis(1),
            bulk_timeout: Duration::from_millis(1),
        };
        let session = Session::with_config(&dev, config);
        assert_eq!(session.get_info().unwrap(), (1, 2, 3, 4));
    }

    #[test]
    fn get_info_parses_versions_and_mode() {
        let dev = FakeDevice::new();
        dev.push_ok(info_response(0x0102, 0x0304, 0x0506, 0x07));
        let session = Session::new(&dev);
        let (fw, an, pad, mode) = session.get_info().unwrap();
        assert_eq!((fw, an, pad, mode), (0x0102, 0x0304, 0x0506, 0x07));
    }

    #[test]
    fn get_info_bad_signature_is_bad_message() {
        let dev = FakeDevice::new();
        let mut bad = info_response(1, 2, 3, 4);
        bad[0] = 0x00;
        dev.push_ok(bad);
        let session = Session::new(&dev);
        assert!(matches!(session.get_info(), Err(M210Error::BadMessage(_))));
    }

    #[test]
    fn get_packet_count_parses_count() {
        let dev = FakeDevice::new();
        dev.push_ok(packet_count_response(42));
        let session = Session::new(&dev);
        assert_eq!(session.get_packet_count().unwrap(), 42);
    }

    #[test]
    fn get_packet_count_timeout_means_zero() {
        let dev = FakeDevice::new();
        dev.push_timeout();
        let session = Session::new(&dev);
        assert_eq!(session.get_packet_count().unwrap(), 0);
    }

    #[test]
    fn get_packet_count_bad_signature_rejects_then_errors() {
        let dev = FakeDevice::new();
        let mut bad = packet_count_response(1);
        bad[0] = 0x00;
        dev.push_ok(bad);
        let session = Session::new(&dev);
        let result = session.get_packet_count();
        assert!(matches!(result, Err(M210Error::BadMessage(_))));
        let writes = dev.writes.borrow();
        assert_eq!(writes.last().unwrap(), &vec![0x00, 0x02, 0x01, 0xB7]);
    }

    #[test]
    fn download_in_order_run() {
        let dev = FakeDevice::new();
        for i in 1..=5u16 {
            dev.push_ok(packet(i, i as u8));
        }
        let session = Session::new(&dev);
        let mut sink = Vec::new();
        session.download_all_packets(5, &mut sink).unwrap();
        assert_eq!(sink.len(), 5 * PACKET_PAYLOAD_SIZE);
        for i in 1..=5u16 {
            let start = (i as usize - 1) * PACKET_PAYLOAD_SIZE;
            assert!(sink[start..start + PACKET_PAYLOAD_SIZE].iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn download_single_drop_recovers_in_order() {
        let dev = FakeDevice::new();
        // Device delivers 1, 2, 4, 5 (skipping 3).
        dev.push_ok(packet(1, 1));
        dev.push_ok(packet(2, 2));
        dev.push_ok(packet(4, 4));
        dev.push_ok(packet(5, 5));
        // Recovery processes the lost-list by swap-removing the head on every
        // hit, so after healing 3 the head becomes the former tail (5), then 4.
        dev.push_ok(packet(3, 3));
        dev.push_ok(packet(5, 5));
        dev.push_ok(packet(4, 4));

        let session = Session::new(&dev);
        let mut sink = Vec::new();
        session.download_all_packets(5, &mut sink).unwrap();
        assert_eq!(sink.len(), 5 * PACKET_PAYLOAD_SIZE);
        for i in 1..=5u16 {
            let start = (i as usize - 1) * PACKET_PAYLOAD_SIZE;
            assert!(sink[start..start + PACKET_PAYLOAD_SIZE].iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn download_retries_resend_after_timeout() {
        let dev = FakeDevice::new();
        dev.push_ok(packet(1, 1));
        // Packet 2 never arrives in the initial batch read.
        dev.push_timeout();
        // First resend attempt times out, second succeeds.
        dev.push_timeout();
        dev.push_ok(packet(2, 2));

        let session = Session::new(&dev);
        let mut sink = Vec::new();
        session.download_all_packets(2, &mut sink).unwrap();
        assert_eq!(sink.len(), 2 * PACKET_PAYLOAD_SIZE);
        assert!(sink[PACKET_PAYLOAD_SIZE..].iter().all(|&b| b == 2));
    }

    #[test]
    fn download_on_empty_device_rejects_and_reports_zero() {
        let dev = FakeDevice::new();
        dev.push_timeout(); // BeginDownload gets no response: zero notes.
        let session = Session::new(&dev);
        let mut sink = Vec::new();
        let packet_count = session.download(&mut sink).unwrap();
        assert_eq!(packet_count, 0);
        assert!(sink.is_empty());
        let writes = dev.writes.borrow();
        assert_eq!(writes.last().unwrap(), &vec![0x00, 0x02, 0x01, 0xB7]);
    }

    #[test]
    fn erase_polls_info_to_confirm_ready() {
        let dev = FakeDevice::new();
        dev.push_ok(info_response(1, 1, 1, 0));
        let session = Session::new(&dev);
        session.erase().unwrap();
        let writes = dev.writes.borrow();
        assert_eq!(writes[0], vec![0x00, 0x02, 0x01, 0xB0]);
        assert_eq!(writes[1], vec![0x00, 0x02, 0x01, 0x95]);
    }
}
