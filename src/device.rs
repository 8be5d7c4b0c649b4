//! `rusb`-backed implementation of [`crate::framing::Transport`]: finds a
//! Pegasus M210 on the USB bus, claims its two HID interfaces, and moves
//! bytes over their interrupt endpoints.

use std::time::Duration;

use log::debug;

use crate::error::{M210Error, Result};
use crate::framing::{Interface, Transport};

const DEFAULT_VENDOR_ID: u16 = 0x0E20;
const DEFAULT_PRODUCT_ID: u16 = 0x0101;

/// The USB vendor/product ID pair [`Device::find`] looks for. Overridable so
/// tests (or anyone pointing this at a compatible clone) can match against a
/// different device without touching the discovery code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { vendor_id: DEFAULT_VENDOR_ID, product_id: DEFAULT_PRODUCT_ID }
    }
}

/// Interrupt endpoint addresses for one claimed HID interface.
#[derive(Copy, Clone, Debug)]
struct InterfaceEndpoints {
    number: u8,
    in_addr: u8,
    out_addr: u8,
}

/// An opened M210 device: both HID interfaces claimed and ready for the
/// session layer to talk through.
pub struct Device {
    handle: rusb::DeviceHandle<rusb::Context>,
    control: InterfaceEndpoints,
    #[allow(dead_code)] // interface 1 carries realtime events, out of scope here
    event: InterfaceEndpoints,
}

impl Device {
    /// Find and open the first M210 device on the bus, matching the default
    /// vendor/product ID pair.
    pub fn find() -> Result<Self> {
        Self::find_with_config(DeviceConfig::default())
    }

    /// Find and open the first device on the bus matching `config`'s
    /// vendor/product ID pair.
    pub fn find_with_config(config: DeviceConfig) -> Result<Self> {
        let context = rusb::Context::new()?;
        for device in context.devices()?.iter() {
            let descriptor = device.device_descriptor()?;
            if descriptor.vendor_id() != config.vendor_id
                || descriptor.product_id() != config.product_id
            {
                continue;
            }
            debug!(
                "found M210 candidate at bus {} address {}",
                device.bus_number(),
                device.address()
            );
            let handle = device.open()?;
            return Self::from_handle(device, handle);
        }
        Err(M210Error::NoDevice)
    }

    fn from_handle(
        device: rusb::Device<rusb::Context>,
        mut handle: rusb::DeviceHandle<rusb::Context>,
    ) -> Result<Self> {
        let config = device.active_config_descriptor()?;
        let mut endpoints: Vec<InterfaceEndpoints> = Vec::new();

        for interface in config.interfaces() {
            let number = interface.number();
            if number > 1 {
                continue;
            }
            let descriptor = interface
                .descriptors()
                .next()
                .ok_or(M210Error::BadDevice)?;

            let mut in_addr = None;
            let mut out_addr = None;
            for endpoint in descriptor.endpoint_descriptors() {
                match endpoint.direction() {
                    rusb::Direction::In if in_addr.is_none() => in_addr = Some(endpoint.address()),
                    rusb::Direction::Out if out_addr.is_none() => {
                        out_addr = Some(endpoint.address())
                    }
                    _ => {}
                }
            }
            // HID devices commonly expose a single interrupt IN endpoint per
            // interface and accept writes on the same address.
            let in_addr = in_addr.ok_or(M210Error::BadDevice)?;
            let out_addr = out_addr.unwrap_or(in_addr);

            if handle.kernel_driver_active(number).unwrap_or(false) {
                handle.detach_kernel_driver(number)?;
            }
            handle.claim_interface(number)?;

            endpoints.push(InterfaceEndpoints { number, in_addr, out_addr });
        }

        if endpoints.len() != 2 {
            return Err(M210Error::BadDevice);
        }
        endpoints.sort_by_key(|e| e.number);

        Ok(Self { handle, control: endpoints[0], event: endpoints[1] })
    }
}

impl Transport for Device {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let timeout = Duration::from_millis(100);
        let written = self
            .handle
            .write_interrupt(self.control.out_addr, frame, timeout)?;
        if written != frame.len() {
            return Err(M210Error::Usb(rusb::Error::Io));
        }
        Ok(())
    }

    fn read_frame(&self, interface: Interface, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let endpoints = match interface {
            Interface::Control => &self.control,
            Interface::Event => &self.event,
        };
        match self.handle.read_interrupt(endpoints.in_addr, buf, timeout) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(M210Error::Timeout),
            Err(e) => Err(M210Error::Usb(e)),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.control.number);
        let _ = self.handle.release_interface(self.event.number);
    }
}
