//! Vendor control-transfer transport to the EZ-USB bootstrap loader.
//!
//! The first-stage loader is implemented in chip hardware; second-stage
//! loaders ("Vend_Ax", "a3load") add the external-memory and EEPROM
//! requests. All of them speak vendor-specific requests on control
//! endpoint 0. The loaders only need the [`ControlTransport`] seam,
//! which keeps them testable without hardware.

use std::time::Duration;

use rusb::{request_type, Direction, Recipient, RequestType, UsbContext};
use thiserror::Error;
use tracing::{debug, warn};

/// Write on-chip memory or CPUCS; implemented by the chip itself.
pub const RW_INTERNAL: u8 = 0xA0;
/// Write boot EEPROM (second-stage loader).
pub const RW_EEPROM: u8 = 0xA2;
/// Write boot EEPROM with 16-bit addressing for large parts.
pub const RW_EEPROM_LARGE: u8 = 0xA9;
/// Write external memory (second-stage loader).
pub const RW_MEMORY: u8 = 0xA3;
/// Query EEPROM address width.
pub const GET_EEPROM_SIZE: u8 = 0xA5;

/// Control messages are not NAKed, just dropped, so a generous timeout
/// distinguishes a wedged device from a slow one.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("control transfer timed out")]
    Timeout,

    #[error("short transfer: {wrote} of {expected} bytes")]
    Short { wrote: usize, expected: usize },

    #[error("usb error: {0}")]
    Usb(rusb::Error),
}

impl TransportError {
    /// Timeouts are the one failure class the RAM writer retries.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl From<rusb::Error> for TransportError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => TransportError::Timeout,
            e => TransportError::Usb(e),
        }
    }
}

/// Raw vendor request plumbing. `addr` travels in `wValue`, matching
/// what the bootstrap loaders expect; `wIndex` is always zero.
pub trait ControlTransport {
    fn control_write(
        &mut self,
        request: u8,
        addr: u16,
        data: &[u8],
    ) -> Result<usize, TransportError>;

    fn control_read(
        &mut self,
        request: u8,
        addr: u16,
        data: &mut [u8],
    ) -> Result<usize, TransportError>;
}

impl<C: UsbContext> ControlTransport for rusb::DeviceHandle<C> {
    fn control_write(
        &mut self,
        request: u8,
        addr: u16,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let rt = request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        Ok(self.write_control(rt, request, addr, 0, data, TRANSFER_TIMEOUT)?)
    }

    fn control_read(
        &mut self,
        request: u8,
        addr: u16,
        data: &mut [u8],
    ) -> Result<usize, TransportError> {
        let rt = request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        Ok(self.read_control(rt, request, addr, 0, data, TRANSFER_TIMEOUT)?)
    }
}

/// Issues a labeled vendor write and demands the full length got
/// through. Every failure is logged with its operation label and
/// address before propagating.
pub fn write<T>(
    dev: &mut T,
    label: &str,
    request: u8,
    addr: u16,
    data: &[u8],
) -> Result<(), TransportError>
where
    T: ControlTransport + ?Sized,
{
    debug!("{label}, addr 0x{addr:04x} len {len} (0x{len:04x})", len = data.len());
    match dev.control_write(request, addr, data) {
        Ok(n) if n == data.len() => Ok(()),
        Ok(n) => {
            warn!("{label} ==> {n}");
            Err(TransportError::Short {
                wrote: n,
                expected: data.len(),
            })
        }
        Err(e) => {
            warn!("{label}: {e}");
            Err(e)
        }
    }
}

/// Issues a labeled vendor read, demanding the buffer be filled.
pub fn read<T>(
    dev: &mut T,
    label: &str,
    request: u8,
    addr: u16,
    data: &mut [u8],
) -> Result<(), TransportError>
where
    T: ControlTransport + ?Sized,
{
    debug!("{label}, addr 0x{addr:04x} len {len} (0x{len:04x})", len = data.len());
    match dev.control_read(request, addr, data) {
        Ok(n) if n == data.len() => Ok(()),
        Ok(n) => {
            warn!("{label} ==> {n}");
            Err(TransportError::Short {
                wrote: n,
                expected: data.len(),
            })
        }
        Err(e) => {
            warn!("{label}: {e}");
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{ControlTransport, TransportError};

    /// One recorded vendor write: request code, target address, payload.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct WriteCall {
        pub request: u8,
        pub addr: u16,
        pub data: Vec<u8>,
    }

    /// Records every successful write and can inject failures:
    /// `timeouts` times out that many write attempts once `timeout_from`
    /// writes have been recorded, `fail_at` makes the Nth recorded
    /// write fail hard.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub writes: Vec<WriteCall>,
        pub write_attempts: usize,
        pub timeouts: usize,
        pub timeout_from: usize,
        pub fail_at: Option<usize>,
        pub read_byte: u8,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self {
                read_byte: 1,
                ..Self::default()
            }
        }

        pub(crate) fn requests(&self) -> Vec<u8> {
            self.writes.iter().map(|w| w.request).collect()
        }
    }

    impl ControlTransport for MockTransport {
        fn control_write(
            &mut self,
            request: u8,
            addr: u16,
            data: &[u8],
        ) -> Result<usize, TransportError> {
            self.write_attempts += 1;
            if self.timeouts > 0 && self.writes.len() >= self.timeout_from {
                self.timeouts -= 1;
                return Err(TransportError::Timeout);
            }
            if self.fail_at == Some(self.writes.len()) {
                return Err(TransportError::Usb(rusb::Error::Pipe));
            }
            self.writes.push(WriteCall {
                request,
                addr,
                data: data.to_vec(),
            });
            Ok(data.len())
        }

        fn control_read(
            &mut self,
            _request: u8,
            _addr: u16,
            data: &mut [u8],
        ) -> Result<usize, TransportError> {
            data.fill(self.read_byte);
            Ok(data.len())
        }
    }
}
