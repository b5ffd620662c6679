pub mod eeprom;
pub mod erase;
pub mod load;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rusb::{DeviceHandle, GlobalContext};
use tracing::error;

use ezload::eeprom::EepromError;
use ezload::ram::RamError;

use crate::cli::UsbId;
use crate::exit_codes::{EXIT_INVALID_HEX, EXIT_NO_DEVICE, EXIT_PROTOCOL, EXIT_WRITE_FAILED};

fn open_device(id: UsbId) -> Result<DeviceHandle<GlobalContext>, i32> {
    match rusb::open_device_with_vid_pid(id.vid, id.pid) {
        Some(handle) => Ok(handle),
        None => {
            error!(
                "no device {:04x}:{:04x} (not connected, or no permission to open it)",
                id.vid, id.pid
            );
            Err(EXIT_NO_DEVICE)
        }
    }
}

fn open_image(path: &Path) -> Result<BufReader<File>, i32> {
    match File::open(path) {
        Ok(f) => Ok(BufReader::new(f)),
        Err(e) => {
            error!("can't open {}: {e}", path.display());
            Err(EXIT_INVALID_HEX)
        }
    }
}

fn ram_exit_code(e: RamError) -> i32 {
    error!("{e}");
    match e {
        RamError::Hex(_) | RamError::ExternalNotLoadable { .. } => EXIT_INVALID_HEX,
        RamError::Write { .. } | RamError::Cpucs(_) => EXIT_WRITE_FAILED,
    }
}

fn eeprom_exit_code(e: EepromError) -> i32 {
    error!("{e}");
    match e {
        EepromError::Hex(_)
        | EepromError::External { .. }
        | EepromError::SegmentTooLong { .. } => EXIT_INVALID_HEX,
        EepromError::WrongEepromType { .. } | EepromError::ImageRequired { .. } => EXIT_PROTOCOL,
        EepromError::Write { .. } => EXIT_WRITE_FAILED,
    }
}
