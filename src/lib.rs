//! Firmware downloader for Cypress EZ-USB microcontrollers.
//!
//! These chips (originally by AnchorChips) are 8051-based parts whose
//! bootstrap loader lives in hardware: vendor requests on control
//! endpoint 0 write on-chip SRAM and the CPUCS register, which is how
//! the processor is reset after a download. Writing off-chip memory or
//! the bootstrap I2C EEPROM needs a second-stage loader downloaded
//! first.
//!
//! [`ram::load_ram`] and [`eeprom::load_eeprom`] are the two download
//! entry points; both parse Intel HEX with [`ihex::parse`] and talk to
//! the device through the [`transport::ControlTransport`] seam.

pub mod chips;
pub mod eeprom;
pub mod ihex;
pub mod ram;
pub mod transport;
