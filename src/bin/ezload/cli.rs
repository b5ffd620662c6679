use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ezload::chips::ChipFamily;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ChipTypeArg {
    An21,
    Fx,
    Fx2,
    Fx2lp,
}

impl ChipTypeArg {
    pub fn family(self) -> ChipFamily {
        match self {
            ChipTypeArg::An21 => ChipFamily::An21,
            ChipTypeArg::Fx => ChipFamily::Fx,
            ChipTypeArg::Fx2 => ChipFamily::Fx2,
            ChipTypeArg::Fx2lp => ChipFamily::Fx2lp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

pub fn parse_usb_id(s: &str) -> Result<UsbId, String> {
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| format!("expected vid:pid in hex, got {s:?}"))?;
    let vid = u16::from_str_radix(vid, 16).map_err(|_| format!("invalid vid {vid:?}"))?;
    let pid = u16::from_str_radix(pid, 16).map_err(|_| format!("invalid pid {pid:?}"))?;
    Ok(UsbId { vid, pid })
}

pub fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid byte value {s:?}"))
}

#[derive(Parser)]
#[command(name = "ezload")]
#[command(about = "Cypress EZ-USB (AN21xx/FX/FX2/FX2LP) firmware loader")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download an Intel HEX image into target RAM and run it.
    Load(LoadArgs),

    /// Write firmware and/or a VID:PID record into the boot EEPROM.
    Eeprom(EepromArgs),

    /// Overwrite the boot EEPROM with 0xFF.
    Erase(EraseArgs),
}

#[derive(Args, Clone)]
pub struct DeviceArgs {
    /// Target device as vid:pid in hex (e.g. 04b4:8613).
    #[arg(long, short = 'd', value_parser = parse_usb_id)]
    pub device: UsbId,

    /// Microcontroller type.
    #[arg(long = "type", short = 't', value_enum, default_value_t = ChipTypeArg::Fx)]
    pub chip: ChipTypeArg,
}

#[derive(Args)]
pub struct LoadArgs {
    /// Path to Intel HEX firmware.
    pub hex: PathBuf,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Second-stage loader image; when given, the loader is downloaded
    /// first and the firmware is written in two stages (external memory
    /// while the CPU runs, then on-chip memory).
    #[arg(long, short = 's')]
    pub loader: Option<PathBuf>,

    /// More logs to stderr (repeat for more detail).
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Args)]
pub struct EepromArgs {
    /// Path to Intel HEX firmware. May be omitted on FX2/FX2LP to
    /// write a VID:PID-only EEPROM.
    pub hex: Option<PathBuf>,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Second-stage loader that handles the EEPROM write requests.
    #[arg(long, short = 's')]
    pub loader: PathBuf,

    /// EEPROM config byte (defaults: FX2/FX2LP 0x08, FX 0x00,
    /// AN21xx none).
    #[arg(long, short = 'c', value_parser = parse_byte)]
    pub config: Option<u8>,

    /// VID:PID to write into the EEPROM identity record, overriding
    /// the family default.
    #[arg(long, value_parser = parse_usb_id)]
    pub vid_pid: Option<UsbId>,

    /// EEPROM needs 16-bit addressing requests (large parts).
    #[arg(long, short = 'e')]
    pub large_eeprom: bool,

    /// More logs to stderr (repeat for more detail).
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Args)]
pub struct EraseArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Second-stage loader that handles the EEPROM write requests.
    #[arg(long, short = 's')]
    pub loader: PathBuf,

    /// EEPROM needs 16-bit addressing requests (large parts).
    #[arg(long, short = 'e')]
    pub large_eeprom: bool,

    /// More logs to stderr (repeat for more detail).
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
