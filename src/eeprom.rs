//! Writes a hex image into the bootstrap I2C EEPROM through a resident
//! second-stage loader, and sets the part up to boot from it.
//!
//! The boot format frames each firmware segment with a 4-byte header
//! and ends with a record that clears CPUCS, so the chip runs the image
//! once the boot loader finishes. The EEPROM is marked unbootable
//! before anything else is touched and only becomes bootable again with
//! the very last write; a failure anywhere in between leaves a part
//! that falls back to the hardware loader instead of booting garbage.

use std::io::{BufRead, Seek};

use thiserror::Error;
use tracing::{info, warn};

use crate::chips::ChipFamily;
use crate::ihex::{self, IhexError, ParseError, Segment, MAX_SEGMENT_LEN};
use crate::transport::{
    self, ControlTransport, TransportError, GET_EEPROM_SIZE, RW_EEPROM, RW_EEPROM_LARGE,
};

/// Assume an EEPROM size of 8k (24LC64) when erasing.
const ERASE_SIZE: u16 = 8192;
const ERASE_CHUNK: usize = 32;

/// Which vendor request the second-stage loader expects for EEPROM
/// access; large parts need the 16-bit-address variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromAddressing {
    Standard,
    Large,
}

impl EepromAddressing {
    pub fn request(self) -> u8 {
        match self {
            EepromAddressing::Standard => RW_EEPROM,
            EepromAddressing::Large => RW_EEPROM_LARGE,
        }
    }
}

/// Boot EEPROM content settings.
///
/// `vid`/`pid` override the family's default identity record; for
/// families without defaults the record is only written when both are
/// given.
#[derive(Debug, Clone, Copy)]
pub struct EepromOptions {
    /// Raw config byte; masked to the family's valid bits.
    pub config: u8,
    pub addressing: EepromAddressing,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl Default for EepromOptions {
    fn default() -> Self {
        Self {
            config: 0,
            addressing: EepromAddressing::Standard,
            vid: None,
            pid: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EepromError {
    #[error("hex image: {0}")]
    Hex(#[from] IhexError),

    #[error("EEPROM can't hold {len} bytes external memory at 0x{addr:04x}")]
    External { addr: u16, len: usize },

    #[error("not fragmenting {len} bytes (EEPROM segments max out at {MAX_SEGMENT_LEN})")]
    SegmentTooLong { len: usize },

    #[error("EEPROM reports address type {value}, need a 16-bit addressable part")]
    WrongEepromType { value: u8 },

    #[error("{family} EEPROM boot needs a firmware image, not just VID/PID")]
    ImageRequired { family: ChipFamily },

    #[error("{label} at 0x{addr:04x}: {source}")]
    Write {
        label: &'static str,
        addr: u16,
        #[source]
        source: TransportError,
    },
}

impl From<ParseError<EepromError>> for EepromError {
    fn from(e: ParseError<EepromError>) -> Self {
        match e {
            ParseError::Format(f) => EepromError::Hex(f),
            ParseError::Consumer(c) => c,
        }
    }
}

fn wrap(label: &'static str, addr: u16) -> impl FnOnce(TransportError) -> EepromError {
    move |source| EepromError::Write {
        label,
        addr,
        source,
    }
}

/// Serializes segments into the boot format at a monotonically
/// advancing free address.
struct EepromWriter {
    /// Next free EEPROM address; never revisited.
    ee_addr: u16,
    /// Set before the final record so its header carries the
    /// continuation-stop flag.
    last: bool,
    request: u8,
}

impl EepromWriter {
    fn poke<T>(&mut self, dev: &mut T, seg: Segment<'_>) -> Result<(), EepromError>
    where
        T: ControlTransport + ?Sized,
    {
        if seg.external {
            return Err(EepromError::External {
                addr: seg.addr,
                len: seg.data.len(),
            });
        }
        if seg.data.len() > MAX_SEGMENT_LEN {
            return Err(EepromError::SegmentTooLong {
                len: seg.data.len(),
            });
        }

        // No retries here; they haven't proven necessary for EEPROM
        // writes the way they have for RAM.

        let len = seg.data.len() as u16;
        let mut header = [
            (len >> 8) as u8,
            len as u8,
            (seg.addr >> 8) as u8,
            seg.addr as u8,
        ];
        if self.last {
            header[0] |= 0x80;
        }

        transport::write(
            dev,
            "write EEPROM segment header",
            self.request,
            self.ee_addr,
            &header,
        )
        .map_err(wrap("write EEPROM segment header", self.ee_addr))?;

        transport::write(
            dev,
            "write EEPROM segment",
            self.request,
            self.ee_addr + 4,
            seg.data,
        )
        .map_err(wrap("write EEPROM segment", self.ee_addr + 4))?;

        // The next segment must not overwrite this one.
        self.ee_addr += 4 + len;
        Ok(())
    }
}

/// Writes an Intel HEX image (and/or a VID/PID identity record) into
/// the boot EEPROM and marks it bootable.
///
/// The caller must have pre-loaded a second-stage loader that handles
/// the EEPROM vendor requests. Without an image, only the identity
/// record and config bytes are written (FX2/FX2LP "C0 boot"); the older
/// families require an image. Any write failure aborts immediately and
/// leaves the EEPROM unbootable.
pub fn load_eeprom<T, R>(
    dev: &mut T,
    image: Option<&mut R>,
    chip: ChipFamily,
    opts: &EepromOptions,
) -> Result<(), EepromError>
where
    T: ControlTransport + ?Sized,
    R: BufRead + Seek,
{
    let request = opts.addressing.request();

    if image.is_some() {
        let mut value = [0u8; 1];
        transport::read(dev, "get EEPROM size", GET_EEPROM_SIZE, 0, &mut value)
            .map_err(wrap("get EEPROM size", 0))?;
        match value[0] {
            1 => {}
            0 => warn!("EEPROM address width unknown, assuming a large enough part"),
            value => return Err(EepromError::WrongEepromType { value }),
        }
    }

    if image.is_none() && chip.requires_image() {
        return Err(EepromError::ImageRequired { family: chip });
    }

    let boot_type = chip.boot_type(image.is_some());
    let config = opts.config & chip.config_mask();
    match chip {
        ChipFamily::Fx2 | ChipFamily::Fx2lp => info!(
            "{chip}: config = 0x{config:02x}, {}connected, I2C = {} KHz",
            if config & 0x40 != 0 { "dis" } else { "" },
            if config & 0x01 != 0 { 400 } else { 100 },
        ),
        ChipFamily::Fx => info!(
            "fx: config = 0x{config:02x}, {} MHz{}, I2C = {} KHz",
            if config & 0x04 != 0 { 48 } else { 24 },
            if config & 0x02 != 0 { " inverted" } else { "" },
            if config & 0x01 != 0 { 400 } else { 100 },
        ),
        ChipFamily::An21 => info!("an21: no EEPROM config byte"),
    }

    info!("2nd stage: write boot EEPROM");

    // Make sure the EEPROM won't be used for booting while we rewrite
    // it, in case of problems along the way.
    transport::write(dev, "mark EEPROM as unbootable", request, 0, &[0x00])
        .map_err(wrap("mark EEPROM as unbootable", 0))?;

    let (default_vid, default_pid) = match chip.default_ids() {
        Some((v, p)) => (Some(v), Some(p)),
        None => (None, None),
    };
    let vid = opts.vid.or(default_vid);
    let pid = opts.pid.or(default_pid);
    if let (Some(vid), Some(pid)) = (vid, pid) {
        // VID LE, PID LE, then the silicon revision bytes (first
        // silicon = 001).
        let ids = [
            vid as u8,
            (vid >> 8) as u8,
            pid as u8,
            (pid >> 8) as u8,
            0x05,
            0xA0,
        ];
        info!("writing vid=0x{vid:04x}, pid=0x{pid:04x}");
        transport::write(dev, "load VID/PID", request, 1, &ids)
            .map_err(wrap("load VID/PID", 1))?;
    }

    if let Some(image) = image {
        let classify = |addr: u16, len: usize| chip.is_external(addr, len);
        let mut writer = EepromWriter {
            ee_addr: chip.eeprom_base(),
            last: false,
            request,
        };
        ihex::parse(image, Some(&classify), |seg| writer.poke(&mut *dev, seg))?;

        // Append the reset record: a final one-byte segment clearing
        // CPUCS so the chip runs the firmware after boot load.
        writer.last = true;
        writer.poke(
            dev,
            Segment {
                addr: chip.cpucs_addr(),
                external: false,
                data: &[0x00],
            },
        )?;
    }

    if chip.writes_config_byte() {
        transport::write(dev, "write config byte", request, 7, &[config])
            .map_err(wrap("write config byte", 7))?;
    }

    // EZ-USB FX has a reserved byte.
    if chip == ChipFamily::Fx {
        transport::write(dev, "write reserved byte", request, 8, &[0x00])
            .map_err(wrap("write reserved byte", 8))?;
    }

    // The write that makes the EEPROM bootable. Everything before this
    // point ran first so a failed download can't be booted.
    transport::write(dev, "write EEPROM type byte", request, 0, &[boot_type])
        .map_err(wrap("write EEPROM type byte", 0))?;

    Ok(())
}

/// Bulk-overwrites the boot EEPROM with 0xFF, in 32-byte chunks,
/// through the second-stage loader. Aborts on the first write failure.
pub fn erase_eeprom<T>(dev: &mut T, addressing: EepromAddressing) -> Result<(), EepromError>
where
    T: ControlTransport + ?Sized,
{
    let request = addressing.request();
    let fill = [0xFFu8; ERASE_CHUNK];

    info!("overwrite {ERASE_SIZE} byte EEPROM with 0xff");
    for addr in (0..ERASE_SIZE).step_by(ERASE_CHUNK) {
        transport::write(dev, "overwrite EEPROM with 0xff", request, addr, &fill)
            .map_err(wrap("overwrite EEPROM with 0xff", addr))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use crate::ihex::testutil::{eof, record};
    use crate::transport::mock::MockTransport;

    fn image(records: &[String]) -> Cursor<String> {
        let mut s = String::new();
        for r in records {
            s.push_str(r);
            s.push('\n');
        }
        s.push_str(&eof());
        s.push('\n');
        Cursor::new(s)
    }

    fn opts(config: u8) -> EepromOptions {
        EepromOptions {
            config,
            ..EepromOptions::default()
        }
    }

    #[test]
    fn fx2_image_produces_the_full_boot_layout() {
        let mut dev = MockTransport::new();
        let mut img = image(&[record(0x0100, 0, &[0xDE, 0xAD, 0xBE, 0xEF])]);

        load_eeprom(&mut dev, Some(&mut img), ChipFamily::Fx2, &opts(0x08)).unwrap();

        assert!(dev.writes.iter().all(|w| w.request == RW_EEPROM));

        // Unbootable marker first.
        assert_eq!(dev.writes[0].addr, 0);
        assert_eq!(dev.writes[0].data, vec![0x00]);
        // Default FX2 identity record at offset 1.
        assert_eq!(dev.writes[1].addr, 1);
        assert_eq!(dev.writes[1].data, vec![0xB4, 0x04, 0x73, 0x64, 0x05, 0xA0]);
        // Segment header at the FX2 base, then data right after it.
        assert_eq!(dev.writes[2].addr, 8);
        assert_eq!(dev.writes[2].data, vec![0x00, 0x04, 0x01, 0x00]);
        assert_eq!(dev.writes[3].addr, 12);
        assert_eq!(dev.writes[3].data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        // Reset record, flagged as last, pointing at CPUCS.
        assert_eq!(dev.writes[4].addr, 16);
        assert_eq!(dev.writes[4].data, vec![0x80, 0x01, 0xE6, 0x00]);
        assert_eq!(dev.writes[5].addr, 20);
        assert_eq!(dev.writes[5].data, vec![0x00]);
        // Config byte, then the type byte that makes it bootable.
        assert_eq!(dev.writes[6].addr, 7);
        assert_eq!(dev.writes[6].data, vec![0x08]);
        assert_eq!(dev.writes[7].addr, 0);
        assert_eq!(dev.writes[7].data, vec![0xC2]);
        assert_eq!(dev.writes.len(), 8);
    }

    #[test]
    fn free_address_advances_by_header_plus_length() {
        let mut dev = MockTransport::new();
        let mut writer = EepromWriter {
            ee_addr: 8,
            last: false,
            request: RW_EEPROM,
        };

        let big = [0u8; MAX_SEGMENT_LEN];
        let seg = |data: &'static [u8]| Segment {
            addr: 0x0000,
            external: false,
            data,
        };

        writer.poke(&mut dev, seg(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])).unwrap();
        assert_eq!(writer.ee_addr, 8 + 4 + 10);

        writer
            .poke(
                &mut dev,
                Segment {
                    addr: 0x0000,
                    external: false,
                    data: &big,
                },
            )
            .unwrap();
        writer.last = true;
        writer.poke(&mut dev, seg(&[])).unwrap();

        assert_eq!(writer.ee_addr, 8 + (4 + 10) + (4 + 1023) + 4);
        assert_eq!(writer.ee_addr, 1053);
    }

    #[test]
    fn oversized_segments_are_rejected() {
        let mut dev = MockTransport::new();
        let mut writer = EepromWriter {
            ee_addr: 8,
            last: false,
            request: RW_EEPROM,
        };
        let big = [0u8; MAX_SEGMENT_LEN + 1];

        let err = writer
            .poke(
                &mut dev,
                Segment {
                    addr: 0,
                    external: false,
                    data: &big,
                },
            )
            .unwrap_err();

        assert!(matches!(err, EepromError::SegmentTooLong { len: 1024 }));
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn external_segments_are_rejected() {
        let mut dev = MockTransport::new();
        let mut writer = EepromWriter {
            ee_addr: 8,
            last: false,
            request: RW_EEPROM,
        };

        let err = writer
            .poke(
                &mut dev,
                Segment {
                    addr: 0x3000,
                    external: true,
                    data: &[1, 2, 3],
                },
            )
            .unwrap_err();

        assert!(matches!(
            err,
            EepromError::External {
                addr: 0x3000,
                len: 3
            }
        ));
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn unknown_eeprom_width_is_tolerated() {
        let mut dev = MockTransport::new();
        dev.read_byte = 0;
        let mut img = image(&[record(0x0000, 0, &[1])]);

        load_eeprom(&mut dev, Some(&mut img), ChipFamily::Fx2, &opts(0)).unwrap();
    }

    #[test]
    fn wrong_eeprom_width_fails_before_any_write() {
        let mut dev = MockTransport::new();
        dev.read_byte = 2;
        let mut img = image(&[record(0x0000, 0, &[1])]);

        let err =
            load_eeprom(&mut dev, Some(&mut img), ChipFamily::Fx2, &opts(0)).unwrap_err();

        assert!(matches!(err, EepromError::WrongEepromType { value: 2 }));
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn vid_pid_only_boot_is_fx2_specific() {
        let mut dev = MockTransport::new();

        load_eeprom::<_, Cursor<String>>(&mut dev, None, ChipFamily::Fx2lp, &opts(0x08))
            .unwrap();

        // Unbootable, identity record, config byte, C0 type byte.
        let addrs: Vec<u16> = dev.writes.iter().map(|w| w.addr).collect();
        assert_eq!(addrs, vec![0, 1, 7, 0]);
        assert_eq!(dev.writes[1].data, vec![0xB4, 0x04, 0x13, 0x86, 0x05, 0xA0]);
        assert_eq!(dev.writes[3].data, vec![0xC0]);
    }

    #[test]
    fn older_families_require_an_image() {
        let mut dev = MockTransport::new();

        let err =
            load_eeprom::<_, Cursor<String>>(&mut dev, None, ChipFamily::Fx, &opts(0))
                .unwrap_err();

        assert!(matches!(
            err,
            EepromError::ImageRequired {
                family: ChipFamily::Fx
            }
        ));
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn fx_layout_has_reserved_byte_and_base_9() {
        let mut dev = MockTransport::new();
        let mut img = image(&[record(0x0000, 0, &[0x11, 0x22])]);

        load_eeprom(&mut dev, Some(&mut img), ChipFamily::Fx, &opts(0xFF)).unwrap();

        // No identity record for FX: segments start right after the
        // unbootable marker.
        assert_eq!(dev.writes[0].addr, 0);
        assert_eq!(dev.writes[1].addr, 9);
        assert_eq!(dev.writes[1].data, vec![0x00, 0x02, 0x00, 0x00]);
        assert_eq!(dev.writes[2].addr, 13);
        // Reset record targets the FX CPUCS.
        assert_eq!(dev.writes[3].data, vec![0x80, 0x01, 0x7F, 0x92]);
        // Config byte is masked to the FX bits.
        assert_eq!(dev.writes[5].addr, 7);
        assert_eq!(dev.writes[5].data, vec![0x07]);
        // Reserved byte, then the boot type.
        assert_eq!(dev.writes[6].addr, 8);
        assert_eq!(dev.writes[6].data, vec![0x00]);
        assert_eq!(dev.writes[7].addr, 0);
        assert_eq!(dev.writes[7].data, vec![0xB6]);
    }

    #[test]
    fn explicit_vid_pid_overrides_family_default() {
        let mut dev = MockTransport::new();
        let options = EepromOptions {
            config: 0x08,
            vid: Some(0x1234),
            pid: Some(0xABCD),
            ..EepromOptions::default()
        };

        load_eeprom::<_, Cursor<String>>(&mut dev, None, ChipFamily::Fx2, &options).unwrap();

        assert_eq!(dev.writes[1].addr, 1);
        assert_eq!(dev.writes[1].data, vec![0x34, 0x12, 0xCD, 0xAB, 0x05, 0xA0]);
    }

    #[test]
    fn large_addressing_switches_the_request_code() {
        let mut dev = MockTransport::new();
        let mut img = image(&[record(0x0000, 0, &[1])]);
        let options = EepromOptions {
            addressing: EepromAddressing::Large,
            ..EepromOptions::default()
        };

        load_eeprom(&mut dev, Some(&mut img), ChipFamily::Fx2, &options).unwrap();

        assert!(dev.writes.iter().all(|w| w.request == RW_EEPROM_LARGE));
    }

    #[test]
    fn an21_writes_no_config_byte() {
        let mut dev = MockTransport::new();
        let mut img = image(&[record(0x0000, 0, &[1, 2])]);

        load_eeprom(&mut dev, Some(&mut img), ChipFamily::An21, &opts(0xFF)).unwrap();

        // Segments start at base 7; the only single-byte write at
        // offset 7 would have been a config byte, and there is none.
        assert_eq!(dev.writes[1].addr, 7);
        assert_eq!(dev.writes[1].data.len(), 4);
        assert!(!dev
            .writes
            .iter()
            .any(|w| w.addr == 7 && w.data.len() == 1));
        let last = dev.writes.last().unwrap();
        assert_eq!(last.addr, 0);
        assert_eq!(last.data, vec![0xB2]);
    }

    #[test]
    fn erase_covers_the_part_in_32_byte_chunks() {
        let mut dev = MockTransport::new();

        erase_eeprom(&mut dev, EepromAddressing::Standard).unwrap();

        assert_eq!(dev.writes.len(), 256);
        assert!(dev.writes.iter().all(|w| w.request == RW_EEPROM));
        assert!(dev.writes.iter().all(|w| w.data == vec![0xFF; 32]));
        assert_eq!(dev.writes[0].addr, 0);
        assert_eq!(dev.writes[1].addr, 32);
        assert_eq!(dev.writes[255].addr, 8160);
    }

    #[test]
    fn erase_uses_the_large_request_when_asked() {
        let mut dev = MockTransport::new();
        erase_eeprom(&mut dev, EepromAddressing::Large).unwrap();
        assert!(dev.writes.iter().all(|w| w.request == RW_EEPROM_LARGE));
    }

    #[test]
    fn erase_aborts_on_first_failure() {
        let mut dev = MockTransport::new();
        dev.fail_at = Some(10);

        let err = erase_eeprom(&mut dev, EepromAddressing::Standard).unwrap_err();

        assert!(matches!(err, EepromError::Write { .. }));
        assert_eq!(dev.writes.len(), 10);
    }
}
