//! Chip family profiles for the EZ-USB line.
//!
//! The AN21xx/FX/FX2/FX2LP parts share an 8051 core but differ in the
//! CPUCS register address, which address ranges are on-chip RAM, and
//! how their boot EEPROMs are laid out. Everything family-specific the
//! loaders need is collected here.

use std::fmt;

/// EZ-USB microcontroller family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    /// Original AnchorChips AN21xx parts.
    An21,
    /// Cypress EZ-USB FX.
    Fx,
    /// Cypress EZ-USB FX2 (USB 2.0).
    Fx2,
    /// Cypress EZ-USB FX2LP (updated FX2).
    Fx2lp,
}

impl ChipFamily {
    /// Address of the CPUCS register; writing it stops or releases the CPU.
    pub fn cpucs_addr(self) -> u16 {
        match self {
            ChipFamily::An21 | ChipFamily::Fx => 0x7F92,
            ChipFamily::Fx2 | ChipFamily::Fx2lp => 0xE600,
        }
    }

    /// Returns true iff `[addr, addr + len)` includes external memory,
    /// i.e. memory the built-in first-stage loader cannot write.
    ///
    /// A range straddling an internal/external boundary is reported as
    /// external from its start and length alone; callers must not read
    /// "not external" as a guarantee of physical contiguity.
    pub fn is_external(self, addr: u16, len: usize) -> bool {
        let addr = addr as usize;
        match self {
            // With 8KB RAM, 0x0000-0x1b3f can be written. There may be
            // more writable RAM above (unused bulk buffers at
            // 0x1b40-0x1f3f, ISODISAB window 0x2000-0x27ff) but we
            // can't tell from here, so stay conservative.
            ChipFamily::An21 | ChipFamily::Fx => {
                if addr <= 0x1B3F {
                    addr + len > 0x1B40
                } else {
                    true
                }
            }

            // 1st 8KB for data/code, plus 512 bytes of data at 0xe000.
            ChipFamily::Fx2 => {
                if addr <= 0x1FFF {
                    addr + len > 0x2000
                } else if (0xE000..=0xE1FF).contains(&addr) {
                    addr + len > 0xE200
                } else {
                    true
                }
            }

            // 1st 16KB for data/code, plus 512 bytes of data at 0xe000.
            ChipFamily::Fx2lp => {
                if addr <= 0x3FFF {
                    addr + len > 0x4000
                } else if (0xE000..=0xE1FF).contains(&addr) {
                    addr + len > 0xE200
                } else {
                    true
                }
            }
        }
    }

    /// First EEPROM address available for firmware segments. The bytes
    /// below it hold the boot type, VID/PID record and config byte.
    pub fn eeprom_base(self) -> u16 {
        match self {
            ChipFamily::An21 => 7,
            ChipFamily::Fx2 | ChipFamily::Fx2lp => 8,
            ChipFamily::Fx => 9,
        }
    }

    /// Valid bits of the EEPROM config byte. AN21xx has no config byte.
    pub fn config_mask(self) -> u8 {
        match self {
            ChipFamily::An21 => 0x00,
            ChipFamily::Fx => 0x07,
            ChipFamily::Fx2 | ChipFamily::Fx2lp => 0x4F,
        }
    }

    /// Whether a config byte is written at EEPROM offset 7 at all.
    pub fn writes_config_byte(self) -> bool {
        self != ChipFamily::An21
    }

    /// EEPROM boot-type byte. FX2/FX2LP can boot with just VID/PID
    /// content (0xC0); the older parts only support firmware boot.
    pub fn boot_type(self, with_image: bool) -> u8 {
        match self {
            ChipFamily::An21 => 0xB2,
            ChipFamily::Fx => 0xB6,
            ChipFamily::Fx2 | ChipFamily::Fx2lp => {
                if with_image {
                    0xC2
                } else {
                    0xC0
                }
            }
        }
    }

    /// Whether EEPROM boot requires a firmware image for this family.
    pub fn requires_image(self) -> bool {
        matches!(self, ChipFamily::An21 | ChipFamily::Fx)
    }

    /// Default VID/PID written into the EEPROM identity record, where
    /// the family has well-known unconfigured IDs.
    pub fn default_ids(self) -> Option<(u16, u16)> {
        match self {
            ChipFamily::Fx2 => Some((0x04B4, 0x6473)),
            ChipFamily::Fx2lp => Some((0x04B4, 0x8613)),
            ChipFamily::An21 | ChipFamily::Fx => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChipFamily::An21 => "an21",
            ChipFamily::Fx => "fx",
            ChipFamily::Fx2 => "fx2",
            ChipFamily::Fx2lp => "fx2lp",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fx_internal_region_ends_at_0x1b40() {
        assert!(!ChipFamily::Fx.is_external(0x0000, 0x1B40));
        assert!(ChipFamily::Fx.is_external(0x0000, 0x1B41));
        assert!(!ChipFamily::Fx.is_external(0x1B3F, 1));
        assert!(ChipFamily::Fx.is_external(0x1B3F, 2));
        assert!(ChipFamily::Fx.is_external(0x1B40, 1));
        // ISODISAB window is deliberately not modeled.
        assert!(ChipFamily::Fx.is_external(0x2000, 16));
    }

    #[test]
    fn an21_shares_the_fx_map() {
        assert!(!ChipFamily::An21.is_external(0x0100, 16));
        assert!(ChipFamily::An21.is_external(0x1B40, 1));
        assert_eq!(ChipFamily::An21.cpucs_addr(), 0x7F92);
    }

    #[test]
    fn fx2_has_two_internal_regions() {
        assert!(!ChipFamily::Fx2.is_external(0x0000, 0x2000));
        assert!(ChipFamily::Fx2.is_external(0x1FF0, 0x11));
        assert!(!ChipFamily::Fx2.is_external(0xE000, 0x200));
        assert!(ChipFamily::Fx2.is_external(0xE1FF, 2));
        assert!(ChipFamily::Fx2.is_external(0x3000, 16));
        assert!(ChipFamily::Fx2.is_external(0x8000, 1));
    }

    #[test]
    fn fx2lp_extends_code_ram_to_16k() {
        assert!(!ChipFamily::Fx2lp.is_external(0x3000, 16));
        assert!(!ChipFamily::Fx2lp.is_external(0x0000, 0x4000));
        assert!(ChipFamily::Fx2lp.is_external(0x3FFF, 2));
        assert!(!ChipFamily::Fx2lp.is_external(0xE100, 0x100));
        assert!(ChipFamily::Fx2lp.is_external(0x4000, 1));
    }

    #[test]
    fn straddling_ranges_classify_as_external() {
        // 0x1f00..0x2100 spans both on-chip and external memory on FX2;
        // the single boolean calls the whole range external.
        assert!(ChipFamily::Fx2.is_external(0x1F00, 0x200));
    }

    #[test]
    fn eeprom_profile_constants() {
        assert_eq!(ChipFamily::An21.eeprom_base(), 7);
        assert_eq!(ChipFamily::Fx2.eeprom_base(), 8);
        assert_eq!(ChipFamily::Fx2lp.eeprom_base(), 8);
        assert_eq!(ChipFamily::Fx.eeprom_base(), 9);

        assert_eq!(ChipFamily::Fx.config_mask(), 0x07);
        assert_eq!(ChipFamily::Fx2.config_mask(), 0x4F);
        assert!(!ChipFamily::An21.writes_config_byte());

        assert_eq!(ChipFamily::Fx2.boot_type(true), 0xC2);
        assert_eq!(ChipFamily::Fx2.boot_type(false), 0xC0);
        assert_eq!(ChipFamily::Fx.boot_type(true), 0xB6);
        assert_eq!(ChipFamily::An21.boot_type(true), 0xB2);

        assert_eq!(ChipFamily::Fx2lp.default_ids(), Some((0x04B4, 0x8613)));
        assert_eq!(ChipFamily::Fx.default_ids(), None);
    }
}
