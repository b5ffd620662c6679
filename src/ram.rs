//! Downloads a hex image into target RAM through the first (hardware)
//! or second (software) stage loader, using the 0xA0 and 0xA3 vendor
//! requests.
//!
//! A single-stage load stops the CPU, writes everything on-chip and
//! releases the CPU again. A two-stage load assumes a second-stage
//! loader is already resident and running: external memory is written
//! first while the CPU runs, then the CPU is stopped and the image is
//! re-parsed to write on-chip memory (including the reset vector at
//! 0x0000) over the first pass's loader.

use std::io::{BufRead, Seek};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chips::ChipFamily;
use crate::ihex::{self, IhexError, ParseError, Segment};
use crate::transport::{self, ControlTransport, TransportError, RW_INTERNAL, RW_MEMORY};

/// Extra attempts after a timed-out segment write. Control messages
/// are not NAKed (just dropped), so a timeout is worth retrying where
/// any other failure is not.
const RETRY_LIMIT: u32 = 5;

/// Per-segment write policy for one parser pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamMode {
    /// Hardware first-stage loader; CPU stopped, external data is an
    /// error because nothing can write it yet.
    InternalOnly,
    /// First phase with a second-stage loader; CPU running, on-chip
    /// segments are skipped.
    SkipInternal,
    /// Second phase with a second-stage loader; CPU stopped, external
    /// segments were already written.
    SkipExternal,
}

/// Whether the image goes through the hardware loader alone or a
/// resident second-stage loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Single,
    TwoStage,
}

/// Running totals for a RAM download, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RamStats {
    pub bytes: usize,
    pub segments: usize,
}

#[derive(Error, Debug)]
pub enum RamError {
    #[error("hex image: {0}")]
    Hex(#[from] IhexError),

    #[error("can't write {len} bytes external memory at 0x{addr:04x} without a second stage loader")]
    ExternalNotLoadable { addr: u16, len: usize },

    #[error("{label} at 0x{addr:04x}: {source}")]
    Write {
        label: &'static str,
        addr: u16,
        #[source]
        source: TransportError,
    },

    #[error("can't modify CPUCS: {0}")]
    Cpucs(#[source] TransportError),
}

impl From<ParseError<RamError>> for RamError {
    fn from(e: ParseError<RamError>) -> Self {
        match e {
            ParseError::Format(f) => RamError::Hex(f),
            ParseError::Consumer(c) => c,
        }
    }
}

/// Segment consumer state shared across the one or two parser passes.
struct RamWriter {
    mode: RamMode,
    stats: RamStats,
}

impl RamWriter {
    fn new(mode: RamMode) -> Self {
        Self {
            mode,
            stats: RamStats::default(),
        }
    }

    fn poke<T>(&mut self, dev: &mut T, seg: Segment<'_>) -> Result<(), RamError>
    where
        T: ControlTransport + ?Sized,
    {
        match self.mode {
            RamMode::InternalOnly => {
                if seg.external {
                    return Err(RamError::ExternalNotLoadable {
                        addr: seg.addr,
                        len: seg.data.len(),
                    });
                }
            }
            RamMode::SkipInternal => {
                if !seg.external {
                    debug!(
                        "SKIP on-chip RAM, {} bytes at 0x{:04x}",
                        seg.data.len(),
                        seg.addr
                    );
                    return Ok(());
                }
            }
            RamMode::SkipExternal => {
                if seg.external {
                    debug!(
                        "SKIP external RAM, {} bytes at 0x{:04x}",
                        seg.data.len(),
                        seg.addr
                    );
                    return Ok(());
                }
            }
        }

        let (label, request) = if seg.external {
            ("write external", RW_MEMORY)
        } else {
            ("write on-chip", RW_INTERNAL)
        };

        let mut retry: u32 = 0;
        loop {
            match transport::write(dev, label, request, seg.addr, seg.data) {
                Ok(()) => break,
                Err(e) if e.is_timeout() && retry < RETRY_LIMIT => {
                    retry += 1;
                    warn!("{label} at 0x{:04x} timed out, retry {retry}", seg.addr);
                }
                Err(e) => {
                    return Err(RamError::Write {
                        label,
                        addr: seg.addr,
                        source: e,
                    });
                }
            }
        }

        self.stats.bytes += seg.data.len();
        self.stats.segments += 1;
        Ok(())
    }
}

/// Stops (`run = false`) or releases (`run = true`) the CPU by writing
/// the CPUCS register through the first-stage loader.
fn cpucs<T>(dev: &mut T, addr: u16, run: bool) -> Result<(), RamError>
where
    T: ControlTransport + ?Sized,
{
    let data = [if run { 0u8 } else { 1u8 }];
    debug!("{}", if run { "reset CPU" } else { "stop CPU" });
    transport::write(dev, "modify CPUCS", RW_INTERNAL, addr, &data).map_err(RamError::Cpucs)
}

/// Downloads an Intel HEX image into target RAM and resets the CPU so
/// it runs the new firmware.
///
/// With [`LoadStage::TwoStage`] the caller must have pre-loaded a
/// second-stage loader; the image stream is parsed twice and must
/// rewind in between. On error the CPU is left in whatever run state
/// the failing step reached; nothing is rolled back.
pub fn load_ram<T, R>(
    dev: &mut T,
    image: &mut R,
    chip: ChipFamily,
    stage: LoadStage,
) -> Result<RamStats, RamError>
where
    T: ControlTransport + ?Sized,
    R: BufRead + Seek,
{
    let cpucs_addr = chip.cpucs_addr();
    let classify = |addr: u16, len: usize| chip.is_external(addr, len);

    let mut writer = match stage {
        LoadStage::Single => {
            // Don't let the CPU run while we overwrite its code/data.
            cpucs(dev, cpucs_addr, false)?;
            RamWriter::new(RamMode::InternalOnly)
        }
        LoadStage::TwoStage => {
            // Loader was already downloaded; let the CPU keep running
            // and overwrite it later.
            info!("2nd stage: write external memory");
            RamWriter::new(RamMode::SkipInternal)
        }
    };

    ihex::parse(image, Some(&classify), |seg| writer.poke(&mut *dev, seg))?;

    if stage == LoadStage::TwoStage {
        writer.mode = RamMode::SkipExternal;

        // Don't let the CPU run while we overwrite the loader, and
        // rescan for the on-chip segments the first pass skipped (at
        // minimum the interrupt vectors at 0x0000).
        cpucs(dev, cpucs_addr, false)?;
        image.rewind().map_err(IhexError::Io)?;
        info!("2nd stage: write on-chip memory");
        ihex::parse(image, Some(&classify), |seg| writer.poke(&mut *dev, seg))?;
    }

    let stats = writer.stats;
    if stats.segments > 0 {
        info!(
            "wrote {} bytes in {} segments, avg {}",
            stats.bytes,
            stats.segments,
            stats.bytes / stats.segments
        );
    }

    // Now reset the CPU so it runs what we just downloaded.
    cpucs(dev, cpucs_addr, true)?;
    Ok(stats)
}
