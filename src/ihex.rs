//! Intel HEX parser that reassembles line-sized records into larger
//! contiguous segments before handing them to a consumer.
//!
//! Each hex line holds at most 16 bytes, but downloading is faster (and
//! EEPROM space smaller) when adjacent records are merged into one
//! chunk. Most hex files keep memory segments together, which makes the
//! merge all but free. Segments max out at 1023 bytes, the framing
//! limit of the EEPROM boot format.

use std::io::{self, BufRead};

use thiserror::Error;

use tracing::{debug, trace};

/// Largest segment the accumulation buffer (and the EEPROM boot format)
/// can hold.
pub const MAX_SEGMENT_LEN: usize = 1023;

/// One contiguous run of image bytes at a known target address.
///
/// The data borrows the parser's working buffer and is only valid for
/// the duration of the consumer call; copy or transmit it before
/// returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Target start address.
    pub addr: u16,
    /// True if the classifier placed this segment in external memory.
    /// Always false when parsing without a classifier.
    pub external: bool,
    pub data: &'a [u8],
}

/// A malformed hex image. Line numbers are 1-based.
#[derive(Error, Debug)]
pub enum IhexError {
    #[error("i/o error reading hex image: {0}")]
    Io(#[from] io::Error),

    #[error("line {line_no}: not an ihex record")]
    NotAnIhexRecord { line_no: usize },

    #[error("line {line_no}: record shorter than its declared byte count")]
    RecordTooShort { line_no: usize },

    #[error("line {line_no}: invalid hex digits in record")]
    InvalidHexDigit { line_no: usize },

    #[error("line {line_no}: unsupported record type {rec_type}")]
    UnsupportedRecordType { line_no: usize, rec_type: u8 },

    #[error("end of hex image without an EOF record")]
    MissingEof,
}

/// Why a parse stopped early: the image itself was bad, or the segment
/// consumer refused a segment.
#[derive(Error, Debug)]
pub enum ParseError<E: std::error::Error> {
    #[error(transparent)]
    Format(#[from] IhexError),

    #[error(transparent)]
    Consumer(E),
}

/// Parses `image` as Intel HEX and feeds coalesced segments to
/// `on_segment`, classifying each one with `classifier` if supplied.
///
/// Only data (type 0) and EOF (type 1) records are accepted; lines
/// starting with `#` are treated as comments. Reaching end of input
/// without an EOF record is an error, as is any consumer error, which
/// aborts immediately without delivering further segments.
///
/// The parser keeps no state across calls; rewinding the same stream
/// and parsing again yields an identical segment sequence.
pub fn parse<R, E, F>(
    image: &mut R,
    classifier: Option<&dyn Fn(u16, usize) -> bool>,
    mut on_segment: F,
) -> Result<(), ParseError<E>>
where
    R: BufRead,
    E: std::error::Error,
    F: FnMut(Segment<'_>) -> Result<(), E>,
{
    let mut data = [0u8; MAX_SEGMENT_LEN];
    let mut data_addr: u16 = 0;
    let mut data_len: usize = 0;

    let mut line = String::new();
    let mut line_no: usize = 0;
    let mut saw_eof = false;

    loop {
        line.clear();
        if image.read_line(&mut line).map_err(IhexError::Io)? == 0 {
            break;
        }
        line_no += 1;
        let rec = line.trim_end_matches(['\n', '\r']);

        // EXTENSION: "# comment-till-end-of-line", for copyrights etc.
        if rec.starts_with('#') {
            continue;
        }
        if !rec.starts_with(':') || !rec.is_ascii() {
            return Err(IhexError::NotAnIhexRecord { line_no }.into());
        }

        trace!("line {line_no}: {rec}");

        // Fixed-width fields: byte count, 16-bit offset, record type.
        if rec.len() < 9 {
            return Err(IhexError::RecordTooShort { line_no }.into());
        }
        let len = hex_field(&rec[1..3], line_no)? as usize;
        let off = (hex_field(&rec[3..5], line_no)? as u16) << 8
            | hex_field(&rec[5..7], line_no)? as u16;
        let rec_type = hex_field(&rec[7..9], line_no)?;

        if rec_type == 1 {
            debug!("EOF on hexfile at line {line_no}");
            saw_eof = true;
            break;
        }
        if rec_type != 0 {
            return Err(IhexError::UnsupportedRecordType { line_no, rec_type }.into());
        }

        // The declared payload plus the trailing checksum pair must be
        // present. The checksum itself is not verified.
        if rec.len() < 11 + 2 * len {
            return Err(IhexError::RecordTooShort { line_no }.into());
        }

        // Flush the saved data if the new record isn't contiguous with
        // it, or if appending would overrun the buffer.
        if data_len != 0
            && (off as usize != data_addr as usize + data_len || data_len + len > data.len())
        {
            flush(
                data_addr,
                &data[..data_len],
                classifier,
                &mut on_segment,
            )?;
            data_len = 0;
        }
        if data_len == 0 {
            data_addr = off;
        }

        for i in 0..len {
            data[data_len + i] = hex_field(&rec[9 + 2 * i..11 + 2 * i], line_no)?;
        }
        data_len += len;
    }

    if !saw_eof {
        return Err(IhexError::MissingEof.into());
    }

    // Flush any data remaining.
    if data_len != 0 {
        flush(data_addr, &data[..data_len], classifier, &mut on_segment)?;
    }
    Ok(())
}

fn flush<E, F>(
    addr: u16,
    data: &[u8],
    classifier: Option<&dyn Fn(u16, usize) -> bool>,
    on_segment: &mut F,
) -> Result<(), ParseError<E>>
where
    E: std::error::Error,
    F: FnMut(Segment<'_>) -> Result<(), E>,
{
    let external = classifier.is_some_and(|is_external| is_external(addr, data.len()));
    on_segment(Segment {
        addr,
        external,
        data,
    })
    .map_err(ParseError::Consumer)
}

fn hex_field(s: &str, line_no: usize) -> Result<u8, IhexError> {
    u8::from_str_radix(s, 16).map_err(|_| IhexError::InvalidHexDigit { line_no })
}
