//! Serialized form of the calibration tables, as stored in flash.
//!
//! ```text
//! magic "PCVC" | version | channel count
//! per channel: entry count | count * (input: i32 LE, code: u16 LE)
//! checksum: u16 LE, the XOR of every code
//! ```
//!
//! Anything after the checksum is ignored, so a blob may be read straight out of a (padded) flash sector. Erased flash
//! fails with [`CalibrationFault::BadMagic`].

use super::{CalibrationEntry, CalibrationTable, MAX_CHANNELS, MAX_ENTRIES};
use crate::error::CalibrationFault;
use tinyvec::ArrayVec;

/// Identifies a calibration blob.
pub const MAGIC: [u8; 4] = *b"PCVC";

/// Current format version.
pub const VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 2;
const ENTRY_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;

/// Size of the largest possible blob.
pub const MAX_ENCODED_LEN: usize = HEADER_LEN + MAX_CHANNELS * (1 + MAX_ENTRIES * ENTRY_LEN) + CHECKSUM_LEN;

/// Size of the blob [`encode`] would write for `tables`.
pub fn encoded_len(tables: &[CalibrationTable]) -> usize {
    HEADER_LEN
        + tables
            .iter()
            .map(|table| 1 + table.entries().len() * ENTRY_LEN)
            .sum::<usize>()
        + CHECKSUM_LEN
}

/// Writes `tables` (one per channel, in order) to `out`, returning the number of bytes written.
pub fn encode(tables: &[CalibrationTable], out: &mut [u8]) -> Result<usize, CalibrationFault> {
    if tables.len() > MAX_CHANNELS {
        return Err(CalibrationFault::NoSuchChannel);
    }
    let len = encoded_len(tables);
    let out = out.get_mut(..len).ok_or(CalibrationFault::Truncated)?;

    out[..MAGIC.len()].copy_from_slice(&MAGIC);
    out[MAGIC.len()] = VERSION;
    out[MAGIC.len() + 1] = tables.len() as u8;

    let mut position = HEADER_LEN;
    let mut checksum = 0_u16;
    for table in tables {
        out[position] = table.entries().len() as u8;
        position += 1;
        for entry in table.entries() {
            out[position..position + 4].copy_from_slice(&entry.input.to_le_bytes());
            out[position + 4..position + ENTRY_LEN].copy_from_slice(&entry.code.to_le_bytes());
            position += ENTRY_LEN;
            checksum ^= entry.code;
        }
    }
    out[position..].copy_from_slice(&checksum.to_le_bytes());
    Ok(len)
}

/// Reads tables back from a blob written by [`encode`]. Every table is validated as if freshly loaded.
pub fn decode(bytes: &[u8]) -> Result<ArrayVec<[CalibrationTable; MAX_CHANNELS]>, CalibrationFault> {
    let mut reader = Reader { bytes };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(CalibrationFault::BadMagic);
    }
    if reader.byte()? != VERSION {
        return Err(CalibrationFault::UnsupportedVersion);
    }
    let channels = usize::from(reader.byte()?);
    if channels > MAX_CHANNELS {
        return Err(CalibrationFault::NoSuchChannel);
    }

    let mut tables = ArrayVec::new();
    let mut checksum = 0_u16;
    for _ in 0..channels {
        let count = usize::from(reader.byte()?);
        if count > MAX_ENTRIES {
            return Err(CalibrationFault::TooManyEntries);
        }
        let mut entries: ArrayVec<[CalibrationEntry; MAX_ENTRIES]> = ArrayVec::new();
        for _ in 0..count {
            let raw = reader.take(ENTRY_LEN)?;
            let entry = CalibrationEntry {
                input: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                code: u16::from_le_bytes([raw[4], raw[5]]),
            };
            checksum ^= entry.code;
            entries.push(entry);
        }
        tables.push(if entries.is_empty() {
            CalibrationTable::new()
        } else {
            CalibrationTable::load(&entries)?
        });
    }

    let stored = reader.take(CHECKSUM_LEN)?;
    if u16::from_le_bytes([stored[0], stored[1]]) != checksum {
        return Err(CalibrationFault::ChecksumMismatch);
    }
    Ok(tables)
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CalibrationFault> {
        if self.bytes.len() < n {
            return Err(CalibrationFault::Truncated);
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, CalibrationFault> {
        self.take(1).map(|b| b[0])
    }
}
