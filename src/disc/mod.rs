//! Logical sector reader for the raw (mode 2 style) disc image.
//!
//! The image stores each 0x800-byte payload sector inside a 0x930-byte raw
//! sector: a 24-byte sync/address header, the payload, then a 0x118-byte
//! error-correction trailer. Everything above this module addresses the disc
//! as one contiguous payload stream; this reader inserts the gap skips.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Context};

/// Payload bytes per sector.
pub const SECTOR_PAYLOAD: u64 = 0x800;
/// Metadata bytes per sector (24-byte header + 0x118-byte trailer).
pub const SECTOR_METADATA: u64 = 0x130;
/// Raw bytes per sector.
pub const SECTOR_STRIDE: u64 = 0x930;
/// Raw offset of sector 0's payload.
pub const PAYLOAD_START: u64 = 24;

/// A disc image viewed as a contiguous payload byte stream.
///
/// `offset` is the *raw* file position and, outside of a call, always lies
/// within the payload region of `current_sector`; finishing a sector's
/// payload immediately advances past the trailer and the next header.
pub struct LogicalDisc<R> {
    source: R,
    offset: u64,
    current_sector: u64,
}

impl<R: Read + Seek> LogicalDisc<R> {
    pub fn open(source: R) -> anyhow::Result<Self> {
        let mut disc = Self {
            source,
            offset: 0,
            current_sector: 0,
        };
        disc.seek_to_sector(0)?;
        Ok(disc)
    }

    /// Raw file position (includes sector metadata).
    pub fn raw_offset(&self) -> u64 {
        self.offset
    }

    pub fn current_sector(&self) -> u64 {
        self.current_sector
    }

    /// Progress into the current sector's payload, in bytes.
    fn sector_progress(&self) -> u64 {
        self.offset - (PAYLOAD_START + SECTOR_STRIDE * self.current_sector)
    }

    /// Logical (payload-only) position from the start of sector 0.
    pub fn logical_position(&self) -> u64 {
        self.current_sector * SECTOR_PAYLOAD + self.sector_progress()
    }

    /// Absolute jump to the start of sector `n`'s payload.
    pub fn seek_to_sector(&mut self, n: u64) -> anyhow::Result<()> {
        let new_offset = PAYLOAD_START + n * SECTOR_STRIDE;
        self.source
            .seek(SeekFrom::Start(new_offset))
            .with_context(|| format!("seeking to sector {:#x} (raw {:#x})", n, new_offset))?;
        self.offset = new_offset;
        self.current_sector = n;
        Ok(())
    }

    /// Relative jump measured in payload bytes; metadata gaps are transparent.
    ///
    /// Every 0x800 payload boundary the delta crosses adds one 0x130 gap to
    /// the raw offset. Floor division keeps backward deltas correct.
    pub fn seek_forward(&mut self, delta: i64) -> anyhow::Result<()> {
        let progress = self.sector_progress() as i64;
        let diff_sectors = (progress + delta).div_euclid(SECTOR_PAYLOAD as i64);
        let new_sector = self.current_sector as i64 + diff_sectors;
        if new_sector < 0 {
            bail!(
                "seek_forward({}) from sector {:#x}+{:#x} lands before sector 0",
                delta,
                self.current_sector,
                progress
            );
        }
        self.current_sector = new_sector as u64;
        self.offset = (self.offset as i64 + delta + SECTOR_METADATA as i64 * diff_sectors) as u64;
        self.source
            .seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("seeking {} payload bytes forward", delta))?;
        Ok(())
    }

    /// Reads exactly `buf.len()` payload bytes, splitting at sector
    /// boundaries. A short read from the underlying source is an error.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let room = (SECTOR_PAYLOAD - self.sector_progress()) as usize;
            let take = room.min(buf.len() - filled);
            self.source
                .read_exact(&mut buf[filled..filled + take])
                .with_context(|| {
                    format!(
                        "short read: wanted {} payload bytes at sector {:#x}+{:#x} (raw {:#x}), got {}",
                        buf.len(),
                        self.current_sector,
                        self.sector_progress(),
                        self.offset,
                        filled
                    )
                })?;
            self.offset += take as u64;
            filled += take;
            if self.sector_progress() == SECTOR_PAYLOAD {
                // Step over the trailer and the next sector's header.
                self.current_sector += 1;
                self.offset += SECTOR_METADATA;
                self.source.seek(SeekFrom::Start(self.offset))?;
            }
        }
        Ok(())
    }
}

/// The `Read`/`Seek` impls expose the *logical* payload address space so
/// binrw record types parse straight off the disc. `SeekFrom::Start(b)` is
/// payload byte `b` of the whole disc; `Current(d)` is `seek_forward`.
impl<R: Read + Seek> Read for LogicalDisc<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // One underlying read, at most up to the current sector boundary.
        let room = (SECTOR_PAYLOAD - self.sector_progress()) as usize;
        let take = room.min(buf.len());
        if take == 0 {
            return Ok(0);
        }
        let n = self.source.read(&mut buf[..take])?;
        self.offset += n as u64;
        if self.sector_progress() == SECTOR_PAYLOAD {
            self.current_sector += 1;
            self.offset += SECTOR_METADATA;
            self.source.seek(SeekFrom::Start(self.offset))?;
        }
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for LogicalDisc<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let io_err = |e: anyhow::Error| std::io::Error::new(std::io::ErrorKind::InvalidInput, e);
        match pos {
            SeekFrom::Start(b) => {
                let sector = b / SECTOR_PAYLOAD;
                let intra = b % SECTOR_PAYLOAD;
                self.seek_to_sector(sector).map_err(io_err)?;
                if intra != 0 {
                    self.seek_forward(intra as i64).map_err(io_err)?;
                }
            }
            SeekFrom::Current(d) => self.seek_forward(d).map_err(io_err)?,
            SeekFrom::End(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "LogicalDisc cannot seek from the end of the payload stream",
                ))
            }
        }
        Ok(self.logical_position())
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.logical_position())
    }
}
