//! Reader for `blkNNNNN.dat` archive segments.
//!
//! Each record is a little-endian `u32` network marker, a little-endian `u32`
//! payload length and the consensus-encoded block. Node-written segments are
//! pre-allocated, so a zero marker ends the usable part of a file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use blkaudit_consensus::constants::MAX_BLOCK_SERIALIZED_SIZE;

const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug)]
pub enum ArchiveError {
    Io(io::Error),
    BadMagic {
        offset: u64,
        found: u32,
        expected: u32,
    },
    TruncatedHeader {
        offset: u64,
    },
    TruncatedPayload {
        offset: u64,
        expected: u32,
        found: u64,
    },
    Oversized {
        offset: u64,
        len: u32,
    },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Io(err) => write!(f, "{err}"),
            ArchiveError::BadMagic {
                offset,
                found,
                expected,
            } => write!(
                f,
                "bad record marker {found:#010x} at offset {offset} (expected {expected:#010x})"
            ),
            ArchiveError::TruncatedHeader { offset } => {
                write!(f, "truncated record header at offset {offset}")
            }
            ArchiveError::TruncatedPayload {
                offset,
                expected,
                found,
            } => write!(
                f,
                "truncated record at offset {offset}: expected {expected} bytes, found {found}"
            ),
            ArchiveError::Oversized { offset, len } => {
                write!(f, "record at offset {offset} claims {len} bytes")
            }
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

/// `<prefix><index:05>.dat`; prefix `/data/blocks/blk` and index 7 give
/// `/data/blocks/blk00007.dat`.
pub fn segment_path(prefix: &Path, index: u32) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("{index:05}.dat"));
    PathBuf::from(name)
}

pub struct ArchiveReader<R> {
    reader: R,
    magic: u32,
    offset: u64,
    records: u32,
    finished: bool,
}

impl ArchiveReader<BufReader<File>> {
    /// Opens one segment. `Ok(None)` when the file does not exist.
    pub fn open(path: &Path, magic: u32) -> Result<Option<Self>, ArchiveError> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self::new(
                BufReader::with_capacity(1 << 20, file),
                magic,
            ))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ArchiveError::Io(err)),
        }
    }
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(reader: R, magic: u32) -> Self {
        Self {
            reader,
            magic,
            offset: 0,
            records: 0,
            finished: false,
        }
    }

    /// Records returned or skipped so far.
    pub fn records(&self) -> u32 {
        self.records
    }

    /// Next record payload, or `None` at the end of the segment.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, ArchiveError> {
        let Some((offset, len)) = self.read_header()? else {
            return Ok(None);
        };
        let mut payload = vec![0u8; len as usize];
        let filled = read_full(&mut self.reader, &mut payload)?;
        if filled < payload.len() {
            return Err(ArchiveError::TruncatedPayload {
                offset,
                expected: len,
                found: filled as u64,
            });
        }
        self.offset += u64::from(len);
        self.records += 1;
        Ok(Some(payload))
    }

    /// Advances over up to `count` records without decoding them. Returns how
    /// many were skipped; fewer than `count` means the segment ended.
    pub fn skip(&mut self, count: u32) -> Result<u32, ArchiveError> {
        let mut skipped = 0;
        while skipped < count {
            let Some((offset, len)) = self.read_header()? else {
                break;
            };
            let discarded = io::copy(
                &mut (&mut self.reader).take(u64::from(len)),
                &mut io::sink(),
            )?;
            if discarded < u64::from(len) {
                return Err(ArchiveError::TruncatedPayload {
                    offset,
                    expected: len,
                    found: discarded,
                });
            }
            self.offset += u64::from(len);
            self.records += 1;
            skipped += 1;
        }
        Ok(skipped)
    }

    fn read_header(&mut self) -> Result<Option<(u64, u32)>, ArchiveError> {
        if self.finished {
            return Ok(None);
        }
        let offset = self.offset;
        let mut header = [0u8; RECORD_HEADER_LEN];
        let filled = read_full(&mut self.reader, &mut header[..4])?;
        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }
        if filled < 4 {
            return Err(ArchiveError::TruncatedHeader { offset });
        }
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic == 0 {
            self.finished = true;
            return Ok(None);
        }
        if magic != self.magic {
            return Err(ArchiveError::BadMagic {
                offset,
                found: magic,
                expected: self.magic,
            });
        }
        if read_full(&mut self.reader, &mut header[4..])? < 4 {
            return Err(ArchiveError::TruncatedHeader { offset });
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_BLOCK_SERIALIZED_SIZE {
            return Err(ArchiveError::Oversized { offset, len });
        }
        self.offset += RECORD_HEADER_LEN as u64;
        Ok(Some((offset, len)))
    }
}

/// Like `read_exact`, but reports how much was read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
