use std::fs;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;
use std::{error::Error as StdError, fmt};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::{Index, PrefixEntry, TABLE_PRIMES};

/// Upper bound on records in a single bucket while decoding. The true bound
/// is the pattern count, but that field sits after the buckets in the
/// stream, so record ids are range-checked against it only once the whole
/// stream is read.
const MAX_BUCKET_RECORDS: i32 = 1 << 24;

#[derive(Debug)]
pub enum DecodeError {
    /// The underlying reader failed for a reason other than running dry.
    Io(io::Error),
    /// The stream ended before the index was complete.
    Truncated,
    /// A field holds a value no well-formed index can contain.
    Invalid(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::Io(_) => write!(f, "I/O error"),
            DecodeError::Truncated => write!(f, "corrupt index: truncated stream"),
            DecodeError::Invalid(what) => write!(f, "corrupt index: invalid {}", what),
        }
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DecodeError::Io(e) => Some(e),
            DecodeError::Truncated | DecodeError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(source: io::Error) -> Self {
        if source.kind() == ErrorKind::UnexpectedEof {
            DecodeError::Truncated
        } else {
            DecodeError::Io(source)
        }
    }
}

/// Deserialize an index from `r`, validating every structural invariant on
/// the way in.
///
/// Truncation anywhere in the stream, a table size off the prime ladder,
/// negative or impossible lengths, shift entries out of range, and bucket
/// records pointing past the pattern list all fail with the corrupt-index
/// kinds. Nothing partially decoded is ever returned.
pub fn decode<R: Read>(mut r: R) -> Result<Index, DecodeError> {
    let min = r.read_i32::<BigEndian>()?;
    if min < 1 {
        return Err(DecodeError::Invalid("minimum pattern length"));
    }
    let table_size = r.read_i32::<BigEndian>()?;
    if table_size < 0 || !TABLE_PRIMES.contains(&(table_size as u32)) {
        return Err(DecodeError::Invalid("table size"));
    }
    let block = r.read_i32::<BigEndian>()?;
    if block < 1 || block > min {
        return Err(DecodeError::Invalid("block size"));
    }

    let max_shift = min - block + 1;
    let mut shift_table = Vec::with_capacity(table_size as usize);
    for _ in 0..table_size {
        let shift = r.read_i32::<BigEndian>()?;
        if !(0..=max_shift).contains(&shift) {
            return Err(DecodeError::Invalid("shift entry"));
        }
        shift_table.push(shift);
    }

    let mut hash_table = Vec::with_capacity(table_size as usize);
    for _ in 0..table_size {
        let len = r.read_i32::<BigEndian>()?;
        if !(0..MAX_BUCKET_RECORDS).contains(&len) {
            return Err(DecodeError::Invalid("bucket length"));
        }
        let mut bucket = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            let prefix_hash = r.read_u32::<BigEndian>()?;
            if prefix_hash > 0x7FFF_FFFF {
                return Err(DecodeError::Invalid("prefix hash"));
            }
            let pattern_id = r.read_i32::<BigEndian>()?;
            if pattern_id < 0 {
                return Err(DecodeError::Invalid("pattern id"));
            }
            bucket.push(PrefixEntry {
                prefix_hash,
                pattern_id: pattern_id as u32,
            });
        }
        hash_table.push(bucket);
    }

    let pattern_count = r.read_i32::<BigEndian>()?;
    if pattern_count < 1 {
        return Err(DecodeError::Invalid("pattern count"));
    }
    let mut patterns = Vec::with_capacity(pattern_count.min(1024) as usize);
    for _ in 0..pattern_count {
        let len = r.read_i32::<BigEndian>()?;
        if len < min {
            return Err(DecodeError::Invalid("pattern length"));
        }
        // Never preallocate from an untrusted length; `take` bounds the
        // read and a short count means the stream ran dry.
        let mut pattern = Vec::new();
        let n = (&mut r).take(len as u64).read_to_end(&mut pattern)?;
        if n < len as usize {
            return Err(DecodeError::Truncated);
        }
        patterns.push(pattern);
    }

    for bucket in &hash_table {
        if bucket.iter().any(|e| e.pattern_id >= pattern_count as u32) {
            return Err(DecodeError::Invalid("pattern id"));
        }
    }

    Ok(Index::from_parts(
        min as u32,
        block as u32,
        table_size as u32,
        shift_table,
        hash_table,
        patterns,
    ))
}

/// Load a serialized index from a file.
pub fn decode_from_path<P: AsRef<Path>>(path: P) -> Result<Index, DecodeError> {
    let path = path.as_ref();
    let index = decode(BufReader::new(fs::File::open(path)?))?;
    debug!(
        path = %path.display(),
        patterns = index.patterns().len(),
        "index loaded"
    );
    Ok(index)
}
