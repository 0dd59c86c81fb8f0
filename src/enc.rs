use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use crate::Index;

/// Serialize `index` into `w`.
///
/// Layout, all fields big-endian: `min`, `table_size`, `block` (i32 each);
/// the shift table as `table_size` i32 values; per bucket an i32 record
/// count followed by 8-byte records (`prefix_hash` as u32, `pattern_id` as
/// i32); then an i32 pattern count and each pattern as an i32 length plus
/// raw bytes. No magic, no version, no padding.
///
/// Bucket records are written in their in-memory order, so re-encoding a
/// decoded index reproduces the original stream byte-for-byte.
pub fn encode<W: Write>(index: &Index, mut w: W) -> io::Result<()> {
    w.write_i32::<BigEndian>(index.min() as i32)?;
    w.write_i32::<BigEndian>(index.table_size() as i32)?;
    w.write_i32::<BigEndian>(index.block() as i32)?;

    for &shift in index.shift_table() {
        w.write_i32::<BigEndian>(shift)?;
    }

    for bucket in index.hash_table() {
        w.write_i32::<BigEndian>(bucket.len() as i32)?;
        for entry in bucket {
            w.write_u32::<BigEndian>(entry.prefix_hash)?;
            w.write_i32::<BigEndian>(entry.pattern_id as i32)?;
        }
    }

    w.write_i32::<BigEndian>(index.patterns().len() as i32)?;
    for pattern in index.patterns() {
        w.write_i32::<BigEndian>(pattern.len() as i32)?;
        w.write_all(pattern)?;
    }

    Ok(())
}

/// Serialize `index` to a file, creating or truncating it.
pub fn encode_to_path<P: AsRef<Path>>(index: &Index, path: P) -> io::Result<()> {
    let path = path.as_ref();
    let mut w = BufWriter::new(fs::File::create(path)?);
    encode(index, &mut w)?;
    w.flush()?;
    debug!(path = %path.display(), "index serialized");
    Ok(())
}
