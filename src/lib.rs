use std::fmt;

use tracing::warn;

#[cfg(feature = "codec")]
pub mod dec;
#[cfg(feature = "codec")]
pub mod enc;

/// Default block size (3 bytes). Reduced to the shortest pattern length when
/// patterns are shorter than that.
pub const DEFAULT_BLOCK_SIZE: u32 = 3;

/// The table-size ladder. The builder picks the smallest prime that keeps
/// the tables sparse relative to the pattern count; the decoder rejects any
/// size not on the ladder.
pub(crate) const TABLE_PRIMES: [u32; 6] =
    [1003, 10_007, 100_003, 1_000_003, 10_000_019, 100_000_007];

/// Hash a byte slice down to 31 bits.
///
/// The classic sdbm polynomial with unsigned 32-bit wrap-around and a final
/// 31-bit mask. Serialized indexes embed these values, so the constants and
/// the mask are part of the wire format.
#[inline]
pub fn hash(bytes: &[u8]) -> u32 {
    let mut h = 0u32;
    for &b in bytes {
        h = (b as u32)
            .wrapping_add(h << 6)
            .wrapping_add(h << 16)
            .wrapping_sub(h);
    }
    h & 0x7FFF_FFFF
}

#[derive(Debug)]
pub enum BuildError {
    /// `build` was called with no patterns at all.
    EmptyPatternSet,
    /// The pattern at this position has zero length.
    EmptyPattern { pattern_id: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildError::EmptyPatternSet => write!(f, "no patterns specified"),
            BuildError::EmptyPattern { pattern_id } => {
                write!(f, "pattern {} is empty", pattern_id)
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// One hash-table record: the hash of the first `block` bytes of a pattern
/// whose tail block landed in this bucket, plus the pattern's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixEntry {
    pub prefix_hash: u32,
    pub pattern_id: u32,
}

/// A prebuilt Wu–Manber index over a fixed set of byte patterns.
///
/// The index pairs a SHIFT table, keyed by the hash of the last `block`
/// bytes of a sliding `min`-byte window, with a combined HASH/PREFIX table
/// mapping tail-block hashes to the patterns ending there. Building is the
/// expensive step; [`search`](Index::search) only reads. A built index is
/// immutable, so any number of threads may search it concurrently, and it
/// can be serialized with [`enc::encode`] and reloaded with [`dec::decode`]
/// to skip preprocessing entirely.
///
/// Everything is byte-oriented: pattern and text "length" always means byte
/// length, and callers wanting character-level semantics must normalize
/// their input first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Byte length of the shortest pattern.
    min: u32,
    /// Block size the shift table is keyed on.
    block: u32,
    /// Slot count of both tables.
    table_size: u32,
    shift_table: Vec<i32>,
    hash_table: Vec<Vec<PrefixEntry>>,
    patterns: Vec<Vec<u8>>,
}

impl Index {
    /// Preprocess `patterns` into a searchable index.
    ///
    /// Pattern order is significant: it assigns the ids that bucket records
    /// (and the serialized form) refer to. Duplicate patterns are kept as
    /// independent entries and each contributes its own hit.
    pub fn build(patterns: Vec<Vec<u8>>) -> Result<Self, BuildError> {
        if patterns.is_empty() {
            return Err(BuildError::EmptyPatternSet);
        }

        let mut min = u32::MAX;
        for (id, pattern) in patterns.iter().enumerate() {
            if pattern.is_empty() {
                return Err(BuildError::EmptyPattern { pattern_id: id });
            }
            min = min.min(pattern.len() as u32);
        }

        let mut block = DEFAULT_BLOCK_SIZE;
        if block > min {
            warn!(
                min,
                "block size reduced to the shortest pattern length, search efficiency degrades"
            );
            block = min;
        }

        let table_size = pick_table_size(patterns.len() as u32, min);

        let default_shift = (min - block + 1) as i32;
        let mut shift_table = vec![default_shift; table_size as usize];
        let mut hash_table: Vec<Vec<PrefixEntry>> = vec![Vec::new(); table_size as usize];

        // Only the first `min` bytes of each pattern feed the tables; the
        // tail beyond that is seen again during verification only.
        for (id, pattern) in patterns.iter().enumerate() {
            for index in (block..=min).rev() {
                let start = (index - block) as usize;
                let h = hash(&pattern[start..start + block as usize]) % table_size;
                let shift = (min - index) as i32;
                if shift_table[h as usize] > shift {
                    shift_table[h as usize] = shift;
                }
                if index == min {
                    hash_table[h as usize].push(PrefixEntry {
                        prefix_hash: hash(&pattern[..block as usize]),
                        pattern_id: id as u32,
                    });
                }
            }
        }

        Ok(Self {
            min,
            block,
            table_size,
            shift_table,
            hash_table,
            patterns,
        })
    }

    /// Count every pattern occurrence in `text`.
    ///
    /// Overlapping occurrences are counted individually, and duplicate
    /// patterns each count at the same position. A text shorter than the
    /// shortest pattern yields 0 without scanning.
    pub fn search(&self, text: &[u8]) -> u32 {
        let block = self.block as usize;
        let block_max = block - 1;
        let window_max = self.min as usize - 1;

        let mut hits = 0u32;
        let mut i = window_max;
        while i < text.len() {
            let block_hash = hash(&text[i - block_max..i + 1]) % self.table_size;
            let shift = self.shift_table[block_hash as usize];
            if shift > 0 {
                i += shift as usize;
                continue;
            }

            // Shift 0: some pattern's tail block ends here. Filter the
            // bucket by prefix hash, then confirm byte-for-byte. A match
            // that would run past the end of the text does not count.
            let start = i - window_max;
            let prefix_hash = hash(&text[start..start + block]);
            for entry in &self.hash_table[block_hash as usize] {
                if entry.prefix_hash != prefix_hash {
                    continue;
                }
                if text[start..].starts_with(&self.patterns[entry.pattern_id as usize]) {
                    hits += 1;
                }
            }
            i += 1;
        }
        hits
    }

    /// Byte length of the shortest pattern.
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Block size used as the shift-table key.
    pub fn block(&self) -> u32 {
        self.block
    }

    /// Slot count of the shift and hash tables.
    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    pub fn shift_table(&self) -> &[i32] {
        &self.shift_table
    }

    pub fn hash_table(&self) -> &[Vec<PrefixEntry>] {
        &self.hash_table
    }

    pub fn patterns(&self) -> &[Vec<u8>] {
        &self.patterns
    }

    /// Reassemble an index from parts the decoder has already validated.
    #[cfg(feature = "codec")]
    pub(crate) fn from_parts(
        min: u32,
        block: u32,
        table_size: u32,
        shift_table: Vec<i32>,
        hash_table: Vec<Vec<PrefixEntry>>,
        patterns: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            min,
            block,
            table_size,
            shift_table,
            hash_table,
            patterns,
        }
    }
}

/// Pick the table size for a pattern set: the smallest ladder prime that
/// both exceeds the pattern count and keeps the table at least `10 * min`
/// times larger than it (integer division). Falls back to the largest prime
/// when the set outgrows the whole ladder.
fn pick_table_size(pattern_count: u32, min: u32) -> u32 {
    let threshold = 10 * min;
    for &prime in &TABLE_PRIMES {
        if prime > pattern_count && prime / pattern_count > threshold {
            return prime;
        }
    }
    warn!(
        pattern_count,
        "pattern set outgrows every table size, collision rate will be high"
    );
    TABLE_PRIMES[5]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build(patterns: &[&str]) -> Index {
        Index::build(patterns.iter().map(|p| p.as_bytes().to_vec()).collect()).unwrap()
    }

    /// The slow truth: every start position against every pattern.
    fn naive_count(patterns: &[Vec<u8>], text: &[u8]) -> u32 {
        let mut hits = 0;
        for start in 0..text.len() {
            for pattern in patterns {
                if text[start..].starts_with(pattern) {
                    hits += 1;
                }
            }
        }
        hits
    }

    #[test]
    fn table_parameters() {
        let ix = build(&["你好", "世界"]);
        assert_eq!(ix.block(), 3);
        assert_eq!(ix.min(), 6);
        assert_eq!(ix.table_size(), 1003);
        assert_eq!(ix.shift_table().len(), 1003);
        assert_eq!(ix.hash_table().len(), 1003);
    }

    #[test]
    fn mixed_byte_length_patterns() {
        let ix = build(&["你好", "世界", "abc"]);
        assert_eq!(ix.min(), 3);
        assert_eq!(ix.search("你们好".as_bytes()), 0);
        assert_eq!(ix.search(b"abcdefg"), 1);
        assert_eq!(ix.search("o世界很大".as_bytes()), 1);
        assert_eq!(ix.search("北京你好，世界很大啊".as_bytes()), 2);
    }

    #[test]
    fn empty_pattern_set_is_rejected() {
        assert!(matches!(
            Index::build(Vec::new()),
            Err(BuildError::EmptyPatternSet)
        ));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let err = Index::build(vec![b"ab".to_vec(), Vec::new()]).unwrap_err();
        assert!(matches!(err, BuildError::EmptyPattern { pattern_id: 1 }));
    }

    #[test]
    fn text_shorter_than_shortest_pattern() {
        let ix = build(&["abcd"]);
        assert_eq!(ix.search(b""), 0);
        assert_eq!(ix.search(b"abc"), 0);
    }

    #[test]
    fn pattern_equal_to_whole_text() {
        let ix = build(&["abcd"]);
        assert_eq!(ix.search(b"abcd"), 1);
    }

    #[test]
    fn duplicate_patterns_count_separately() {
        let ix = build(&["abc", "abc"]);
        assert_eq!(ix.search(b"xxabcxx"), 2);
    }

    #[test]
    fn overlapping_occurrences_all_count() {
        let ix = build(&["aa"]);
        assert_eq!(ix.block(), 2);
        assert_eq!(ix.search(b"aaaa"), 3);
    }

    #[test]
    fn single_byte_patterns() {
        let ix = build(&["a", "b"]);
        assert_eq!(ix.block(), 1);
        assert_eq!(ix.search(b"abacus"), 3);
    }

    #[test]
    fn match_past_the_end_is_not_counted() {
        let ix = build(&["abcde", "abc"]);
        assert_eq!(ix.search(b"xabcd"), 1);
    }

    #[test]
    fn every_pattern_lands_in_its_tail_bucket() {
        let ix = build(&["foobar", "quux", "xyzzy"]);
        let min = ix.min() as usize;
        let block = ix.block() as usize;
        for (id, pattern) in ix.patterns().iter().enumerate() {
            let h = hash(&pattern[min - block..min]) % ix.table_size();
            let entry = PrefixEntry {
                prefix_hash: hash(&pattern[..block]),
                pattern_id: id as u32,
            };
            assert!(ix.hash_table()[h as usize].contains(&entry));
            assert_eq!(ix.shift_table()[h as usize], 0);
        }
    }

    // A 4-symbol alphabet keeps collisions and real matches frequent.
    fn pattern_set() -> impl Strategy<Value = Vec<Vec<u8>>> {
        proptest::collection::vec(proptest::collection::vec(0u8..4, 1..6), 1..12)
    }

    fn text() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(0u8..4, 0..64)
    }

    proptest! {
        #[test]
        fn agrees_with_naive_count(patterns in pattern_set(), text in text()) {
            let ix = Index::build(patterns.clone()).unwrap();
            prop_assert_eq!(ix.search(&text), naive_count(&patterns, &text));
        }

        #[test]
        fn search_is_pure(patterns in pattern_set(), text in text()) {
            let ix = Index::build(patterns).unwrap();
            prop_assert_eq!(ix.search(&text), ix.search(&text));
        }

        #[test]
        fn concatenation_never_loses_hits(
            patterns in pattern_set(),
            a in text(),
            b in text(),
        ) {
            let ix = Index::build(patterns).unwrap();
            let mut ab = a.clone();
            ab.extend_from_slice(&b);
            prop_assert!(ix.search(&a) + ix.search(&b) <= ix.search(&ab));
        }

        #[test]
        fn shift_entries_stay_bounded(patterns in pattern_set()) {
            let ix = Index::build(patterns).unwrap();
            let max = (ix.min() - ix.block() + 1) as i32;
            prop_assert!(ix.shift_table().iter().all(|&s| (0..=max).contains(&s)));
        }
    }
}
