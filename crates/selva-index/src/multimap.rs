// SPDX-License-Identifier: MIT

//! A key -> value-list map on top of [PrefixMap], with a small-list
//! inliner.
//!
//! The fastmap's fixed value slot holds a *container*. With the
//! inliner active (possible whenever the list-file offset width equals
//! the value width) a container is two value-widths long and has two
//! shapes:
//!
//! - `value ‖ 0x00…` — the key has exactly one value, stored inline;
//! - `0xFF… ‖ offset` — the key's values live in the `indices` file at
//!   `offset`, as an unsigned varint count followed by the packed
//!   values.
//!
//! Values are written shifted so that all-zeros never occurs, which is
//! what makes the zero padding recognizable; a genuine all-0xFF value
//! is stored out of line so it cannot impersonate the marker. Without
//! the inliner the container is just the offset and every list is out
//! of line.

use std::io::Write;

use selva_common::read_le;
use selva_common::varint::read_uvarint;
use selva_common::varint::write_uvarint;
use selva_common::write_le;

use crate::error::IndexError;
use crate::fastmap::PrefixMap;
use crate::fastmap::PrefixMapWriter;

/// Decodes the fixed-width little-endian values of a raw list.
pub fn iter_values(list: &[u8], value_len: usize) -> impl Iterator<Item = u64> + '_ {
    list.chunks_exact(value_len).map(read_le)
}

/// Build side. Accepts `key ‖ value` records sorted by their full byte
/// string; exact duplicates are dropped.
pub struct MultiMapWriter<W: Write> {
    fm: PrefixMapWriter<W>,
    indices: W,
    key_len: usize,
    value_len: usize,
    offset_len: usize,
    inline: bool,
    prev_key: Vec<u8>,
    values: Vec<u8>,
    indices_len: u64,
}

impl<W: Write> MultiMapWriter<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page_len: usize,
        key_len: usize,
        value_len: usize,
        fastmap_prefix_len: usize,
        offset_len: usize,
        data: W,
        prefixes: W,
        indices: W,
    ) -> Result<Self, IndexError> {
        let inline = offset_len == value_len;
        let container_len = if inline { 2 * value_len } else { offset_len };
        let fm = PrefixMapWriter::new(
            page_len,
            key_len,
            container_len,
            fastmap_prefix_len,
            data,
            prefixes,
        )?;
        Ok(MultiMapWriter {
            fm,
            indices,
            key_len,
            value_len,
            offset_len,
            inline,
            prev_key: Vec::with_capacity(key_len),
            values: Vec::new(),
            indices_len: 0,
        })
    }

    pub fn write_record(&mut self, record: &[u8]) -> Result<(), IndexError> {
        let record_len = self.key_len + self.value_len;
        if record.len() != record_len {
            return Err(IndexError::BadRecordLen {
                expected: record_len,
                got: record.len(),
            });
        }
        let (key, value) = record.split_at(self.key_len);

        if self.values.is_empty() {
            self.prev_key.clear();
            self.prev_key.extend_from_slice(key);
        } else if key == self.prev_key.as_slice() {
            let last = &self.values[self.values.len() - self.value_len..];
            if last == value {
                // Repeated (key, value) pair.
                return Ok(());
            }
        } else {
            self.dump()?;
            self.prev_key.clear();
            self.prev_key.extend_from_slice(key);
        }
        self.values.extend_from_slice(value);
        Ok(())
    }

    /// Flushes the finished group for `prev_key` as either an inline
    /// container or an out-of-line list.
    fn dump(&mut self) -> Result<(), IndexError> {
        let count = self.values.len() / self.value_len;
        let mut container = Vec::with_capacity(2 * self.value_len);

        let single_inlinable = self.inline
            && count == 1
            && self.values.iter().any(|byte| *byte != 0xFF);

        if single_inlinable {
            container.extend_from_slice(&self.values);
            container.resize(2 * self.value_len, 0);
        } else {
            let mut offset_bytes = vec![0u8; self.offset_len];
            if !write_le(self.indices_len, &mut offset_bytes) {
                return Err(IndexError::OffsetOverflow);
            }
            if self.inline {
                container.resize(self.value_len, 0xFF);
            }
            container.extend_from_slice(&offset_bytes);

            let mut framed = Vec::with_capacity(self.values.len() + 10);
            write_uvarint(count as u64, &mut framed);
            framed.extend_from_slice(&self.values);
            self.indices.write_all(&framed)?;
            self.indices_len += framed.len() as u64;
        }

        let mut record = Vec::with_capacity(self.key_len + container.len());
        record.extend_from_slice(&self.prev_key);
        record.extend_from_slice(&container);
        self.fm.push(&record)?;

        self.values.clear();
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), IndexError> {
        if !self.values.is_empty() {
            self.dump()?;
        }
        self.fm.finish()?;
        self.indices.flush()?;
        Ok(())
    }
}

impl<W: Write> crate::emsort::SortedSink for MultiMapWriter<W> {
    fn write_record(&mut self, record: &[u8]) -> Result<(), IndexError> {
        MultiMapWriter::write_record(self, record)
    }

    fn finish(&mut self) -> Result<(), IndexError> {
        MultiMapWriter::finish(self)
    }
}

/// Read side over the three finished byte regions.
pub struct MultiMap<B: AsRef<[u8]>> {
    fm: PrefixMap<B>,
    indices: B,
    value_len: usize,
    offset_len: usize,
    inline: bool,
}

impl<B: AsRef<[u8]>> MultiMap<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        page_len: usize,
        key_len: usize,
        value_len: usize,
        fastmap_prefix_len: usize,
        offset_len: usize,
        data: B,
        prefixes: B,
        indices: B,
    ) -> Result<Self, IndexError> {
        let inline = offset_len == value_len;
        let container_len = if inline { 2 * value_len } else { offset_len };
        let fm = PrefixMap::open(
            page_len,
            key_len,
            container_len,
            fastmap_prefix_len,
            data,
            prefixes,
        )?;
        Ok(MultiMap {
            fm,
            indices,
            value_len,
            offset_len,
            inline,
        })
    }

    /// Returns the raw value list for a key: `count * value_len` bytes
    /// borrowed from the underlying regions, or None on a miss.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<&[u8]>, IndexError> {
        let container = match self.fm.lookup(key)? {
            Some(container) => container,
            None => return Ok(None),
        };

        let offset = if self.inline {
            let (head, tail) = container.split_at(self.value_len);
            if head.iter().any(|byte| *byte != 0xFF) {
                // Inline container: the single value sits in the head.
                return Ok(Some(head));
            }
            read_le(&tail[..self.offset_len]) as usize
        } else {
            read_le(&container[..self.offset_len]) as usize
        };

        let indices = self.indices.as_ref();
        if offset >= indices.len() {
            return Err(IndexError::Corrupt("value list offset past file end"));
        }
        let (count, varint_len) =
            read_uvarint(&indices[offset..]).ok_or(IndexError::BadVarint)?;
        let start = offset + varint_len;
        let byte_len = (count as usize)
            .checked_mul(self.value_len)
            .ok_or(IndexError::Corrupt("value list count overflows"))?;
        let end = start
            .checked_add(byte_len)
            .ok_or(IndexError::Corrupt("value list count overflows"))?;
        if end > indices.len() {
            return Err(IndexError::Corrupt("value list runs past file end"));
        }
        Ok(Some(&indices[start..end]))
    }
}

#[cfg(test)]
mod test {
    use super::iter_values;
    use super::MultiMap;
    use super::MultiMapWriter;

    const PAGE: usize = 64;
    const KEY: usize = 4;
    const VALUE: usize = 2;
    const FASTMAP_PREFIX: usize = 2;

    struct Built {
        data: Vec<u8>,
        prefixes: Vec<u8>,
        indices: Vec<u8>,
    }

    fn build(offset_len: usize, records: &[(&[u8], u16)]) -> Built {
        let mut built = Built {
            data: Vec::new(),
            prefixes: Vec::new(),
            indices: Vec::new(),
        };
        let mut writer = MultiMapWriter::new(
            PAGE,
            KEY,
            VALUE,
            FASTMAP_PREFIX,
            offset_len,
            &mut built.data,
            &mut built.prefixes,
            &mut built.indices,
        )
        .unwrap();
        for (key, value) in records {
            let mut record = key.to_vec();
            record.extend_from_slice(&value.to_le_bytes());
            writer.write_record(&record).unwrap();
        }
        writer.finish().unwrap();
        built
    }

    fn open(built: &Built, offset_len: usize) -> MultiMap<&[u8]> {
        MultiMap::open(
            PAGE,
            KEY,
            VALUE,
            FASTMAP_PREFIX,
            offset_len,
            &built.data[..],
            &built.prefixes[..],
            &built.indices[..],
        )
        .unwrap()
    }

    fn values_of(map: &MultiMap<&[u8]>, key: &[u8]) -> Vec<u64> {
        map.lookup(key)
            .unwrap()
            .map(|list| iter_values(list, VALUE).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_inline_single_value() {
        let built = build(VALUE, &[(b"aaaa", 7)]);
        // One inline container, nothing out of line
        assert!(built.indices.is_empty());
        let map = open(&built, VALUE);
        assert_eq!(values_of(&map, b"aaaa"), vec![7]);
        assert_eq!(map.lookup(b"aaab").unwrap(), None);
    }

    #[test]
    fn test_indirect_list() {
        let built = build(VALUE, &[(b"aaaa", 7), (b"aaaa", 9), (b"aaaa", 300)]);
        // varint count 3 plus three 2-byte values
        assert_eq!(built.indices.len(), 1 + 3 * VALUE);
        let map = open(&built, VALUE);
        assert_eq!(values_of(&map, b"aaaa"), vec![7, 9, 300]);
    }

    #[test]
    fn test_duplicates_dropped() {
        let built = build(VALUE, &[(b"aaaa", 7), (b"aaaa", 7), (b"aaaa", 9)]);
        let map = open(&built, VALUE);
        assert_eq!(values_of(&map, b"aaaa"), vec![7, 9]);
    }

    #[test]
    fn test_all_ff_value_goes_out_of_line() {
        // 0xFFFF would collide with the indirect marker if inlined
        let built = build(VALUE, &[(b"aaaa", 0xFFFF)]);
        assert!(!built.indices.is_empty());
        let map = open(&built, VALUE);
        assert_eq!(values_of(&map, b"aaaa"), vec![0xFFFF]);
    }

    #[test]
    fn test_mixed_keys_and_buckets() {
        let built = build(
            VALUE,
            &[
                (b"aaaa", 1),
                (b"aaab", 2),
                (b"aaab", 3),
                (b"bbba", 4),
                (b"bbbb", 5),
                (b"bbbb", 6),
                (b"bbbb", 7),
            ],
        );
        let map = open(&built, VALUE);
        assert_eq!(values_of(&map, b"aaaa"), vec![1]);
        assert_eq!(values_of(&map, b"aaab"), vec![2, 3]);
        assert_eq!(values_of(&map, b"bbba"), vec![4]);
        assert_eq!(values_of(&map, b"bbbb"), vec![5, 6, 7]);
        assert_eq!(map.lookup(b"cccc").unwrap(), None);
    }

    #[test]
    fn test_without_inliner_everything_is_indirect() {
        // offset width 4 != value width 2, so no inlining
        let built = build(4, &[(b"aaaa", 1), (b"bbbb", 2), (b"bbbb", 3)]);
        assert_eq!(built.indices.len(), (1 + VALUE) + (1 + 2 * VALUE));
        let map = open(&built, 4);
        assert_eq!(values_of(&map, b"aaaa"), vec![1]);
        assert_eq!(values_of(&map, b"bbbb"), vec![2, 3]);
    }
}
