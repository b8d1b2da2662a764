// SPDX-License-Identifier: MIT

//! A static map from fixed-length keys to fixed-length values.
//!
//! Records live in `data` as `key ‖ value` rows, grouped into buckets
//! by the first `prefix_len` bytes of the key. Every non-empty bucket
//! owns exactly one `page_len`-byte page (the writer fails the build
//! if a bucket outgrows the page), zero-padded past its rows. The
//! `prefixes` file describes the buckets in order: each fixed-width
//! entry is the bucket's prefix followed by the cumulative row count
//! through that bucket, so a reader can find a bucket's page by its
//! entry position and its row count from the deltas.
//!
//! Lookups read only the bucket's page and never allocate.

use std::io::Write;

use crate::error::IndexError;

/// Width of the cumulative row counter in a prefixes entry.
const COUNT_LEN: usize = 4;

fn check_geometry(
    page_len: usize,
    key_len: usize,
    value_len: usize,
    prefix_len: usize,
) -> Result<(), IndexError> {
    if key_len == 0 || value_len == 0 {
        return Err(IndexError::Corrupt("key and value must be non-empty"));
    }
    if prefix_len == 0 || prefix_len > key_len {
        return Err(IndexError::Corrupt("prefix must be within the key"));
    }
    if page_len < key_len + value_len {
        return Err(IndexError::Corrupt("page cannot hold a single record"));
    }
    Ok(())
}

/// Streaming writer. Records must arrive in ascending byte order of
/// the full key, one record per key.
pub struct PrefixMapWriter<W: Write> {
    data: W,
    prefixes: W,
    page_len: usize,
    key_len: usize,
    value_len: usize,
    prefix_len: usize,
    page: Vec<u8>,
    current_prefix: Vec<u8>,
    last_key: Vec<u8>,
    rows_total: u64,
    in_bucket: bool,
}

impl<W: Write> PrefixMapWriter<W> {
    pub fn new(
        page_len: usize,
        key_len: usize,
        value_len: usize,
        prefix_len: usize,
        data: W,
        prefixes: W,
    ) -> Result<Self, IndexError> {
        check_geometry(page_len, key_len, value_len, prefix_len)?;
        Ok(PrefixMapWriter {
            data,
            prefixes,
            page_len,
            key_len,
            value_len,
            prefix_len,
            page: Vec::with_capacity(page_len),
            current_prefix: Vec::with_capacity(prefix_len),
            last_key: Vec::new(),
            rows_total: 0,
            in_bucket: false,
        })
    }

    fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    pub fn push(&mut self, record: &[u8]) -> Result<(), IndexError> {
        if record.len() != self.record_len() {
            return Err(IndexError::BadRecordLen {
                expected: self.record_len(),
                got: record.len(),
            });
        }
        let key = &record[..self.key_len];
        if !self.last_key.is_empty() && key <= self.last_key.as_slice() {
            return Err(IndexError::UnorderedKeys);
        }

        let prefix = &key[..self.prefix_len];
        if !self.in_bucket || prefix != self.current_prefix.as_slice() {
            self.flush_bucket()?;
            self.current_prefix.clear();
            self.current_prefix.extend_from_slice(prefix);
            self.in_bucket = true;
        }

        self.page.extend_from_slice(record);
        if self.page.len() > self.page_len {
            return Err(IndexError::PageOverflow {
                bucket: self.page.len(),
                page_len: self.page_len,
            });
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    fn flush_bucket(&mut self) -> Result<(), IndexError> {
        if !self.in_bucket {
            return Ok(());
        }
        let rows = self.page.len() / self.record_len();
        self.rows_total += rows as u64;
        let cumulative =
            u32::try_from(self.rows_total).map_err(|_| IndexError::OffsetOverflow)?;

        self.page.resize(self.page_len, 0);
        self.data.write_all(&self.page)?;
        self.prefixes.write_all(&self.current_prefix)?;
        self.prefixes.write_all(&cumulative.to_le_bytes())?;

        self.page.clear();
        self.in_bucket = false;
        Ok(())
    }

    /// Writes the trailing bucket and flushes both streams.
    pub fn finish(&mut self) -> Result<(), IndexError> {
        self.flush_bucket()?;
        self.data.flush()?;
        self.prefixes.flush()?;
        Ok(())
    }
}

/// Read side over the two finished byte regions, typically memory
/// maps.
pub struct PrefixMap<B: AsRef<[u8]>> {
    data: B,
    prefixes: B,
    page_len: usize,
    key_len: usize,
    value_len: usize,
    prefix_len: usize,
    buckets: usize,
}

impl<B: AsRef<[u8]>> PrefixMap<B> {
    pub fn open(
        page_len: usize,
        key_len: usize,
        value_len: usize,
        prefix_len: usize,
        data: B,
        prefixes: B,
    ) -> Result<Self, IndexError> {
        check_geometry(page_len, key_len, value_len, prefix_len)?;
        let entry_len = prefix_len + COUNT_LEN;
        let prefixes_len = prefixes.as_ref().len();
        if prefixes_len % entry_len != 0 {
            return Err(IndexError::Corrupt("prefixes length is not a whole entry"));
        }
        let buckets = prefixes_len / entry_len;
        if data.as_ref().len() != buckets * page_len {
            return Err(IndexError::Corrupt("data length does not match bucket count"));
        }
        Ok(PrefixMap {
            data,
            prefixes,
            page_len,
            key_len,
            value_len,
            prefix_len,
            buckets,
        })
    }

    fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    fn entry_len(&self) -> usize {
        self.prefix_len + COUNT_LEN
    }

    fn entry_prefix(&self, bucket: usize) -> &[u8] {
        let start = bucket * self.entry_len();
        &self.prefixes.as_ref()[start..start + self.prefix_len]
    }

    fn entry_cumulative(&self, bucket: usize) -> u32 {
        let start = bucket * self.entry_len() + self.prefix_len;
        let bytes: [u8; COUNT_LEN] = self.prefixes.as_ref()[start..start + COUNT_LEN]
            .try_into()
            .expect("entry bounds already checked");
        u32::from_le_bytes(bytes)
    }

    /// Looks up a full key. Returns the value bytes, or None if the
    /// key is absent.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<&[u8]>, IndexError> {
        if key.len() != self.key_len {
            return Err(IndexError::BadRecordLen {
                expected: self.key_len,
                got: key.len(),
            });
        }
        let prefix = &key[..self.prefix_len];

        // Find the bucket by its prefix.
        let mut lo = 0usize;
        let mut hi = self.buckets;
        let bucket = loop {
            if lo >= hi {
                return Ok(None);
            }
            let mid = lo + (hi - lo) / 2;
            match self.entry_prefix(mid).cmp(prefix) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => break mid,
            }
        };

        let rows_end = self.entry_cumulative(bucket) as usize;
        let rows_start = if bucket == 0 {
            0
        } else {
            self.entry_cumulative(bucket - 1) as usize
        };
        if rows_end < rows_start {
            return Err(IndexError::Corrupt("cumulative row counts decrease"));
        }
        let rows = rows_end - rows_start;
        if rows * self.record_len() > self.page_len {
            return Err(IndexError::Corrupt("bucket row count exceeds its page"));
        }

        let page = &self.data.as_ref()[bucket * self.page_len..(bucket + 1) * self.page_len];

        // Binary search the rows inside the page.
        let record_len = self.record_len();
        let mut lo = 0usize;
        let mut hi = rows;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let row = &page[mid * record_len..(mid + 1) * record_len];
            match row[..self.key_len].cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return Ok(Some(&row[self.key_len..]));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::PrefixMap;
    use super::PrefixMapWriter;
    use crate::error::IndexError;

    const PAGE: usize = 32;
    const KEY: usize = 4;
    const VALUE: usize = 2;
    const PREFIX: usize = 2;

    fn build(records: &[(&[u8], &[u8])]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::new();
        let mut prefixes = Vec::new();
        let mut writer =
            PrefixMapWriter::new(PAGE, KEY, VALUE, PREFIX, &mut data, &mut prefixes).unwrap();
        for (key, value) in records {
            let mut record = key.to_vec();
            record.extend_from_slice(value);
            writer.push(&record).unwrap();
        }
        writer.finish().unwrap();
        (data, prefixes)
    }

    #[test]
    fn test_build_and_lookup() {
        let (data, prefixes) = build(&[
            (b"aaaa", b"01"),
            (b"aaab", b"02"),
            (b"aaba", b"03"),
            (b"bbbb", b"04"),
        ]);
        // Two buckets: "aa" with three rows, "bb" with one
        assert_eq!(data.len(), 2 * PAGE);
        assert_eq!(prefixes.len(), 2 * (PREFIX + 4));

        let map = PrefixMap::open(PAGE, KEY, VALUE, PREFIX, &data[..], &prefixes[..]).unwrap();
        assert_eq!(map.lookup(b"aaaa").unwrap(), Some(&b"01"[..]));
        assert_eq!(map.lookup(b"aaab").unwrap(), Some(&b"02"[..]));
        assert_eq!(map.lookup(b"aaba").unwrap(), Some(&b"03"[..]));
        assert_eq!(map.lookup(b"bbbb").unwrap(), Some(&b"04"[..]));
        assert_eq!(map.lookup(b"aabb").unwrap(), None);
        assert_eq!(map.lookup(b"cccc").unwrap(), None);
    }

    #[test]
    fn test_empty_map() {
        let (data, prefixes) = build(&[]);
        assert!(data.is_empty());
        assert!(prefixes.is_empty());
        let map = PrefixMap::open(PAGE, KEY, VALUE, PREFIX, &data[..], &prefixes[..]).unwrap();
        assert_eq!(map.lookup(b"aaaa").unwrap(), None);
    }

    #[test]
    fn test_unordered_input_rejected() {
        let mut data = Vec::new();
        let mut prefixes = Vec::new();
        let mut writer =
            PrefixMapWriter::new(PAGE, KEY, VALUE, PREFIX, &mut data, &mut prefixes).unwrap();
        writer.push(b"bbbb01").unwrap();
        assert!(matches!(
            writer.push(b"aaaa02"),
            Err(IndexError::UnorderedKeys)
        ));
        // A repeated key is unordered too
        assert!(matches!(
            writer.push(b"bbbb03"),
            Err(IndexError::UnorderedKeys)
        ));
    }

    #[test]
    fn test_page_overflow() {
        let mut data = Vec::new();
        let mut prefixes = Vec::new();
        let mut writer =
            PrefixMapWriter::new(PAGE, KEY, VALUE, PREFIX, &mut data, &mut prefixes).unwrap();
        // 6-byte records, 32-byte page: the sixth record of one bucket
        // exceeds the page.
        for i in 0u8..5 {
            let record = [b'a', b'a', b'0' + i, b'x', 0, i];
            writer.push(&record).unwrap();
        }
        let record = [b'a', b'a', b'5', b'x', 0, 5];
        assert!(matches!(
            writer.push(&record),
            Err(IndexError::PageOverflow { .. })
        ));
    }

    #[test]
    fn test_corrupt_lengths_rejected() {
        let (data, prefixes) = build(&[(b"aaaa", b"01")]);
        assert!(PrefixMap::open(PAGE, KEY, VALUE, PREFIX, &data[..1], &prefixes[..]).is_err());
        assert!(PrefixMap::open(PAGE, KEY, VALUE, PREFIX, &data[..], &prefixes[..3]).is_err());
    }

    #[test]
    fn test_wrong_key_length() {
        let (data, prefixes) = build(&[(b"aaaa", b"01")]);
        let map = PrefixMap::open(PAGE, KEY, VALUE, PREFIX, &data[..], &prefixes[..]).unwrap();
        assert!(matches!(
            map.lookup(b"aaa"),
            Err(IndexError::BadRecordLen { .. })
        ));
    }
}
