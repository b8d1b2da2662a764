// SPDX-License-Identifier: MIT

//! External-memory sorting of fixed-width records.
//!
//! The builder discovers address records in block order, but the map
//! writers need them sorted. Records are buffered up to a memory
//! limit, each full buffer is sorted and spilled as a run to a single
//! scratch file, and `finish` k-way merges the runs into the
//! downstream sink. Duplicates survive the sort; deduplication is the
//! sink's business.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::PathBuf;

use log::debug;

use crate::error::IndexError;

/// Where sorted records end up.
pub trait SortedSink {
    fn write_record(&mut self, record: &[u8]) -> Result<(), IndexError>;
    fn finish(&mut self) -> Result<(), IndexError>;
}

/// A streaming sorter for fixed-width records.
pub struct ExternalSorter<S: SortedSink> {
    sink: S,
    record_len: usize,
    mem_limit: usize,
    buffer: Vec<u8>,
    scratch_path: PathBuf,
    scratch: Option<File>,
    scratch_len: u64,
    runs: Vec<(u64, u64)>,
}

struct RunReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunReader {
    fn next_record(&mut self, record_len: usize) -> Result<Option<Vec<u8>>, IndexError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut record = vec![0u8; record_len];
        self.reader.read_exact(&mut record)?;
        self.remaining -= record_len as u64;
        Ok(Some(record))
    }
}

impl<S: SortedSink> ExternalSorter<S> {
    /// `mem_limit` caps the in-memory buffer in bytes; it is raised to
    /// hold at least one record.
    pub fn new(
        sink: S,
        record_len: usize,
        mem_limit: usize,
        scratch_path: PathBuf,
    ) -> Result<Self, IndexError> {
        if record_len == 0 {
            return Err(IndexError::Corrupt("record length must be non-zero"));
        }
        Ok(ExternalSorter {
            sink,
            record_len,
            mem_limit: mem_limit.max(record_len),
            buffer: Vec::new(),
            scratch_path,
            scratch: None,
            scratch_len: 0,
            runs: Vec::new(),
        })
    }

    pub fn push(&mut self, record: &[u8]) -> Result<(), IndexError> {
        if record.len() != self.record_len {
            return Err(IndexError::BadRecordLen {
                expected: self.record_len,
                got: record.len(),
            });
        }
        self.buffer.extend_from_slice(record);
        if self.buffer.len() >= self.mem_limit {
            self.spill()?;
        }
        Ok(())
    }

    fn sort_buffer(&mut self) {
        let sorted = {
            let mut rows: Vec<&[u8]> = self.buffer.chunks_exact(self.record_len).collect();
            rows.sort_unstable();
            let mut sorted = Vec::with_capacity(self.buffer.len());
            for row in rows {
                sorted.extend_from_slice(row);
            }
            sorted
        };
        self.buffer = sorted;
    }

    fn spill(&mut self) -> Result<(), IndexError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sort_buffer();
        if self.scratch.is_none() {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.scratch_path)?;
            self.scratch = Some(file);
        }
        let scratch = self.scratch.as_mut().expect("scratch was just created");
        let mut writer = BufWriter::new(&mut *scratch);
        writer.write_all(&self.buffer)?;
        writer.flush()?;
        drop(writer);

        let run = (self.scratch_len, self.buffer.len() as u64);
        self.scratch_len += self.buffer.len() as u64;
        self.runs.push(run);
        debug!(
            "spilled run {} of {} bytes to {}",
            self.runs.len(),
            run.1,
            self.scratch_path.display()
        );
        self.buffer.clear();
        Ok(())
    }

    /// Sorts whatever remains, merges all runs into the sink in
    /// ascending byte order, finishes the sink and deletes the
    /// scratch file.
    pub fn finish(mut self) -> Result<(), IndexError> {
        if self.runs.is_empty() {
            // Everything fit in memory.
            self.sort_buffer();
            let buffer = std::mem::take(&mut self.buffer);
            for record in buffer.chunks_exact(self.record_len) {
                self.sink.write_record(record)?;
            }
            return self.sink.finish();
        }

        self.spill()?;
        self.merge_runs()?;
        self.sink.finish()
    }

    fn merge_runs(&mut self) -> Result<(), IndexError> {
        let mut readers = Vec::with_capacity(self.runs.len());
        for (offset, len) in &self.runs {
            let mut file = File::open(&self.scratch_path)?;
            file.seek(SeekFrom::Start(*offset))?;
            readers.push(RunReader {
                reader: BufReader::new(file),
                remaining: *len,
            });
        }

        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (index, reader) in readers.iter_mut().enumerate() {
            if let Some(record) = reader.next_record(self.record_len)? {
                heap.push(Reverse((record, index)));
            }
        }

        while let Some(Reverse((record, index))) = heap.pop() {
            self.sink.write_record(&record)?;
            if let Some(next) = readers[index].next_record(self.record_len)? {
                heap.push(Reverse((next, index)));
            }
        }
        Ok(())
    }
}

impl<S: SortedSink> Drop for ExternalSorter<S> {
    fn drop(&mut self) {
        if self.scratch.take().is_some() {
            let _ = fs::remove_file(&self.scratch_path);
        }
    }
}
