// SPDX-License-Identifier: MIT

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("bucket of {bucket} bytes exceeds the page size of {page_len}")]
    PageOverflow { bucket: usize, page_len: usize },

    #[error("records must arrive in ascending key order")]
    UnorderedKeys,

    #[error("record of {got} bytes, expected {expected}")]
    BadRecordLen { expected: usize, got: usize },

    #[error("value list offset no longer fits the configured offset width")]
    OffsetOverflow,

    #[error("corrupt index: {0}")]
    Corrupt(&'static str),

    #[error("bad varint in value list")]
    BadVarint,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
