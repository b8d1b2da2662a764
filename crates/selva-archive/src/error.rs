// SPDX-License-Identifier: MIT

use std::io;

use selva_chain::CodecError;
use selva_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt bundle: {0}")]
    CorruptBundle(&'static str),

    #[error("item index out of range")]
    TooLargeIndex,

    #[error("{value} does not fit in {len} bytes; increase {field}")]
    BuildOverflow {
        field: &'static str,
        value: u64,
        len: usize,
    },

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("compression error: {0}")]
    Compression(#[from] snap::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
