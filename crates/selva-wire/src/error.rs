// SPDX-License-Identifier: MIT

use std::io;

use selva_chain::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("message of {len} bytes exceeds the cap of {max}")]
    MessageTooBig { len: u64, max: u64 },

    #[error("peer rejected our session: {0}")]
    Rejected(String),

    #[error("block does not extend the chain we asked for")]
    UnexpectedParent,

    #[error("block channel closed by the consumer")]
    ChannelClosed,
}

impl WireError {
    /// True when the peer simply hung up mid-stream, which the
    /// download loop treats as "reconnect and continue".
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            WireError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof
                || e.kind() == io::ErrorKind::ConnectionReset
        )
    }
}
