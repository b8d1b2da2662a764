// SPDX-License-Identifier: MIT

//! Client-side validation of an archived header stream.
//!
//! The archive stores one 48-byte record per block (nonce, timestamp,
//! Merkle root); parent ids are implied by position. A client rebuilds
//! the full header chain from genesis and checks each timestamp
//! against the median of the preceding window and against its local
//! clock.

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::deserialize;
use crate::params::ChainParams;
use crate::types::ArchivedHeader;
use crate::types::BlockHeader;

#[derive(Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// Stream length is not a multiple of the record size.
    TruncatedStream,
    /// The stream holds no headers at all.
    EmptyStream,
    /// The first record does not reproduce the genesis header.
    BadGenesis,
    /// Header at `height` is earlier than the median of its window.
    EarlyTimestamp { height: usize },
    /// Header at `height` is too far past the local clock.
    FutureTimestamp { height: usize },
    /// Header at `height` is absurdly far past the local clock.
    ExtremeFutureTimestamp { height: usize },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::TruncatedStream => {
                write!(f, "header stream length is not a multiple of 48")
            }
            HeaderError::EmptyStream => write!(f, "header stream is empty"),
            HeaderError::BadGenesis => write!(f, "first header does not match genesis"),
            HeaderError::EarlyTimestamp { height } => {
                write!(f, "header {height} is earlier than its median window")
            }
            HeaderError::FutureTimestamp { height } => {
                write!(f, "header {height} is in the near future")
            }
            HeaderError::ExtremeFutureTimestamp { height } => {
                write!(f, "header {height} is in the extreme future")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

/// Rebuilds the header chain from a raw stream. The first record must
/// belong to the genesis block; every later parent id is the id of the
/// previous rebuilt header.
pub fn parse_headers(
    bytes: &[u8],
    params: &ChainParams,
) -> Result<Vec<BlockHeader>, HeaderError> {
    if bytes.len() % ArchivedHeader::ENCODED_LEN != 0 {
        return Err(HeaderError::TruncatedStream);
    }
    let count = bytes.len() / ArchivedHeader::ENCODED_LEN;
    if count == 0 {
        return Err(HeaderError::EmptyStream);
    }

    let genesis = params.genesis_block().header();
    let mut headers = Vec::with_capacity(count);
    headers.push(genesis);

    for record in bytes.chunks_exact(ArchivedHeader::ENCODED_LEN).skip(1) {
        let archived: ArchivedHeader =
            deserialize(record).map_err(|_| HeaderError::TruncatedStream)?;
        let parent_id = headers
            .last()
            .expect("headers always holds genesis")
            .id();
        headers.push(BlockHeader {
            parent_id,
            nonce: archived.nonce,
            timestamp: archived.timestamp,
            merkle_root: archived.merkle_root,
        });
    }

    // The first stored record is the genesis block's own; if rebuilding
    // it from constants doesn't match what the stream claims, the
    // stream belongs to another network.
    let stored: ArchivedHeader = deserialize(&bytes[..ArchivedHeader::ENCODED_LEN])
        .map_err(|_| HeaderError::TruncatedStream)?;
    if stored.timestamp != genesis.timestamp || stored.merkle_root != genesis.merkle_root {
        return Err(HeaderError::BadGenesis);
    }

    Ok(headers)
}

/// Checks one header against the minimum acceptable timestamp and the
/// local clock.
fn verify_header(
    header: &BlockHeader,
    height: usize,
    min_timestamp: u64,
    params: &ChainParams,
    now: u64,
) -> Result<(), HeaderError> {
    if header.timestamp < min_timestamp {
        return Err(HeaderError::EarlyTimestamp { height });
    }
    // The extreme check runs first: a block that far out will never
    // join the longest chain, a merely-future one might.
    if header.timestamp > now + params.extreme_future_threshold {
        return Err(HeaderError::ExtremeFutureTimestamp { height });
    }
    if header.timestamp > now + params.future_threshold {
        return Err(HeaderError::FutureTimestamp { height });
    }
    Ok(())
}

/// The earliest timestamp a child of `headers[height]` may carry: the
/// median of the trailing window, padded with the oldest available
/// value near genesis.
fn minimum_child_timestamp(headers: &[BlockHeader], height: usize, window: usize) -> u64 {
    let mut timestamps = Vec::with_capacity(window);
    timestamps.push(headers[height].timestamp);
    for offset in 1..window {
        let value = if height >= offset {
            headers[height - offset].timestamp
        } else {
            *timestamps.last().expect("timestamps is never empty")
        };
        timestamps.push(value);
    }
    timestamps.sort_unstable();
    timestamps[timestamps.len() / 2]
}

/// Validates a rebuilt header chain. `now` is the caller's clock as a
/// unix timestamp.
pub fn verify_headers(
    headers: &[BlockHeader],
    params: &ChainParams,
    now: u64,
) -> Result<(), HeaderError> {
    if headers.is_empty() {
        return Err(HeaderError::EmptyStream);
    }
    let mut min_timestamp = headers[0].timestamp;
    for (height, header) in headers.iter().enumerate() {
        verify_header(header, height, min_timestamp, params, now)?;
        min_timestamp = minimum_child_timestamp(headers, height, params.median_timestamp_window);
    }
    Ok(())
}

/// Parses and validates a raw header stream against the current clock.
pub fn verify_header_stream(bytes: &[u8], params: &ChainParams) -> Result<(), HeaderError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let headers = parse_headers(bytes, params)?;
    verify_headers(&headers, params, now)
}

#[cfg(test)]
mod test {
    use super::parse_headers;
    use super::verify_headers;
    use super::HeaderError;
    use crate::params::ChainParams;
    use crate::serialize;
    use crate::types::ArchivedHeader;
    use crate::types::Block;
    use crate::types::BlockHeader;

    fn build_chain(params: &ChainParams, step: u64, count: usize) -> (Vec<u8>, Vec<BlockHeader>) {
        let mut blocks = vec![params.genesis_block()];
        for i in 1..count {
            blocks.push(Block {
                parent_id: blocks[i - 1].id(),
                nonce: [i as u8; 8],
                timestamp: params.genesis_timestamp + step * i as u64,
                miner_payouts: Vec::new(),
                transactions: Vec::new(),
            });
        }
        let mut stream = Vec::new();
        for block in &blocks {
            stream.extend_from_slice(&serialize(&block.archived_header()));
        }
        let headers = blocks.iter().map(|b| b.header()).collect();
        (stream, headers)
    }

    #[test]
    fn test_parse_rebuilds_parent_links() {
        let params = ChainParams::mainnet();
        let (stream, expected) = build_chain(&params, 600, 20);
        let parsed = parse_headers(&stream, &params).unwrap();
        assert_eq!(parsed.len(), 20);
        for (got, want) in parsed.iter().zip(expected.iter()) {
            assert_eq!(got.parent_id, want.parent_id);
            assert_eq!(got.id(), want.id());
        }
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        let params = ChainParams::mainnet();
        let (mut stream, _) = build_chain(&params, 600, 3);
        stream.pop();
        assert_eq!(
            parse_headers(&stream, &params),
            Err(HeaderError::TruncatedStream)
        );
    }

    #[test]
    fn test_parse_rejects_foreign_genesis() {
        let params = ChainParams::mainnet();
        let bogus = ArchivedHeader {
            nonce: [0; 8],
            timestamp: params.genesis_timestamp + 1,
            merkle_root: params.genesis_block().merkle_root(),
        };
        let stream = serialize(&bogus);
        assert_eq!(parse_headers(&stream, &params), Err(HeaderError::BadGenesis));
    }

    #[test]
    fn test_verify_accepts_steady_chain() {
        let params = ChainParams::mainnet();
        let (stream, _) = build_chain(&params, 600, 50);
        let headers = parse_headers(&stream, &params).unwrap();
        let now = params.genesis_timestamp + 600 * 50;
        assert_eq!(verify_headers(&headers, &params, now), Ok(()));
    }

    #[test]
    fn test_verify_rejects_early_timestamp() {
        let params = ChainParams::mainnet();
        let (stream, _) = build_chain(&params, 600, 30);
        let mut headers = parse_headers(&stream, &params).unwrap();
        // Drag one timestamp far behind its window's median
        headers[20].timestamp = params.genesis_timestamp;
        let now = params.genesis_timestamp + 600 * 30;
        assert_eq!(
            verify_headers(&headers, &params, now),
            Err(HeaderError::EarlyTimestamp { height: 20 })
        );
    }

    #[test]
    fn test_verify_rejects_future_timestamps() {
        let params = ChainParams::mainnet();
        let (stream, _) = build_chain(&params, 600, 5);
        let mut headers = parse_headers(&stream, &params).unwrap();
        let now = params.genesis_timestamp + 600 * 5;

        headers[4].timestamp = now + params.future_threshold + 1;
        assert_eq!(
            verify_headers(&headers, &params, now),
            Err(HeaderError::FutureTimestamp { height: 4 })
        );

        headers[4].timestamp = now + params.extreme_future_threshold + 1;
        assert_eq!(
            verify_headers(&headers, &params, now),
            Err(HeaderError::ExtremeFutureTimestamp { height: 4 })
        );
    }
}
