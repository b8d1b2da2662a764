// SPDX-License-Identifier: MIT

//! The selva ledger data model.
//!
//! This crate defines the block, payout and transaction types, the
//! canonical byte codec both sides of the archive agree on, the
//! domain-separated Merkle trees used for per-block inclusion proofs,
//! and the block-header timestamp validation clients run over a header
//! stream.

pub mod encoding;
pub mod headers;
pub mod merkle;
pub mod params;
pub mod types;

pub use encoding::deserialize;
pub use encoding::serialize;
pub use encoding::CodecError;
pub use encoding::Decodable;
pub use encoding::Encodable;
pub use headers::HeaderError;
pub use merkle::MerkleProof;
pub use params::ChainParams;
pub use types::Block;
pub use types::BlockHeader;
pub use types::Transaction;
pub use types::UnlockHash;
