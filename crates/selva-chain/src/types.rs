// SPDX-License-Identifier: MIT

//! Blocks, payouts and transactions.
//!
//! Addresses are 32-byte unlock hashes. Every type carries the
//! canonical codec, because Merkle leaves and block ids are computed
//! over these exact bytes.

use std::fmt;
use std::io;
use std::io::Read;
use std::io::Write;

use selva_common::Hash;

use crate::encoding::Bytes;
use crate::encoding::CodecError;
use crate::encoding::Decodable;
use crate::encoding::Encodable;
use crate::merkle;
use crate::serialize;

/// Length of a full address (an unlock hash) in bytes.
pub const UNLOCK_HASH_SIZE: usize = 32;

/// A 16-byte tag naming a signature algorithm, zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Specifier(pub [u8; 16]);

impl Specifier {
    /// Builds a specifier from a short ASCII name, e.g. `"ed25519"`.
    pub fn new(name: &str) -> Self {
        let mut out = [0u8; 16];
        let take = name.len().min(16);
        out[..take].copy_from_slice(&name.as_bytes()[..take]);
        Specifier(out)
    }
}

impl Encodable for Specifier {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Specifier {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Specifier(<[u8; 16]>::consensus_decode(reader)?))
    }
}

/// The address form of an output or a set of unlock conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnlockHash(pub Hash);

impl UnlockHash {
    pub fn as_bytes(&self) -> &[u8; UNLOCK_HASH_SIZE] {
        self.0.as_bytes()
    }
}

impl fmt::Display for UnlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Encodable for Hash {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Hash {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Hash(<[u8; 32]>::consensus_decode(reader)?))
    }
}

impl Encodable for UnlockHash {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for UnlockHash {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(UnlockHash(Hash::consensus_decode(reader)?))
    }
}

/// An amount of currency. Encoded as a length-prefixed minimal
/// big-endian magnitude, so zero is zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Currency(pub u128);

impl Encodable for Currency {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let bytes = self.0.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let magnitude = &bytes[skip..];
        let written = (magnitude.len() as u64).consensus_encode(writer)?;
        writer.write_all(magnitude)?;
        Ok(written + magnitude.len())
    }
}

impl Decodable for Currency {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let len = u64::consensus_decode(reader)?;
        if len > 16 {
            return Err(CodecError::OversizedCurrency(len));
        }
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf[16 - len as usize..])?;
        Ok(Currency(u128::from_be_bytes(buf)))
    }
}

/// A public key with its algorithm tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicKey {
    pub algorithm: Specifier,
    pub key: Bytes,
}

/// The spend policy of an output: after `timelock`, any
/// `signatures_required` of the listed keys may spend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnlockConditions {
    pub timelock: u64,
    pub public_keys: Vec<PublicKey>,
    pub signatures_required: u64,
}

impl UnlockConditions {
    /// The address these conditions answer to: the Merkle root over the
    /// timelock leaf, one leaf per key, and the signature-count leaf.
    pub fn unlock_hash(&self) -> UnlockHash {
        let mut leaves = Vec::with_capacity(self.public_keys.len() + 2);
        leaves.push(merkle::leaf_hash(&serialize(&self.timelock)));
        for key in &self.public_keys {
            leaves.push(merkle::leaf_hash(&serialize(key)));
        }
        leaves.push(merkle::leaf_hash(&serialize(&self.signatures_required)));
        UnlockHash(merkle::root_from_leaves(&leaves))
    }
}

/// A volume-currency output payable to an address. Miner payouts are
/// exactly this shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiacoinOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

/// A share-token output. `claim_start` records the accumulated pool at
/// transfer time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiafundOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
    pub claim_start: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiacoinInput {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiafundInput {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
    pub claim_unlock_hash: UnlockHash,
}

/// A storage agreement. Payouts branch on whether the host proves
/// possession inside the window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash,
    pub window_start: u64,
    pub window_end: u64,
    pub payout: Currency,
    pub valid_proof_outputs: Vec<SiacoinOutput>,
    pub missed_proof_outputs: Vec<SiacoinOutput>,
    pub unlock_hash: UnlockHash,
    pub revision_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContractRevision {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
    pub new_revision_number: u64,
    pub new_file_size: u64,
    pub new_file_merkle_root: Hash,
    pub new_window_start: u64,
    pub new_window_end: u64,
    pub new_valid_proof_outputs: Vec<SiacoinOutput>,
    pub new_missed_proof_outputs: Vec<SiacoinOutput>,
    pub new_unlock_hash: UnlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionSignature {
    pub parent_id: Hash,
    pub public_key_index: u64,
    pub timelock: u64,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub siacoin_inputs: Vec<SiacoinInput>,
    pub siacoin_outputs: Vec<SiacoinOutput>,
    pub file_contracts: Vec<FileContract>,
    pub file_contract_revisions: Vec<FileContractRevision>,
    pub siafund_inputs: Vec<SiafundInput>,
    pub siafund_outputs: Vec<SiafundOutput>,
    pub miner_fees: Vec<Currency>,
    pub arbitrary_data: Vec<Bytes>,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    /// Every address this transaction mentions, in encoding order:
    /// input unlock-condition hashes, output addresses, then the
    /// contingent payout addresses of contracts and revisions. May
    /// yield the same address more than once.
    pub fn covered_addresses(&self) -> impl Iterator<Item = UnlockHash> + '_ {
        self.siacoin_inputs
            .iter()
            .map(|input| input.unlock_conditions.unlock_hash())
            .chain(
                self.siafund_inputs
                    .iter()
                    .map(|input| input.unlock_conditions.unlock_hash()),
            )
            .chain(self.siacoin_outputs.iter().map(|output| output.unlock_hash))
            .chain(self.siafund_outputs.iter().map(|output| output.unlock_hash))
            .chain(self.file_contracts.iter().flat_map(|contract| {
                contract
                    .valid_proof_outputs
                    .iter()
                    .chain(contract.missed_proof_outputs.iter())
                    .map(|output| output.unlock_hash)
            }))
            .chain(self.file_contract_revisions.iter().flat_map(|revision| {
                revision
                    .new_valid_proof_outputs
                    .iter()
                    .chain(revision.new_missed_proof_outputs.iter())
                    .map(|output| output.unlock_hash)
            }))
    }
}

/// The full header of a block. Block ids are the hash of this encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub parent_id: Hash,
    pub nonce: [u8; 8],
    pub timestamp: u64,
    pub merkle_root: Hash,
}

impl BlockHeader {
    pub fn id(&self) -> Hash {
        selva_common::hash256(&serialize(self))
    }
}

/// The 48-byte header record the archive stores per block: nonce,
/// timestamp, Merkle root. Parent ids are reconstructed by chaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchivedHeader {
    pub nonce: [u8; 8],
    pub timestamp: u64,
    pub merkle_root: Hash,
}

impl ArchivedHeader {
    /// Encoded size of one record.
    pub const ENCODED_LEN: usize = 48;
}

/// A full block: header fields plus the payouts and transactions whose
/// leaf hashes make up the block's Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub parent_id: Hash,
    pub nonce: [u8; 8],
    pub timestamp: u64,
    pub miner_payouts: Vec<SiacoinOutput>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The root of the tree whose leaves are the payouts followed by
    /// the transactions, each hashed over its canonical encoding.
    pub fn merkle_root(&self) -> Hash {
        let mut leaves = Vec::with_capacity(self.miner_payouts.len() + self.transactions.len());
        for payout in &self.miner_payouts {
            leaves.push(merkle::leaf_hash(&serialize(payout)));
        }
        for tx in &self.transactions {
            leaves.push(merkle::leaf_hash(&serialize(tx)));
        }
        merkle::root_from_leaves(&leaves)
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            parent_id: self.parent_id,
            nonce: self.nonce,
            timestamp: self.timestamp,
            merkle_root: self.merkle_root(),
        }
    }

    pub fn id(&self) -> Hash {
        self.header().id()
    }

    pub fn archived_header(&self) -> ArchivedHeader {
        ArchivedHeader {
            nonce: self.nonce,
            timestamp: self.timestamp,
            merkle_root: self.merkle_root(),
        }
    }
}

/// Generates the struct codec impls: fields encode back to back in
/// declaration order.
macro_rules! impl_codec_for_struct {
    ($struct_name:ident, $($field:ident),+ $(,)?) => {
        impl Encodable for $struct_name {
            fn consensus_encode<W: Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> Result<usize, io::Error> {
                let mut written = 0;
                $(written += self.$field.consensus_encode(writer)?;)+
                Ok(written)
            }
        }

        impl Decodable for $struct_name {
            fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
                Ok($struct_name {
                    $($field: Decodable::consensus_decode(reader)?,)+
                })
            }
        }
    };
}

impl_codec_for_struct!(PublicKey, algorithm, key);
impl_codec_for_struct!(UnlockConditions, timelock, public_keys, signatures_required);
impl_codec_for_struct!(SiacoinOutput, value, unlock_hash);
impl_codec_for_struct!(SiafundOutput, value, unlock_hash, claim_start);
impl_codec_for_struct!(SiacoinInput, parent_id, unlock_conditions);
impl_codec_for_struct!(SiafundInput, parent_id, unlock_conditions, claim_unlock_hash);
impl_codec_for_struct!(
    FileContract,
    file_size,
    file_merkle_root,
    window_start,
    window_end,
    payout,
    valid_proof_outputs,
    missed_proof_outputs,
    unlock_hash,
    revision_number,
);
impl_codec_for_struct!(
    FileContractRevision,
    parent_id,
    unlock_conditions,
    new_revision_number,
    new_file_size,
    new_file_merkle_root,
    new_window_start,
    new_window_end,
    new_valid_proof_outputs,
    new_missed_proof_outputs,
    new_unlock_hash,
);
impl_codec_for_struct!(
    TransactionSignature,
    parent_id,
    public_key_index,
    timelock,
    signature,
);
impl_codec_for_struct!(
    Transaction,
    siacoin_inputs,
    siacoin_outputs,
    file_contracts,
    file_contract_revisions,
    siafund_inputs,
    siafund_outputs,
    miner_fees,
    arbitrary_data,
    signatures,
);
impl_codec_for_struct!(BlockHeader, parent_id, nonce, timestamp, merkle_root);
impl_codec_for_struct!(ArchivedHeader, nonce, timestamp, merkle_root);
impl_codec_for_struct!(
    Block,
    parent_id,
    nonce,
    timestamp,
    miner_payouts,
    transactions,
);
