// SPDX-License-Identifier: MIT

//! The online query phase.
//!
//! A [Server] memory-maps a finished bundle and answers two questions:
//! which items mention an address, and what exactly is item `i`. All
//! state is immutable after open; every query runs over the read-only
//! maps with stack-local scratch, so `&self` methods may be called
//! from any number of threads.

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use log::info;
use memmap2::Mmap;
use selva_chain::merkle::MerkleProof;
use selva_chain::types::UNLOCK_HASH_SIZE;
use selva_common::hash::HASH_SIZE;
use selva_common::read_le;
use selva_common::Hash;
use selva_index::multimap::iter_values;
use selva_index::MultiMap;

use crate::error::ArchiveError;
use crate::params;
use crate::params::Parameters;

/// How many history entries one `get_history` call returns before
/// handing back a continuation cursor.
pub const MAX_HISTORY_SIZE: usize = 2;

/// How an item's payload is stored in the `blockchain` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Miner payouts are stored raw.
    None,
    /// Transactions are snappy-compressed.
    Snappy,
}

/// One ledger item, borrowed out of the server's memory maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<'a> {
    /// The stored payload: the canonical encoding, compressed per
    /// `compression`. A zero-copy slice into the mapped bundle.
    pub data: &'a [u8],
    pub compression: Compression,
    /// Which block holds this item.
    pub block: usize,
    /// Position of the item's leaf within its block.
    pub index_in_block: usize,
    /// Leaf count of the block's Merkle tree.
    pub num_leaves: usize,
    pub num_miner_payouts: usize,
    /// Concatenated sibling hashes proving the leaf, deepest first.
    pub merkle_proof: Vec<u8>,
}

/// An [Item] that owns its payload and may outlive the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedItem {
    pub data: Vec<u8>,
    pub compression: Compression,
    pub block: usize,
    pub index_in_block: usize,
    pub num_leaves: usize,
    pub num_miner_payouts: usize,
    pub merkle_proof: Vec<u8>,
}

impl Item<'_> {
    pub fn into_owned(self) -> OwnedItem {
        OwnedItem {
            data: self.data.to_vec(),
            compression: self.compression,
            block: self.block,
            index_in_block: self.index_in_block,
            num_leaves: self.num_leaves,
            num_miner_payouts: self.num_miner_payouts,
            merkle_proof: self.merkle_proof,
        }
    }

    /// The canonical item encoding, decompressed if needed.
    pub fn decode_payload(&self) -> Result<Vec<u8>, ArchiveError> {
        match self.compression {
            Compression::None => Ok(self.data.to_vec()),
            Compression::Snappy => {
                Ok(snap::raw::Decoder::new().decompress_vec(self.data)?)
            }
        }
    }
}

/// A read-only mapping of one bundle file. Zero-length files get an
/// empty region instead of a map, which mmap would refuse.
struct Region(Option<Mmap>);

impl Region {
    fn map(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Region(None));
        }
        let map = unsafe { Mmap::map(&file)? };
        Ok(Region(Some(map)))
    }
}

impl AsRef<[u8]> for Region {
    fn as_ref(&self) -> &[u8] {
        match &self.0 {
            Some(map) => &map[..],
            None => &[],
        }
    }
}

pub struct Server {
    params: Parameters,
    blockchain: Region,
    offsets: Region,
    block_locations: Region,
    leaves_hashes: Region,
    address_map: MultiMap<Region>,
    nblocks: usize,
    nitems: usize,
}

impl Server {
    /// Opens a bundle directory: reads `parameters.json`, maps every
    /// binary file and validates the geometry.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let dir = dir.into();

        let parameters_file = File::open(dir.join(params::PARAMETERS_FILE))?;
        let parameters: Parameters = serde_json::from_reader(parameters_file)?;
        parameters.validate()?;

        let blockchain = Region::map(&dir.join(params::BLOCKCHAIN_FILE))?;
        let offsets = Region::map(&dir.join(params::OFFSETS_FILE))?;
        let block_locations = Region::map(&dir.join(params::BLOCK_LOCATIONS_FILE))?;
        let leaves_hashes = Region::map(&dir.join(params::LEAVES_HASHES_FILE))?;
        let fastmap_data = Region::map(&dir.join(params::ADDRESSES_FASTMAP_DATA_FILE))?;
        let fastmap_prefixes = Region::map(&dir.join(params::ADDRESSES_FASTMAP_PREFIXES_FILE))?;
        let indices = Region::map(&dir.join(params::ADDRESSES_INDICES_FILE))?;

        let address_map = MultiMap::open(
            parameters.address_page_len,
            parameters.address_prefix_len,
            parameters.offset_index_len,
            parameters.address_fastmap_prefix_len,
            parameters.address_offset_len,
            fastmap_data,
            fastmap_prefixes,
            indices,
        )?;

        let location_len = 2 * parameters.offset_index_len;
        let locations_bytes = block_locations.as_ref().len();
        if locations_bytes % location_len != 0 {
            return Err(ArchiveError::CorruptBundle("bad length of blockLocations"));
        }
        let nblocks = locations_bytes / location_len;

        let offsets_bytes = offsets.as_ref().len();
        if offsets_bytes % parameters.offset_len != 0 {
            return Err(ArchiveError::CorruptBundle("bad length of offsets"));
        }
        let nitems = offsets_bytes / parameters.offset_len;

        if leaves_hashes.as_ref().len() != nitems * HASH_SIZE {
            return Err(ArchiveError::CorruptBundle("bad length of leavesHashes"));
        }

        info!(
            "serving bundle {} ({nblocks} blocks, {nitems} items)",
            dir.display()
        );
        Ok(Server {
            params: parameters,
            blockchain,
            offsets,
            block_locations,
            leaves_hashes,
            address_map,
            nblocks,
            nitems,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.nblocks
    }

    pub fn num_items(&self) -> usize {
        self.nitems
    }

    /// First item index of block `b`.
    fn first_payout(&self, block: usize) -> usize {
        let oil = self.params.offset_index_len;
        let start = block * 2 * oil;
        read_le(&self.block_locations.as_ref()[start..start + oil]) as usize
    }

    /// First transaction index of block `b`.
    fn first_transaction(&self, block: usize) -> usize {
        let oil = self.params.offset_index_len;
        let start = block * 2 * oil + oil;
        read_le(&self.block_locations.as_ref()[start..start + oil]) as usize
    }

    /// The items mentioning `address`, in stored list order, starting
    /// at ordinal `start`. Returns at most [MAX_HISTORY_SIZE] items
    /// and the cursor to continue from, or None when the list is
    /// exhausted.
    pub fn get_history(
        &self,
        address: &[u8],
        start: usize,
    ) -> Result<(Vec<Item<'_>>, Option<usize>), ArchiveError> {
        if address.len() != UNLOCK_HASH_SIZE {
            return Err(ArchiveError::InvalidInput(format!(
                "address of {} bytes, want {UNLOCK_HASH_SIZE}",
                address.len()
            )));
        }
        let prefix = &address[..self.params.address_prefix_len];
        let list = match self.address_map.lookup(prefix)? {
            Some(list) => list,
            None => return Ok((Vec::new(), None)),
        };

        let oil = self.params.offset_index_len;
        let total = list.len() / oil;
        if start >= total {
            return Ok((Vec::new(), None));
        }
        let end = (start + MAX_HISTORY_SIZE).min(total);

        let mut items = Vec::with_capacity(end - start);
        for wire_index in iter_values(&list[start * oil..end * oil], oil) {
            // Wire indices are shifted by one; zero never occurs.
            let item_index = wire_index
                .checked_sub(1)
                .ok_or(ArchiveError::CorruptBundle("zero wire item index"))?;
            items.push(self.get_item(item_index as usize)?);
        }
        let next = (end < total).then_some(end);
        Ok((items, next))
    }

    /// Fetches item `index` with its inclusion proof.
    pub fn get_item(&self, index: usize) -> Result<Item<'_>, ArchiveError> {
        if index >= self.nitems {
            return Err(ArchiveError::TooLargeIndex);
        }
        let ol = self.params.offset_len;
        let offsets = self.offsets.as_ref();
        let blockchain = self.blockchain.as_ref();

        let data_start = read_le(&offsets[index * ol..(index + 1) * ol]) as usize;
        let data_end = if index == self.nitems - 1 {
            blockchain.len()
        } else {
            read_le(&offsets[(index + 1) * ol..(index + 2) * ol]) as usize
        };
        if data_start > data_end || data_end > blockchain.len() {
            return Err(ArchiveError::CorruptBundle("item offsets out of order"));
        }
        let data = &blockchain[data_start..data_end];

        // Largest block whose first item is at or before `index`.
        let mut lo = 0usize;
        let mut hi = self.nblocks;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.first_payout(mid) <= index {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(ArchiveError::CorruptBundle("no block covers item"));
        }
        let block = lo - 1;

        let payouts_start = self.first_payout(block);
        let transactions_start = self.first_transaction(block);
        let next_start = if block == self.nblocks - 1 {
            self.nitems
        } else {
            self.first_payout(block + 1)
        };
        if payouts_start > transactions_start || transactions_start > next_start {
            return Err(ArchiveError::CorruptBundle("block locations out of order"));
        }

        let num_leaves = next_start - payouts_start;
        let index_in_block = index - payouts_start;
        let num_miner_payouts = transactions_start - payouts_start;
        let compression = if index < transactions_start {
            Compression::None
        } else {
            Compression::Snappy
        };

        // Rebuild the proof from the block's cached leaf hashes.
        let leaves_bytes =
            &self.leaves_hashes.as_ref()[payouts_start * HASH_SIZE..next_start * HASH_SIZE];
        let leaves: Vec<Hash> = leaves_bytes
            .chunks_exact(HASH_SIZE)
            .map(|chunk| Hash::from_slice(chunk).expect("chunks are hash sized"))
            .collect();
        let proof = MerkleProof::from_leaf_hashes(&leaves, index_in_block as u64)
            .ok_or(ArchiveError::CorruptBundle("proof target out of range"))?;

        Ok(Item {
            data,
            compression,
            block,
            index_in_block,
            num_leaves,
            num_miner_payouts,
            merkle_proof: proof.to_bytes(),
        })
    }
}
