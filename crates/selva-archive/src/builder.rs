// SPDX-License-Identifier: MIT

//! The offline ingest phase.
//!
//! A [Builder] owns exclusive writers over a fresh bundle directory
//! and consumes blocks in chain order. Per item it appends the payload
//! to `blockchain` (payouts raw, transactions snappy-compressed), the
//! payload's byte offset to `offsets`, the domain-separated leaf hash
//! to `leavesHashes`, and one `(address prefix, wire index)` record
//! per mentioned address into the external sort that feeds the address
//! multimap. Item indices go on the wire shifted by one so zero stays
//! reserved for the inliner.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use log::debug;
use log::info;
use selva_chain::merkle;
use selva_chain::serialize;
use selva_chain::types::Block;
use selva_chain::types::SiacoinOutput;
use selva_chain::types::Transaction;
use selva_chain::types::UnlockHash;
use selva_chain::Encodable;
use selva_common::max_le;
use selva_index::ExternalSorter;
use selva_index::MultiMapWriter;

use crate::error::ArchiveError;
use crate::params;
use crate::params::Parameters;

type AddressSorter = ExternalSorter<MultiMapWriter<BufWriter<File>>>;

pub struct Builder {
    blockchain: BufWriter<File>,
    blockchain_len: u64,
    offsets: BufWriter<File>,
    block_locations: BufWriter<File>,
    leaves_hashes: BufWriter<File>,
    headers: BufWriter<File>,
    addresses: AddressSorter,
    compressor: snap::raw::Encoder,
    params: Parameters,
    item_index: u64,
    nblocks: u64,
    encode_buf: Vec<u8>,
    record_buf: Vec<u8>,
}

fn create_file(dir: &Path, name: &str) -> Result<BufWriter<File>, ArchiveError> {
    let file = File::create(dir.join(name))?;
    Ok(BufWriter::new(file))
}

impl Builder {
    /// Prepares a bundle in `dir`, which must be empty (or absent; it
    /// is created). `mem_limit` bounds the address sort buffer in
    /// bytes; everything else runs in constant memory per record.
    pub fn new(
        dir: impl Into<PathBuf>,
        params: Parameters,
        mem_limit: usize,
    ) -> Result<Self, ArchiveError> {
        params.validate()?;
        let dir = dir.into();

        fs::create_dir_all(&dir)?;
        if fs::read_dir(&dir)?.next().is_some() {
            return Err(ArchiveError::InvalidInput(format!(
                "output directory {} is not empty",
                dir.display()
            )));
        }

        let parameters_file = File::create(dir.join(params::PARAMETERS_FILE))?;
        serde_json::to_writer_pretty(&parameters_file, &params)?;
        parameters_file.sync_all()?;

        let blockchain = create_file(&dir, params::BLOCKCHAIN_FILE)?;
        let offsets = create_file(&dir, params::OFFSETS_FILE)?;
        let block_locations = create_file(&dir, params::BLOCK_LOCATIONS_FILE)?;
        let leaves_hashes = create_file(&dir, params::LEAVES_HASHES_FILE)?;
        let headers = create_file(&dir, params::HEADERS_FILE)?;

        let multimap = MultiMapWriter::new(
            params.address_page_len,
            params.address_prefix_len,
            params.offset_index_len,
            params.address_fastmap_prefix_len,
            params.address_offset_len,
            create_file(&dir, params::ADDRESSES_FASTMAP_DATA_FILE)?,
            create_file(&dir, params::ADDRESSES_FASTMAP_PREFIXES_FILE)?,
            create_file(&dir, params::ADDRESSES_INDICES_FILE)?,
        )?;
        let addresses = ExternalSorter::new(
            multimap,
            params.address_record_len(),
            mem_limit,
            dir.join(params::ADDRESSES_SCRATCH_FILE),
        )?;

        info!("building bundle in {}", dir.display());
        Ok(Builder {
            blockchain,
            blockchain_len: 0,
            offsets,
            block_locations,
            leaves_hashes,
            headers,
            addresses,
            compressor: snap::raw::Encoder::new(),
            params,
            item_index: 0,
            nblocks: 0,
            encode_buf: Vec::new(),
            record_buf: Vec::new(),
        })
    }

    /// Appends the current blockchain length as the next item's
    /// offset. An overflowing length is caught at block end.
    fn write_offset(&mut self) -> Result<(), ArchiveError> {
        let bytes = self.blockchain_len.to_le_bytes();
        self.offsets.write_all(&bytes[..self.params.offset_len])?;
        Ok(())
    }

    /// Emits one address record for the item currently being written.
    fn write_address(&mut self, address: &UnlockHash) -> Result<(), ArchiveError> {
        let wire_index = self.item_index + 1;
        if wire_index > max_le(self.params.offset_index_len) {
            return Err(ArchiveError::BuildOverflow {
                field: "OffsetIndexLen",
                value: wire_index,
                len: self.params.offset_index_len,
            });
        }
        self.record_buf.clear();
        self.record_buf
            .extend_from_slice(&address.as_bytes()[..self.params.address_prefix_len]);
        self.record_buf
            .extend_from_slice(&wire_index.to_le_bytes()[..self.params.offset_index_len]);
        self.addresses.push(&self.record_buf)?;
        Ok(())
    }

    fn write_payout(&mut self, payout: &SiacoinOutput) -> Result<(), ArchiveError> {
        self.write_offset()?;
        self.write_address(&payout.unlock_hash)?;

        self.encode_buf.clear();
        payout.consensus_encode(&mut self.encode_buf)?;
        let leaf = merkle::leaf_hash(&self.encode_buf);
        self.leaves_hashes.write_all(leaf.as_ref())?;

        self.blockchain.write_all(&self.encode_buf)?;
        self.blockchain_len += self.encode_buf.len() as u64;
        self.item_index += 1;
        Ok(())
    }

    fn write_transaction(&mut self, tx: &Transaction) -> Result<(), ArchiveError> {
        self.write_offset()?;
        // Repeated addresses within one transaction are emitted as-is;
        // the sorted dedup stage drops exact repeats.
        for address in tx.covered_addresses() {
            self.write_address(&address)?;
        }

        self.encode_buf.clear();
        tx.consensus_encode(&mut self.encode_buf)?;
        let leaf = merkle::leaf_hash(&self.encode_buf);
        self.leaves_hashes.write_all(leaf.as_ref())?;

        let compressed = self.compressor.compress_vec(&self.encode_buf)?;
        self.blockchain.write_all(&compressed)?;
        self.blockchain_len += compressed.len() as u64;
        self.item_index += 1;
        Ok(())
    }

    /// Ingests the next block. Blocks must arrive in chain order; the
    /// builder is strictly sequential.
    pub fn add_block(&mut self, block: &Block) -> Result<(), ArchiveError> {
        let header = serialize(&block.archived_header());
        self.headers.write_all(&header)?;

        let first_payout = self.item_index;
        for payout in &block.miner_payouts {
            self.write_payout(payout)?;
        }
        let first_transaction = self.item_index;
        for tx in &block.transactions {
            self.write_transaction(tx)?;
        }

        let index_max = max_le(self.params.offset_index_len);
        if first_payout > index_max || first_transaction > index_max {
            return Err(ArchiveError::BuildOverflow {
                field: "OffsetIndexLen",
                value: self.item_index,
                len: self.params.offset_index_len,
            });
        }
        let oil = self.params.offset_index_len;
        self.block_locations
            .write_all(&first_payout.to_le_bytes()[..oil])?;
        self.block_locations
            .write_all(&first_transaction.to_le_bytes()[..oil])?;

        if self.blockchain_len > max_le(self.params.offset_len) {
            return Err(ArchiveError::BuildOverflow {
                field: "OffsetLen",
                value: self.blockchain_len,
                len: self.params.offset_len,
            });
        }

        self.nblocks += 1;
        debug!(
            "archived block {} ({} payouts, {} transactions)",
            self.nblocks - 1,
            block.miner_payouts.len(),
            block.transactions.len()
        );
        Ok(())
    }

    /// Flushes every stream, runs the external-sort merge into the
    /// address maps and removes the scratch file. The bundle is
    /// complete once this returns.
    pub fn close(self) -> Result<(), ArchiveError> {
        let Builder {
            mut blockchain,
            mut offsets,
            mut block_locations,
            mut leaves_hashes,
            mut headers,
            addresses,
            item_index,
            nblocks,
            ..
        } = self;

        blockchain.flush()?;
        offsets.flush()?;
        block_locations.flush()?;
        leaves_hashes.flush()?;
        headers.flush()?;
        addresses.finish()?;

        info!("bundle complete: {nblocks} blocks, {item_index} items");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use selva_chain::types::Block;
    use selva_chain::types::SiacoinOutput;

    use super::Builder;
    use crate::error::ArchiveError;
    use crate::params::Parameters;

    fn tiny_params() -> Parameters {
        Parameters {
            offset_len: 4,
            offset_index_len: 2,
            address_page_len: 256,
            address_prefix_len: 4,
            address_fastmap_prefix_len: 2,
            address_offset_len: 2,
        }
    }

    fn tmp_dir() -> String {
        format!("./tmp-db/{}", rand::random::<u64>())
    }

    #[test]
    fn test_refuses_non_empty_dir() {
        let dir = tmp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(format!("{dir}/stray"), b"x").unwrap();
        match Builder::new(&*dir, tiny_params(), 1 << 20) {
            Err(ArchiveError::InvalidInput(_)) => (),
            Err(other) => panic!("expected InvalidInput, got {other:?}"),
            Ok(_) => panic!("expected InvalidInput, got a builder"),
        }
    }

    #[test]
    fn test_empty_build_produces_bundle_files() {
        let dir = tmp_dir();
        let builder = Builder::new(&*dir, tiny_params(), 1 << 20).unwrap();
        builder.close().unwrap();
        for name in [
            "parameters.json",
            "blockchain",
            "offsets",
            "blockLocations",
            "leavesHashes",
            "headers",
            "addressesFastmapData",
            "addressesFastmapPrefixes",
            "addressesIndices",
        ] {
            assert!(
                fs::metadata(format!("{dir}/{name}")).is_ok(),
                "missing {name}"
            );
        }
        assert!(
            fs::metadata(format!("{dir}/addresses.tmp")).is_err(),
            "scratch file must not survive close"
        );
    }

    #[test]
    fn test_offset_overflow_aborts() {
        let dir = tmp_dir();
        let params = Parameters {
            offset_len: 1,
            ..tiny_params()
        };
        let mut builder = Builder::new(&*dir, params, 1 << 20).unwrap();
        let block = Block {
            miner_payouts: vec![SiacoinOutput::default(); 10],
            ..Default::default()
        };
        // Ten encoded payouts run well past 255 bytes
        match builder.add_block(&block) {
            Err(ArchiveError::BuildOverflow { field, .. }) => assert_eq!(field, "OffsetLen"),
            other => panic!("expected BuildOverflow, got {other:?}"),
        }
    }
}
