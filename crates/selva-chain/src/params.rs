// SPDX-License-Identifier: MIT

//! Network constants.

use selva_common::Hash;

use crate::types::Block;

/// Consensus constants clients need to validate a header stream and
/// peers need to agree on a network.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Timestamp of the genesis block.
    pub genesis_timestamp: u64,
    /// Headers this far past the local clock are rejected outright.
    pub extreme_future_threshold: u64,
    /// Headers this far past the local clock are rejected for now.
    pub future_threshold: u64,
    /// How many trailing timestamps feed the median lower bound.
    pub median_timestamp_window: usize,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        ChainParams {
            genesis_timestamp: 1_700_000_000,
            extreme_future_threshold: 5 * 60 * 60,
            future_threshold: 3 * 60 * 60,
            median_timestamp_window: 11,
        }
    }

    /// The genesis block: no parent, no payouts, no transactions.
    pub fn genesis_block(&self) -> Block {
        Block {
            parent_id: Hash::all_zeros(),
            nonce: [0u8; 8],
            timestamp: self.genesis_timestamp,
            miner_payouts: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn genesis_id(&self) -> Hash {
        self.genesis_block().id()
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod test {
    use super::ChainParams;

    #[test]
    fn test_genesis_is_stable() {
        let params = ChainParams::mainnet();
        assert_eq!(params.genesis_id(), params.genesis_id());
        assert_eq!(
            params.genesis_block().timestamp,
            params.genesis_timestamp
        );
    }
}
