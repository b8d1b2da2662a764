// SPDX-License-Identifier: MIT

//! Bundle tuning parameters, frozen into `parameters.json` at build
//! time and reloaded verbatim by the server.

use serde::Deserialize;
use serde::Serialize;

use crate::error::ArchiveError;

/// File names inside a bundle directory.
pub const PARAMETERS_FILE: &str = "parameters.json";
pub const BLOCKCHAIN_FILE: &str = "blockchain";
pub const OFFSETS_FILE: &str = "offsets";
pub const BLOCK_LOCATIONS_FILE: &str = "blockLocations";
pub const LEAVES_HASHES_FILE: &str = "leavesHashes";
pub const HEADERS_FILE: &str = "headers";
pub const ADDRESSES_FASTMAP_DATA_FILE: &str = "addressesFastmapData";
pub const ADDRESSES_FASTMAP_PREFIXES_FILE: &str = "addressesFastmapPrefixes";
pub const ADDRESSES_INDICES_FILE: &str = "addressesIndices";

/// Scratch file used by the external sort; removed on close.
pub const ADDRESSES_SCRATCH_FILE: &str = "addresses.tmp";

/// The frozen geometry of a bundle. All widths are in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameters {
    /// Width of an offset into the `blockchain` file.
    pub offset_len: usize,
    /// Width of an item index.
    pub offset_index_len: usize,
    /// Bucket page size of the address fastmap.
    pub address_page_len: usize,
    /// How many leading address bytes form the map key.
    pub address_prefix_len: usize,
    /// How many leading key bytes pick the bucket.
    pub address_fastmap_prefix_len: usize,
    /// Width of a byte offset into the `addressesIndices` file.
    pub address_offset_len: usize,
}

impl Parameters {
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.offset_len == 0 || self.offset_len > 8 {
            return Err(ArchiveError::Config("OffsetLen must be in 1..=8".into()));
        }
        if self.offset_index_len == 0 || self.offset_index_len > 8 {
            return Err(ArchiveError::Config("OffsetIndexLen must be in 1..=8".into()));
        }
        if self.address_offset_len == 0 || self.address_offset_len > 8 {
            return Err(ArchiveError::Config("AddressOffsetLen must be in 1..=8".into()));
        }
        if self.address_prefix_len == 0
            || self.address_prefix_len > selva_chain::types::UNLOCK_HASH_SIZE
        {
            return Err(ArchiveError::Config(
                "AddressPrefixLen must be in 1..=32".into(),
            ));
        }
        if self.address_fastmap_prefix_len == 0
            || self.address_fastmap_prefix_len > self.address_prefix_len
        {
            return Err(ArchiveError::Config(
                "AddressFastmapPrefixLen must be in 1..=AddressPrefixLen".into(),
            ));
        }
        if self.address_page_len < self.address_prefix_len + 2 * self.offset_index_len {
            return Err(ArchiveError::Config(
                "AddressPageLen cannot hold a single record".into(),
            ));
        }
        Ok(())
    }

    /// The inliner activates when a single item index fits exactly
    /// where a list offset would go.
    pub fn inliner_active(&self) -> bool {
        self.address_offset_len == self.offset_index_len
    }

    /// Width of one record fed through the external sort:
    /// address prefix plus wire item index.
    pub fn address_record_len(&self) -> usize {
        self.address_prefix_len + self.offset_index_len
    }
}

#[cfg(test)]
mod test {
    use super::Parameters;

    fn base() -> Parameters {
        Parameters {
            offset_len: 4,
            offset_index_len: 2,
            address_page_len: 256,
            address_prefix_len: 4,
            address_fastmap_prefix_len: 2,
            address_offset_len: 2,
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&base()).unwrap();
        for field in [
            "OffsetLen",
            "OffsetIndexLen",
            "AddressPageLen",
            "AddressPrefixLen",
            "AddressFastmapPrefixLen",
            "AddressOffsetLen",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
        let back: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, base());
    }

    #[test]
    fn test_validation() {
        assert!(base().validate().is_ok());

        let mut p = base();
        p.offset_len = 9;
        assert!(p.validate().is_err());

        let mut p = base();
        p.address_fastmap_prefix_len = 5;
        assert!(p.validate().is_err());

        let mut p = base();
        p.address_prefix_len = 40;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_inliner_activation() {
        assert!(base().inliner_active());
        let mut p = base();
        p.address_offset_len = 4;
        assert!(!p.inliner_active());
    }
}
