// SPDX-License-Identifier: MIT

//! Domain-separated Merkle trees.
//!
//! Leaves are hashed as `H(0x00 ‖ data)` and interior nodes as
//! `H(0x01 ‖ left ‖ right)`. An unbalanced tree splits its leaves at
//! the largest power of two below the leaf count, so a proof for leaf
//! `i` of `n` is the usual sibling path, deepest sibling first.

use selva_common::hash::HASH_SIZE;
use selva_common::hash256_all;
use selva_common::Hash;

const LEAF_PREFIX: &[u8] = &[0x00];
const NODE_PREFIX: &[u8] = &[0x01];

/// Hashes a leaf payload.
pub fn leaf_hash(data: &[u8]) -> Hash {
    hash256_all(&[LEAF_PREFIX, data])
}

/// Hashes two subtree roots into their parent.
pub fn node_hash(left: Hash, right: Hash) -> Hash {
    hash256_all(&[NODE_PREFIX, left.as_ref(), right.as_ref()])
}

/// Computes the root over already-hashed leaves. An empty tree has the
/// all-zeros root.
pub fn root_from_leaves(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::all_zeros(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(root_from_leaves(&leaves[..k]), root_from_leaves(&leaves[k..]))
        }
    }
}

/// The largest power of two strictly below `n`. Only meaningful for
/// `n >= 2`.
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// An inclusion proof for one leaf: the sibling subtree roots from the
/// leaf up, deepest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pos: u64,
    hashes: Vec<Hash>,
}

impl MerkleProof {
    /// Builds the proof for leaf `target` from a full slice of leaf
    /// hashes. Returns None if `target` is out of range.
    pub fn from_leaf_hashes(leaves: &[Hash], target: u64) -> Option<Self> {
        if target as usize >= leaves.len() {
            return None;
        }
        let mut hashes = Vec::new();
        collect_siblings(leaves, target as usize, &mut hashes);
        Some(MerkleProof {
            pos: target,
            hashes,
        })
    }

    /// The sibling hashes, deepest first.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// The proof as a flat byte buffer, the way the archive serves it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.hashes.len() * HASH_SIZE);
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_ref());
        }
        out
    }

    /// Checks the proof against a root, given the leaf hash and the
    /// total leaf count of the tree.
    pub fn verify(&self, root: Hash, leaf: Hash, num_leaves: u64) -> bool {
        match compute_root(leaf, self.pos, num_leaves, &self.hashes) {
            Some(computed) => computed == root,
            None => false,
        }
    }
}

fn collect_siblings(leaves: &[Hash], target: usize, out: &mut Vec<Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if target < k {
        collect_siblings(&leaves[..k], target, out);
        out.push(root_from_leaves(&leaves[k..]));
    } else {
        collect_siblings(&leaves[k..], target - k, out);
        out.push(root_from_leaves(&leaves[..k]));
    }
}

fn compute_root(leaf: Hash, index: u64, num_leaves: u64, proof: &[Hash]) -> Option<Hash> {
    if num_leaves == 0 || index >= num_leaves {
        return None;
    }
    if num_leaves == 1 {
        return proof.is_empty().then_some(leaf);
    }
    let k = split_point(num_leaves as usize) as u64;
    let (sibling, rest) = proof.split_last()?;
    if index < k {
        let sub = compute_root(leaf, index, k, rest)?;
        Some(node_hash(sub, *sibling))
    } else {
        let sub = compute_root(leaf, index - k, num_leaves - k, rest)?;
        Some(node_hash(*sibling, sub))
    }
}

/// Client-side verification over the raw proof bytes the archive hands
/// out: hashes `leaf_data` with the leaf prefix, splits `proof` into
/// 32-byte siblings and replays the tree.
pub fn verify_proof(
    root: Hash,
    leaf_data: &[u8],
    proof: &[u8],
    proof_index: u64,
    num_leaves: u64,
) -> bool {
    if proof.len() % HASH_SIZE != 0 {
        return false;
    }
    let hashes: Vec<Hash> = proof
        .chunks_exact(HASH_SIZE)
        .map(|chunk| Hash::from_slice(chunk).expect("chunks are 32 bytes"))
        .collect();
    match compute_root(leaf_hash(leaf_data), proof_index, num_leaves, &hashes) {
        Some(computed) => computed == root,
        None => false,
    }
}
