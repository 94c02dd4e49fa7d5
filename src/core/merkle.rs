use crate::core::Transaction;
use crate::utils::sha256_digest;

/// Merkle root computation over a block's transaction ids.
///
/// Leaves are the transaction ids themselves. Every level with an odd number
/// of hashes is padded with a copy of its last hash, and a parent is the
/// single SHA-256 of `left ‖ right`.
pub struct MerkleTree;

impl MerkleTree {
    /// Root over the ids of `transactions`; empty for an empty list
    pub fn root_of_transactions(transactions: &[Transaction]) -> Vec<u8> {
        let transaction_hashes: Vec<Vec<u8>> =
            transactions.iter().map(|tx| tx.get_id().to_vec()).collect();
        Self::calculate_merkle_root(&transaction_hashes)
    }

    /// Root over already computed leaf hashes. The caller's slice is never modified.
    pub fn calculate_merkle_root(transaction_hashes: &[Vec<u8>]) -> Vec<u8> {
        if transaction_hashes.is_empty() {
            return vec![];
        }

        let mut current_level = transaction_hashes.to_vec();
        loop {
            if current_level.len() % 2 != 0 {
                if let Some(last) = current_level.last().cloned() {
                    current_level.push(last);
                }
            }

            current_level = current_level
                .chunks(2)
                .map(|pair| Self::hash_pair(&pair[0], &pair[1]))
                .collect();

            if current_level.len() == 1 {
                return current_level.remove(0);
            }
        }
    }

    /// True when `expected_root` matches the root recomputed from `transactions`
    pub fn verify_transactions(transactions: &[Transaction], expected_root: &[u8]) -> bool {
        Self::root_of_transactions(transactions) == expected_root
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| sha256_digest(&[i])).collect()
    }

    #[test]
    fn test_empty_list_has_empty_root() {
        assert!(MerkleTree::calculate_merkle_root(&[]).is_empty());
        assert!(MerkleTree::root_of_transactions(&[]).is_empty());
    }

    #[test]
    fn test_single_leaf_is_paired_with_itself() {
        let hashes = leaves(1);
        let root = MerkleTree::calculate_merkle_root(&hashes);
        assert_eq!(root, MerkleTree::hash_pair(&hashes[0], &hashes[0]));
    }

    #[test]
    fn test_two_leaves() {
        let hashes = leaves(2);
        let root = MerkleTree::calculate_merkle_root(&hashes);
        assert_eq!(root, MerkleTree::hash_pair(&hashes[0], &hashes[1]));
        assert_eq!(root.len(), 32);
    }

    #[test]
    fn test_root_is_deterministic() {
        let hashes = leaves(5);
        assert_eq!(
            MerkleTree::calculate_merkle_root(&hashes),
            MerkleTree::calculate_merkle_root(&hashes)
        );
    }

    #[test]
    fn test_odd_count_matches_padded_even_count() {
        let odd = leaves(3);
        let mut padded = odd.clone();
        padded.push(odd[2].clone());

        assert_eq!(
            MerkleTree::calculate_merkle_root(&odd),
            MerkleTree::calculate_merkle_root(&padded)
        );
        assert_eq!(odd.len(), 3);
    }

    #[test]
    fn test_inner_odd_level_is_padded() {
        // 6 leaves -> 3 parents -> padded to 4 -> 2 -> 1
        let hashes = leaves(6);
        let p0 = MerkleTree::hash_pair(&hashes[0], &hashes[1]);
        let p1 = MerkleTree::hash_pair(&hashes[2], &hashes[3]);
        let p2 = MerkleTree::hash_pair(&hashes[4], &hashes[5]);
        let q0 = MerkleTree::hash_pair(&p0, &p1);
        let q1 = MerkleTree::hash_pair(&p2, &p2);
        let expected = MerkleTree::hash_pair(&q0, &q1);

        assert_eq!(MerkleTree::calculate_merkle_root(&hashes), expected);
    }

    #[test]
    fn test_order_matters() {
        let hashes = leaves(2);
        let reversed: Vec<Vec<u8>> = hashes.iter().rev().cloned().collect();
        assert_ne!(
            MerkleTree::calculate_merkle_root(&hashes),
            MerkleTree::calculate_merkle_root(&reversed)
        );
    }
}
