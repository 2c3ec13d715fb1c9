use super::HasherExtensions;
use crate::crown::Crown;
use ethereal_hashes::{DigestAlgorithm, Hash, HasherBase};

/// Returns the canonical unit hash: `H(id ‖ crown ‖ data ‖ rsData)` under the
/// configured digest algorithm.
pub fn hash(algo: DigestAlgorithm, id: u64, crown: &Crown, data: &[u8], rs_data: &[u8]) -> Hash {
    let mut hasher = algo.unit_hasher();
    hasher.write_u64(id).write_len(crown.heights().len());
    for &height in crown.heights() {
        hasher.write_i32(height);
    }
    hasher.update(crown.control_hash());
    hasher.write_var_bytes(data).write_var_bytes(rs_data);
    hasher.finalize()
}
