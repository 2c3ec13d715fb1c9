use super::HasherExtensions;
use ethereal_hashes::{DigestAlgorithm, Hash, HasherBase, ZERO_HASH};

/// Combines an N-sized parent hash array into the crown control hash. Absent
/// slots hash as the zero digest, which no real unit hash collides with.
pub fn combine(algo: DigestAlgorithm, parents: impl ExactSizeIterator<Item = Option<Hash>>) -> Hash {
    let mut hasher = algo.crown_hasher();
    hasher.write_len(parents.len());
    for slot in parents {
        hasher.update(slot.unwrap_or(ZERO_HASH));
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_is_slot_sensitive() {
        let a = Some(Hash::from_u64_word(1));
        let b = Some(Hash::from_u64_word(2));
        let algo = DigestAlgorithm::Blake2b;
        assert_eq!(combine(algo, [a, b, None].into_iter()), combine(algo, [a, b, None].into_iter()));
        assert_ne!(combine(algo, [a, b, None].into_iter()), combine(algo, [b, a, None].into_iter()));
        assert_ne!(combine(algo, [a, b, None].into_iter()), combine(algo, [a, None, b].into_iter()));
        assert_ne!(combine(algo, [a, b].into_iter()), combine(algo, [a, b, None].into_iter()));
    }
}
