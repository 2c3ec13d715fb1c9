use serde::{Deserialize, Serialize};

/// One deterministic output batch of the ordering core: application payloads
/// in the canonical order, plus the shared random bytes derived for the batch's
/// timing level. Byte-identical across correct processes for the same index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreBlock {
    pub data: Vec<Vec<u8>>,
    pub random_bytes: [u8; 32],
}
