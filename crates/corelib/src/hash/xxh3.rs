//! XXH3 hash function.

use xxhash_rust::xxh3::xxh3_64;

/// XXH3 64-bit digest folded to 32 bits.
pub fn hash32(data: &[u8]) -> i32 {
    super::fold64(xxh3_64(data))
}
