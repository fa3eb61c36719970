//! 64-bit SimHash fingerprints over word shingles.
//!
//! Two bodies that differ by a few words produce fingerprints a small
//! Hamming distance apart, which is what near-duplicate detection keys on.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(words: &[&str]) -> u64 {
    let mut hash = FNV_OFFSET;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            hash ^= u64::from(b' ');
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// Fingerprint of `text` using shingles of `shingle_size` lower-cased words.
///
/// Texts shorter than one shingle are hashed as a single shingle; empty
/// text yields `0`.
pub fn simhash(text: &str, shingle_size: usize) -> u64 {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0;
    }

    let size = shingle_size.max(1).min(words.len());
    let mut weights = [0i64; 64];
    for shingle in words.windows(size) {
        let hash = fnv1a(shingle);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if hash & (1 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
