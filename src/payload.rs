//! Payload generation.

use bytes::Bytes;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Deterministic alphanumeric payload of exactly `size` bytes.
///
/// Built once per client; every message shares the same buffer.
pub fn generate_payload(size: usize) -> Bytes {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push(ALPHABET[(state % ALPHABET.len() as u64) as usize]);
    }
    Bytes::from(out)
}
