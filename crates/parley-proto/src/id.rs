use rand::Rng;

/// Transfer ids are 16 opaque characters drawn from a 64-symbol alphabet.
pub const ID_LEN: usize = 16;

const ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz+-";

/// Draw a fresh id. Uniqueness against a live table is the caller's job; on
/// collision the caller re-seeds its generator and draws again.
pub fn new_id<R: Rng>(rng: &mut R) -> String {
    (0..ID_LEN).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect()
}
