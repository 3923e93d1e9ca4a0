//! Share codes: short random tokens a sharer publishes and a receiver types in.

use rand::Rng;

/// Alphabet share codes are drawn from.
pub const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Length of generated share codes.
pub const CODE_LEN: usize = 10;

/// Generate a fresh share code of [`CODE_LEN`] characters.
pub fn generate_code() -> String {
    generate_code_with_len(CODE_LEN)
}

fn generate_code_with_len(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// A code is usable on the wire if it is non-empty and drawn from the alphabet.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
