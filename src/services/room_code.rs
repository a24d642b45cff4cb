//! Human-typable room codes.

use rand::Rng;

/// Symbols a room code is drawn from; `0`, `O`, `1` and `I` are left out as too easy to confuse.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Number of symbols in a room code.
pub const CODE_LENGTH: usize = 6;

/// Sample a fresh code uniformly, with replacement, from [`ALPHABET`].
///
/// Uniqueness is not checked here; the store rejects duplicates on insert.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Whether `code` is exactly [`CODE_LENGTH`] alphabet symbols, ignoring case.
pub fn validate(code: &str) -> bool {
    normalize(code).is_some()
}

/// Upper-case `code` when it is a well-formed room code.
pub fn normalize(code: &str) -> Option<String> {
    let upper = code.to_ascii_uppercase();
    let well_formed = upper.chars().count() == CODE_LENGTH
        && upper.bytes().all(|symbol| ALPHABET.contains(&symbol));
    well_formed.then_some(upper)
}
