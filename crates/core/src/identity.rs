//! Identifiers generated on the client.

use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 7;

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A visitor identity, generated once per visit (`user-` + 7 base-36 chars).
pub fn visitor_id() -> String {
    format!("user-{}", random_suffix())
}

/// A fresh room name for one voice session (`room-` + 7 base-36 chars).
pub fn room_name() -> String {
    format!("room-{}", random_suffix())
}
