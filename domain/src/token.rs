//! Token and blob-key generation using the URL-safe nanoid alphabet.

use rand::Rng;

use crate::{Token, TokenGenerator, TOKEN_LEN};

/// 64 URL-safe symbols; a random byte masked to 6 bits indexes it uniformly.
const ALPHABET: &[u8; 64] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Default nanoid length, used for blob keys.
pub const NANOID_LEN: usize = 21;

/// Returns the token alphabet as bytes.
pub fn alphabet() -> &'static [u8] {
    &ALPHABET[..]
}

pub(crate) fn is_alphabet_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Random string of `len` characters drawn from the nanoid alphabet.
pub fn nanoid(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[(rng.gen::<u8>() & 63) as usize] as char)
        .collect()
}

/// Mints random 8-character tokens.
#[derive(Clone, Copy, Debug, Default)]
pub struct NanoidTokenGenerator;

impl NanoidTokenGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl TokenGenerator for NanoidTokenGenerator {
    fn next_token(&self) -> Token {
        // Valid by construction: correct length, alphabet symbols only
        Token(nanoid(TOKEN_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn alphabet_len_and_uniqueness() {
        assert_eq!(alphabet().len(), 64);
        let set: HashSet<u8> = alphabet().iter().copied().collect();
        assert_eq!(set.len(), 64);
        assert!(alphabet().iter().all(|b| is_alphabet_byte(*b)));
    }

    #[test]
    fn nanoid_has_requested_length() {
        assert_eq!(nanoid(NANOID_LEN).len(), 21);
        assert_eq!(nanoid(0), "");
        assert!(nanoid(100).bytes().all(is_alphabet_byte));
    }

    #[test]
    fn generated_tokens_are_valid_and_vary() {
        let g = NanoidTokenGenerator::new();
        let tokens: HashSet<String> = (0..50).map(|_| g.next_token().as_str().to_string()).collect();
        assert!(tokens.iter().all(|t| t.len() == TOKEN_LEN));
        // 50 draws from 64^8 should not collide
        assert_eq!(tokens.len(), 50);
    }
}
