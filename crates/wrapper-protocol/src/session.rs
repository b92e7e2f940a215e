//! The session key that authenticates a connecting child as the one this
//! supervisor just launched.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
const KEY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generate a fresh 16-character key drawn uniformly from a 64-character
    /// alphabet (>= 2^96 entropy). Call once per child launch.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let s: String = (0..KEY_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..ALPHABET.len());
                ALPHABET[idx] as char
            })
            .collect();
        SessionKey(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // Plain comparison: the key's job is to foil an unrelated process
        // racing to connect to the listening endpoint, not to resist a
        // timing side-channel from a co-resident attacker.
        self.0 == candidate
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_length_and_alphabet() {
        let key = SessionKey::generate();
        assert_eq!(key.as_str().chars().count(), KEY_LEN);
        assert!(key
            .as_str()
            .bytes()
            .all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn successive_keys_differ() {
        // Not a proof of entropy, just a smoke test that we're not
        // returning a constant.
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn matches_is_exact() {
        let key = SessionKey::from("abcd1234abcd1234".to_string());
        assert!(key.matches("abcd1234abcd1234"));
        assert!(!key.matches("abcd1234abcd1235"));
        assert!(!key.matches("abcd1234abcd123"));
    }
}
