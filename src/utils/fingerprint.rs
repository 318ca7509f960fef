//! Client identification helpers.
//!
//! The post-handshake identification burst carries a machine
//! fingerprint and a random hex token. The fingerprint is an opaque
//! digest of local environment strings; the server stores it verbatim,
//! so only its shape matters.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

const USER_AGENT: &str = "Mozilla/5.0 (Android; U; pt-BR) AppleWebKit/533.19.4 (KHTML, like Gecko) AdobeAIR/30.0";
const FONT_LIST: &str = "Algerian,Almanac MT,Arial,Arial Black,Impact,Calibri";

/// Produces a `~`-prefixed 32-hex-character machine fingerprint.
pub fn machine_hash() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let salt: u8 = rand::rng().random_range(0..5);

    let mut hasher = Sha256::new();
    hasher.update(format!("{USER_AGENT}#2#{millis}#{salt}#{FONT_LIST}"));
    let digest = hasher.finalize();

    // 16 digest bytes give the expected 32-character rendering.
    format!("~{}", hex::encode(&digest[..16]))
}

/// Random lowercase hex string of `digits` characters.
pub fn random_hex(digits: usize) -> String {
    let mut rng = rand::rng();
    let mut buffer = vec![0u8; digits.div_ceil(2)];
    rng.fill(&mut buffer[..]);

    let mut out = hex::encode(buffer);
    out.truncate(digits);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_hash_shape() {
        let hash = machine_hash();
        assert!(hash.starts_with('~'));
        assert_eq!(hash.len(), 33);
        assert!(hash[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn random_hex_length_and_alphabet() {
        for digits in [1, 24, 76] {
            let token = random_hex(digits);
            assert_eq!(token.len(), digits);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
