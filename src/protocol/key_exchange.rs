//! # Key Exchange
//!
//! RSA-signed Diffie-Hellman handshake primitives.
//!
//! The server signs its DH prime and generator under RSA; the client
//! verifies them, answers with its own DH public value (signed when a
//! private exponent is held, otherwise encrypted), and both sides derive
//! `peer^private mod prime` as the shared secret that seeds the stream
//! cipher.
//!
//! Values travel as hex strings. RSA operates on the decimal rendering
//! of each big integer, wrapped in a PKCS-style padded block
//! `[type][filler...][0][data]`; unpadding rejects blocks missing the
//! zero terminator. All big-integer byte conversions are unsigned
//! big-endian (`BigUint`), matching wire order directly.

use crate::error::{constants, ProtocolError, Result};
use num_bigint::BigUint;
use rand::Rng;
use tracing::debug;

/// Bit size of generated DH values.
const DH_BITS: u64 = 256;

/// Padding byte policy for the PKCS-style block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkcsPadding {
    /// Every filler byte is 0xFF.
    MaxByte,
    /// Each filler byte is drawn uniformly from 1..=255.
    RandomByte,
}

impl PkcsPadding {
    fn type_byte(self) -> u8 {
        match self {
            PkcsPadding::MaxByte => 1,
            PkcsPadding::RandomByte => 2,
        }
    }
}

#[derive(Debug, Clone)]
struct DhState {
    prime: BigUint,
    generator: BigUint,
    private: BigUint,
    public: BigUint,
}

/// Per-connection key-exchange state. DH values are generated exactly
/// once per instance; sessions create a fresh instance per attempt so
/// no cryptographic state survives across attempts.
pub struct KeyExchange {
    modulus: BigUint,
    exponent: BigUint,
    private_exponent: Option<BigUint>,
    padding: PkcsPadding,
    /// RSA block size in bytes, derived from the modulus width.
    block_size: usize,
    dh: Option<DhState>,
}

impl KeyExchange {
    /// Public-only key exchange: can encrypt and verify, cannot sign.
    /// This is the client role.
    pub fn new(exponent: u32, modulus_hex: &str) -> Result<Self> {
        Self::build(exponent, modulus_hex, None)
    }

    /// Key exchange holding the RSA private exponent: can sign and
    /// decrypt. This side also generates its own DH parameters up
    /// front, since it is the one initiating the exchange.
    pub fn with_private(exponent: u32, modulus_hex: &str, private_hex: &str) -> Result<Self> {
        let mut exchange = Self::build(exponent, modulus_hex, Some(parse_hex(private_hex)?))?;
        exchange.generate_dh_parameters();
        Ok(exchange)
    }

    fn build(exponent: u32, modulus_hex: &str, private: Option<BigUint>) -> Result<Self> {
        let modulus = parse_hex(modulus_hex)?;
        let block_size = ((modulus.bits() + 7) / 8) as usize;
        Ok(Self {
            modulus,
            exponent: BigUint::from(exponent),
            private_exponent: private,
            padding: PkcsPadding::MaxByte,
            block_size,
            dh: None,
        })
    }

    pub fn can_decrypt(&self) -> bool {
        self.private_exponent.is_some()
    }

    pub fn padding(&self) -> PkcsPadding {
        self.padding
    }

    pub fn set_padding(&mut self, padding: PkcsPadding) {
        self.padding = padding;
    }

    /// Validates received DH parameters, given as plain unsigned hex,
    /// and generates this side's DH key pair over them.
    ///
    /// Fails with [`ProtocolError::InvalidHandshakeParameters`] when the
    /// prime is not greater than 2 or the generator is not less than
    /// the prime. Both are fatal handshake errors.
    pub fn verify_primes(&mut self, prime_hex: &str, generator_hex: &str) -> Result<()> {
        let prime = parse_hex(prime_hex)
            .map_err(|_| ProtocolError::InvalidHandshakeParameters(constants::ERR_NOT_HEX.into()))?;
        if prime <= BigUint::from(2u8) {
            return Err(ProtocolError::InvalidHandshakeParameters(
                constants::ERR_PRIME_TOO_SMALL.into(),
            ));
        }

        let generator = parse_hex(generator_hex)
            .map_err(|_| ProtocolError::InvalidHandshakeParameters(constants::ERR_NOT_HEX.into()))?;
        if generator >= prime {
            return Err(ProtocolError::InvalidHandshakeParameters(
                constants::ERR_GENERATOR_TOO_LARGE.into(),
            ));
        }

        self.install_dh(prime, generator);
        Ok(())
    }

    /// Like [`verify_primes`](Self::verify_primes), but the parameters
    /// arrive RSA-signed as produced by the peer's
    /// [`signed_prime_hex`](Self::signed_prime_hex) /
    /// [`signed_generator_hex`](Self::signed_generator_hex).
    pub fn verify_signed_primes(&mut self, prime_hex: &str, generator_hex: &str) -> Result<()> {
        let prime = self.verify(prime_hex)?;
        let generator = self.verify(generator_hex)?;
        debug!(prime_bits = prime.bits(), "verified signed DH parameters");
        self.verify_primes(&prime.to_str_radix(16), &generator.to_str_radix(16))
    }

    /// This side's DH public value, signed when the private exponent is
    /// held and encrypted otherwise.
    pub fn public_key_hex(&mut self) -> Result<String> {
        let public = self
            .dh
            .as_ref()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_DH_NOT_INITIALIZED.into()))?
            .public
            .clone();
        if self.can_decrypt() {
            self.sign(&public)
        } else {
            self.encrypt(&public)
        }
    }

    /// Decodes the peer's public value and derives the shared secret
    /// `peer^private mod prime`, returned as big-endian bytes. This is
    /// the symmetric key material for the stream cipher.
    pub fn derive_shared_key(&mut self, peer_public_hex: &str) -> Result<Vec<u8>> {
        let peer = if self.can_decrypt() {
            self.decrypt(peer_public_hex)?
        } else {
            self.verify(peer_public_hex)?
        };
        let dh = self
            .dh
            .as_ref()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_DH_NOT_INITIALIZED.into()))?;

        let shared = peer.modpow(&dh.private, &dh.prime);
        Ok(shared.to_bytes_be())
    }

    /// The DH prime signed under the RSA private exponent.
    pub fn signed_prime_hex(&mut self) -> Result<String> {
        let prime = self
            .dh
            .as_ref()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_DH_NOT_INITIALIZED.into()))?
            .prime
            .clone();
        self.sign(&prime)
    }

    /// The DH generator signed under the RSA private exponent.
    pub fn signed_generator_hex(&mut self) -> Result<String> {
        let generator = self
            .dh
            .as_ref()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_DH_NOT_INITIALIZED.into()))?
            .generator
            .clone();
        self.sign(&generator)
    }

    // ---- RSA primitives ----

    fn calculate_public(&self, value: &BigUint) -> BigUint {
        value.modpow(&self.exponent, &self.modulus)
    }

    fn calculate_private(&self, value: &BigUint) -> Result<BigUint> {
        let d = self
            .private_exponent
            .as_ref()
            .ok_or_else(|| ProtocolError::CryptoVerification(constants::ERR_NO_PRIVATE_EXPONENT.into()))?;
        Ok(value.modpow(d, &self.modulus))
    }

    fn sign(&mut self, value: &BigUint) -> Result<String> {
        let padded = self.pad_decimal(value)?;
        let calculated = self.calculate_private(&padded)?;
        Ok(hex::encode(calculated.to_bytes_be()))
    }

    fn encrypt(&mut self, value: &BigUint) -> Result<String> {
        let padded = self.pad_decimal(value)?;
        Ok(hex::encode(self.calculate_public(&padded).to_bytes_be()))
    }

    fn verify(&self, value_hex: &str) -> Result<BigUint> {
        let raw = parse_hex(value_hex)
            .map_err(|_| ProtocolError::CryptoVerification(constants::ERR_NOT_HEX.into()))?;
        unpad_decimal(&self.calculate_public(&raw))
    }

    fn decrypt(&self, value_hex: &str) -> Result<BigUint> {
        let raw = parse_hex(value_hex)
            .map_err(|_| ProtocolError::CryptoVerification(constants::ERR_NOT_HEX.into()))?;
        unpad_decimal(&self.calculate_private(&raw)?)
    }

    /// Renders the value as a decimal string and wraps it in a padded
    /// block interpreted as a big-endian integer.
    fn pad_decimal(&mut self, value: &BigUint) -> Result<BigUint> {
        let data = value.to_str_radix(10).into_bytes();
        let padded = pkcs_pad(&data, self.block_size, self.padding)?;
        Ok(BigUint::from_bytes_be(&padded))
    }

    // ---- DH parameter handling ----

    fn install_dh(&mut self, prime: BigUint, generator: BigUint) {
        let private = random_biguint(DH_BITS);
        let public = generator.modpow(&private, &prime);
        self.dh = Some(DhState {
            prime,
            generator,
            private,
            public,
        });
    }

    /// Generates this side's own DH prime and generator. The values are
    /// random integers, not vetted primes, mirroring the modeled
    /// protocol; the larger of the two becomes the prime.
    fn generate_dh_parameters(&mut self) {
        let mut prime = random_biguint(DH_BITS);
        let mut generator = random_biguint(DH_BITS);
        if generator > prime {
            std::mem::swap(&mut prime, &mut generator);
        }
        self.install_dh(prime, generator);
    }

    #[cfg(test)]
    pub(crate) fn dh_public(&self) -> Option<&BigUint> {
        self.dh.as_ref().map(|dh| &dh.public)
    }
}

fn parse_hex(value: &str) -> Result<BigUint> {
    BigUint::parse_bytes(value.as_bytes(), 16)
        .ok_or_else(|| ProtocolError::CryptoVerification(constants::ERR_NOT_HEX.into()))
}

/// Fills `bits / 8` random bytes and clears the top bit, so generated
/// values stay below 2^(bits-1).
fn random_biguint(bits: u64) -> BigUint {
    let mut bytes = vec![0u8; (bits / 8) as usize];
    rand::rng().fill(&mut bytes[..]);
    bytes[0] &= 0x7f;
    BigUint::from_bytes_be(&bytes)
}

/// Builds the `block_size - 1` byte block `[type][filler...][0][data]`.
fn pkcs_pad(data: &[u8], block_size: usize, padding: PkcsPadding) -> Result<Vec<u8>> {
    let buffer_len = block_size - 1;
    // Type byte, at least one filler byte, the zero terminator.
    if data.len() + 3 > buffer_len {
        return Err(ProtocolError::CryptoVerification(format!(
            "value of {} bytes does not fit a {buffer_len}-byte padded block",
            data.len()
        )));
    }

    let mut buffer = vec![0u8; buffer_len];
    let data_start = buffer_len - data.len();
    buffer[0] = padding.type_byte();
    buffer[data_start..].copy_from_slice(data);

    let mut rng = rand::rng();
    for slot in &mut buffer[1..data_start - 1] {
        *slot = match padding {
            PkcsPadding::MaxByte => u8::MAX,
            PkcsPadding::RandomByte => rng.random_range(1..=u8::MAX),
        };
    }
    // buffer[data_start - 1] stays zero: the terminator.

    Ok(buffer)
}

/// Strips the padded block, returning the decimal value it carries.
/// A block without a zero terminator is a fatal decode error.
fn unpad_decimal(padded: &BigUint) -> Result<BigUint> {
    let data = padded.to_bytes_be();
    let zero = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::CryptoVerification(constants::ERR_MISSING_TERMINATOR.into()))?;

    let decimal = &data[zero + 1..];
    BigUint::parse_bytes(decimal, 10)
        .ok_or_else(|| ProtocolError::CryptoVerification(constants::ERR_NOT_DECIMAL.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1023-bit RSA test key (n, e=65537, d). Test fixture only.
    const TEST_MODULUS: &str = "6e940500ae97bbb6b5a5461f146352ff47ea9f3f707485beff96c20475c862fcb993000b81d458d57df581cc8eda727009eeed92c6cc92b1cca31d544c837c18bbaa605998a817387ff86b60d0385a80ea0a87ce719c4e8a254b60f522a35955f95710757b3cf1d323372f0d6f2c28acdcb8bb0f393bc6aad921c682ff6ef037";
    const TEST_PRIVATE: &str = "4e7acd662383db1d1ca455351fb232a8adb0ee1f07401be067e3e68565d6b7b2683ed56c5553914ccc5ddf268048b7a99ed32d57dbb23b76e726e95cf804e5a073365b3a021be681f6c222692c9a4abee3ab3bc0f24507fc05ed7d7ed79eab2f40c29deda67c5f7b3b0d437b043b5cd346129b4e652089e47b77335c01d60751";

    fn client() -> KeyExchange {
        KeyExchange::new(65537, TEST_MODULUS).unwrap()
    }

    fn server() -> KeyExchange {
        KeyExchange::with_private(65537, TEST_MODULUS, TEST_PRIVATE).unwrap()
    }

    #[test]
    fn rejects_prime_of_two() {
        let mut kx = client();
        assert!(matches!(
            kx.verify_primes("2", "1"),
            Err(ProtocolError::InvalidHandshakeParameters(_))
        ));
    }

    #[test]
    fn rejects_prime_of_one() {
        let mut kx = client();
        assert!(matches!(
            kx.verify_primes("1", "1"),
            Err(ProtocolError::InvalidHandshakeParameters(_))
        ));
    }

    #[test]
    fn rejects_generator_not_below_prime() {
        let mut kx = client();
        // p = 23, g = 23
        assert!(matches!(
            kx.verify_primes("17", "17"),
            Err(ProtocolError::InvalidHandshakeParameters(_))
        ));
        // g > p
        assert!(matches!(
            kx.verify_primes("17", "18"),
            Err(ProtocolError::InvalidHandshakeParameters(_))
        ));
    }

    #[test]
    fn accepts_small_valid_group_and_generates_public() {
        let mut kx = client();
        // p = 23, g = 5
        kx.verify_primes("17", "5").unwrap();
        let public = kx.dh_public().unwrap();
        assert!(*public < BigUint::from(23u8));
    }

    #[test]
    fn pad_unpad_roundtrip_both_policies() {
        for padding in [PkcsPadding::MaxByte, PkcsPadding::RandomByte] {
            let padded = pkcs_pad(b"12345", 128, padding).unwrap();
            assert_eq!(padded.len(), 127);
            assert_eq!(padded[0], padding.type_byte());
            let value = unpad_decimal(&BigUint::from_bytes_be(&padded)).unwrap();
            assert_eq!(value, BigUint::from(12345u32));
        }
    }

    #[test]
    fn unpad_without_terminator_is_rejected() {
        // All 0xFF: no zero byte anywhere.
        let block = BigUint::from_bytes_be(&[0xFFu8; 64]);
        assert!(matches!(
            unpad_decimal(&block),
            Err(ProtocolError::CryptoVerification(_))
        ));
    }

    #[test]
    fn oversized_value_does_not_fit_block() {
        let data = vec![b'9'; 200];
        assert!(pkcs_pad(&data, 128, PkcsPadding::MaxByte).is_err());
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let mut signer = server();
        let value = BigUint::from(987654321u64);
        let signed = signer.sign(&value).unwrap();
        let recovered = client().verify(&signed).unwrap();
        assert_eq!(recovered, value);
    }

    #[test]
    fn encrypt_then_decrypt_roundtrip() {
        let mut sender = client();
        sender.set_padding(PkcsPadding::RandomByte);
        let value = BigUint::from(42u8);
        let encrypted = sender.encrypt(&value).unwrap();
        let recovered = server().decrypt(&encrypted).unwrap();
        assert_eq!(recovered, value);
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let mut signer = server();
        let signed = signer.sign(&BigUint::from(7u8)).unwrap();
        let mut tampered = signed.into_bytes();
        tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        // Either the terminator is gone or the payload is not decimal.
        assert!(client().verify(&tampered).is_err());
    }

    #[test]
    fn full_exchange_derives_matching_secrets() {
        let mut server = server();
        let mut client = client();

        let signed_p = server.signed_prime_hex().unwrap();
        let signed_g = server.signed_generator_hex().unwrap();
        client.verify_signed_primes(&signed_p, &signed_g).unwrap();
        client.set_padding(PkcsPadding::RandomByte);

        let client_public = client.public_key_hex().unwrap();
        let server_public = server.public_key_hex().unwrap();

        let server_secret = server.derive_shared_key(&client_public).unwrap();
        let client_secret = client.derive_shared_key(&server_public).unwrap();
        assert_eq!(server_secret, client_secret);
        assert!(!server_secret.is_empty());
    }

    #[test]
    fn block_size_follows_modulus_width() {
        assert_eq!(client().block_size, 128);
    }
}
