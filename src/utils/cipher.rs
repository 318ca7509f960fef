//! # Stream Cipher
//!
//! Keyed pseudorandom byte-stream XOR cipher (RC4 class), applied
//! symmetrically but with one independent instance per direction.
//!
//! The transport needs to inspect decrypted bytes before committing to
//! having consumed them, so [`Rc4::apply_in_place`] supports a peek mode
//! that snapshots and restores the full cipher state, guaranteeing zero
//! observable mutation. Mutation is serialized by `&mut self`; the
//! transport keeps each direction's instance behind its half of the
//! socket so concurrent producers queue on the send lock.

/// RC4 keystream generator. State advances irreversibly on every byte
/// processed unless peek mode is requested.
#[derive(Clone)]
pub struct Rc4 {
    table: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Builds the 256-slot permutation from a key of arbitrary length
    /// via the standard key-scheduling pass.
    ///
    /// # Panics
    /// Panics on an empty key; key material always comes from a derived
    /// shared secret, which is never empty.
    pub fn new(key: &[u8]) -> Self {
        assert!(!key.is_empty(), "cipher key must not be empty");

        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8;
        }

        let mut x = 0u8;
        for i in 0..256 {
            x = x.wrapping_add(table[i]).wrapping_add(key[i % key.len()]);
            table.swap(i, x as usize);
        }

        Self { table, i: 0, j: 0 }
    }

    /// Processes `data` into a new buffer, advancing cipher state.
    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_in_place(&mut out, false);
        out
    }

    /// XORs the keystream over `data` in place. With `peek` set, the
    /// running indices and the permutation table are restored afterward
    /// so subsequent output is unchanged from the pre-peek state.
    pub fn apply_in_place(&mut self, data: &mut [u8], peek: bool) {
        let snapshot = if peek { Some((self.i, self.j, self.table)) } else { None };

        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.table[self.i as usize]);
            self.table.swap(self.i as usize, self.j as usize);

            let index = self.table[self.i as usize].wrapping_add(self.table[self.j as usize]);
            *byte ^= self.table[index as usize];
        }

        if let Some((i, j, table)) = snapshot {
            self.i = i;
            self.j = j;
            self.table = table;
        }
    }
}

impl std::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key-derived state.
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Classic RC4 test vector: key "Key", plaintext "Plaintext".
        let mut cipher = Rc4::new(b"Key");
        let ciphertext = cipher.apply(b"Plaintext");
        assert_eq!(hex::encode(&ciphertext), "bbf316e8d940af0ad3");
    }

    #[test]
    fn same_key_same_keystream() {
        let mut a = Rc4::new(&[1, 2, 3, 4, 5]);
        let mut b = Rc4::new(&[1, 2, 3, 4, 5]);
        let zeros = [0u8; 64];
        assert_eq!(a.apply(&zeros), b.apply(&zeros));
    }

    #[test]
    fn symmetric_roundtrip() {
        let key = [9u8, 8, 7];
        let plaintext = b"length-prefixed frame body".to_vec();
        let mut enc = Rc4::new(&key);
        let mut dec = Rc4::new(&key);
        let ciphertext = enc.apply(&plaintext);
        assert_ne!(ciphertext, plaintext);
        assert_eq!(dec.apply(&ciphertext), plaintext);
    }

    #[test]
    fn peek_leaves_state_untouched() {
        let mut cipher = Rc4::new(b"secret");
        let mut reference = Rc4::new(b"secret");

        let mut peeked = [0xAAu8; 32];
        cipher.apply_in_place(&mut peeked, true);

        // A real pass over the same bytes yields the same result...
        let mut committed = [0xAAu8; 32];
        cipher.apply_in_place(&mut committed, false);
        assert_eq!(peeked, committed);

        // ...and the peek alone did not advance the instance.
        let tail = cipher.apply(&[0u8; 16]);
        reference.apply_in_place(&mut [0xAAu8; 32], false);
        assert_eq!(tail, reference.apply(&[0u8; 16]));
    }

    #[test]
    fn state_advances_across_calls() {
        let mut cipher = Rc4::new(b"k");
        let first = cipher.apply(&[0u8; 8]);
        let second = cipher.apply(&[0u8; 8]);
        assert_ne!(first, second);
    }
}
