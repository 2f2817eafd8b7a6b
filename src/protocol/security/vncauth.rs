//! VNC Authentication (RFC 6143 section 7.2.2): the server issues a random
//! 16-byte challenge and the client returns it encrypted with DES under a
//! key derived from the password.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;

pub(crate) const CHALLENGE_LEN: usize = 16;

/// Derive the DES key from a password: truncate or zero-pad to 8 bytes,
/// then reverse the bit order of every byte. The reversal is a historical
/// quirk of the protocol, not of DES.
pub(crate) fn password_key(password: &str) -> [u8; 8] {
    let mut key = [0_u8; 8];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }
    key
}

/// The response a client holding `password` is expected to produce: each
/// 8-byte half of the challenge encrypted independently (ECB) under the
/// derived key.
pub(crate) fn expected_response(
    password: &str,
    challenge: &[u8; CHALLENGE_LEN],
) -> [u8; CHALLENGE_LEN] {
    let key = password_key(password);
    let mut response = [0_u8; CHALLENGE_LEN];

    let mut half = [0_u8; 8];
    half.copy_from_slice(&challenge[..8]);
    encrypt_block(key, &mut half);
    response[..8].copy_from_slice(&half);

    half.copy_from_slice(&challenge[8..]);
    encrypt_block(key, &mut half);
    response[8..].copy_from_slice(&half);

    response
}

/// Encrypt one 8-byte block under an 8-byte key. The single point of
/// contact with the DES implementation.
fn encrypt_block(key: [u8; 8], block: &mut [u8; 8]) {
    let cipher = Des::new(&key.into());
    cipher.encrypt_block(block.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_truncated_padded_and_bit_reversed() {
        // 'p' = 0x70 reverses to 0x0e, 'w' = 0x77 to 0xee.
        assert_eq!(password_key("pw"), [0x0e, 0xee, 0, 0, 0, 0, 0, 0]);
        // Only the first eight bytes of the password take part.
        assert_eq!(
            password_key("longpassword"),
            password_key("longpass")
        );
    }

    #[test]
    fn halves_are_encrypted_independently() {
        let challenge = [0_u8; CHALLENGE_LEN];
        let response = expected_response("pw", &challenge);
        // Identical plaintext halves give identical ciphertext halves in ECB.
        assert_eq!(response[..8], response[8..]);
        assert_ne!(response, challenge);
    }

    #[test]
    fn response_depends_on_the_password() {
        let mut challenge = [0_u8; CHALLENGE_LEN];
        challenge[3] = 0x5a;
        assert_ne!(
            expected_response("abc", &challenge),
            expected_response("xyz", &challenge)
        );
    }
}
