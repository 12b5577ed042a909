//! `xsalsa20_poly1305_lite` packet sealing.
//!
//! The 24-byte nonce is four random bytes followed by twenty zeros; only the
//! four bytes travel with the packet. The sealed body is laid out as
//! `ciphertext | tag(16) | nonce prefix(4)`.

use rand::RngCore;
use xsalsa20poly1305::{
    XSalsa20Poly1305,
    aead::{AeadInPlace, KeyInit, generic_array::GenericArray},
};

use crate::{
    common::errors::{GatewayError, GatewayResult},
    gateway::{
        constants::{LITE_NONCE_LEN, NONCE_LEN, TAG_LEN},
        params::SessionKey,
    },
};

fn lite_nonce(prefix: [u8; LITE_NONCE_LEN]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..LITE_NONCE_LEN].copy_from_slice(&prefix);
    nonce
}

pub struct LiteCipher {
    cipher: XSalsa20Poly1305,
}

impl LiteCipher {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Seals `payload` with a fresh random nonce and appends the body to
    /// `packet`, which normally already holds the RTP header.
    pub fn seal_into(&self, payload: &[u8], packet: &mut Vec<u8>) -> GatewayResult<()> {
        let mut prefix = [0u8; LITE_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut prefix);
        self.seal_with_prefix(payload, prefix, packet)
    }

    pub fn seal_with_prefix(
        &self,
        payload: &[u8],
        prefix: [u8; LITE_NONCE_LEN],
        packet: &mut Vec<u8>,
    ) -> GatewayResult<()> {
        let start = packet.len();
        packet.extend_from_slice(payload);

        let nonce = lite_nonce(prefix);
        let sealed = self.cipher.encrypt_in_place_detached(
            GenericArray::from_slice(&nonce),
            b"",
            &mut packet[start..],
        );

        match sealed {
            Ok(tag) => {
                packet.extend_from_slice(&tag);
                packet.extend_from_slice(&prefix);
                Ok(())
            }
            Err(_) => {
                packet.truncate(start);
                Err(GatewayError::EncryptionFailure)
            }
        }
    }

    /// Opens a body produced by [`seal_into`](Self::seal_into).
    pub fn open(&self, body: &[u8]) -> GatewayResult<Vec<u8>> {
        if body.len() < TAG_LEN + LITE_NONCE_LEN {
            return Err(GatewayError::EncryptionFailure);
        }

        let (sealed, prefix) = body.split_at(body.len() - LITE_NONCE_LEN);
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut prefix_bytes = [0u8; LITE_NONCE_LEN];
        prefix_bytes.copy_from_slice(prefix);
        let nonce = lite_nonce(prefix_bytes);

        let mut plaintext = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                b"",
                &mut plaintext,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| GatewayError::EncryptionFailure)?;
        Ok(plaintext)
    }
}

/// Decrypts the body of a lite-mode media packet (everything after the RTP
/// header).
pub fn open_lite(key: &SessionKey, body: &[u8]) -> GatewayResult<Vec<u8>> {
    LiteCipher::new(key).open(body)
}
