//! Frame encryption and device identity hashing.
//!
//! Field devices that opt into encrypted transport send AES-128-ECB
//! ciphertext, base64-encoded into text frames. The same cipher is applied
//! to payload-bearing replies and broker deliveries on the way out.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be exactly 16 bytes")]
    KeyLength,

    #[error("frame is not valid base64: {0}")]
    Transport(#[from] base64::DecodeError),

    #[error("frame failed to decrypt")]
    Decrypt,

    #[error("decrypted frame is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// AES-128-ECB cipher over base64-transported frames.
///
/// Constructed once at startup from the configured key; a bad key is a
/// process-fatal configuration error, never a per-connection one.
pub struct FrameCipher {
    key: [u8; 16],
}

impl FrameCipher {
    pub fn new(key: &str) -> Result<Self, CipherError> {
        let bytes: [u8; 16] = key
            .as_bytes()
            .try_into()
            .map_err(|_| CipherError::KeyLength)?;
        Ok(Self { key: bytes })
    }

    /// Encrypt a plaintext frame and encode it for text transport.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let cipher = Aes128EcbEnc::new(&self.key.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    /// Decode a base64 transport frame and decrypt it back to text.
    pub fn decrypt(&self, transport: &str) -> Result<String, CipherError> {
        let ciphertext = BASE64.decode(transport.trim())?;
        let cipher = Aes128EcbDec::new(&self.key.into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

/// Derive the stable device identity hash from the authenticated username.
///
/// Used as the broker queue name and the key of insert operations.
pub fn device_uid(username: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(username.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef";

    #[test]
    fn test_round_trip() {
        let cipher = FrameCipher::new(KEY).unwrap();
        let frame = cipher.encrypt(r#"{"Data":{"t":21.5}}"#);
        assert_eq!(cipher.decrypt(&frame).unwrap(), r#"{"Data":{"t":21.5}}"#);
    }

    #[test]
    fn test_rejects_wrong_size_key() {
        assert!(matches!(
            FrameCipher::new("short"),
            Err(CipherError::KeyLength)
        ));
        assert!(matches!(
            FrameCipher::new("0123456789abcdef0"),
            Err(CipherError::KeyLength)
        ));
    }

    #[test]
    fn test_rejects_bad_transport() {
        let cipher = FrameCipher::new(KEY).unwrap();
        assert!(matches!(
            cipher.decrypt("not base64 !!!"),
            Err(CipherError::Transport(_))
        ));
    }

    #[test]
    fn test_rejects_garbage_ciphertext() {
        let cipher = FrameCipher::new(KEY).unwrap();
        // Valid base64, but not a multiple of the block size
        let garbage = BASE64.encode(b"abc");
        assert!(cipher.decrypt(&garbage).is_err());
    }

    #[test]
    fn test_decrypt_with_other_key_fails_or_differs() {
        let cipher = FrameCipher::new(KEY).unwrap();
        let other = FrameCipher::new("fedcba9876543210").unwrap();
        let frame = cipher.encrypt("hello");
        match other.decrypt(&frame) {
            Ok(text) => assert_ne!(text, "hello"),
            Err(_) => {}
        }
    }

    #[test]
    fn test_device_uid_is_stable_hex() {
        let uid = device_uid("dev1");
        assert_eq!(uid.len(), 40);
        assert_eq!(uid, device_uid("dev1"));
        assert_ne!(uid, device_uid("dev2"));
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
