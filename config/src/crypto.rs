//! At-rest protection for the backend credential.
//!
//! AES-256-GCM with a key derived from the hostname and username, so a copied
//! store file is useless on another machine or account.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;

fn derive_key() -> [u8; 32] {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
    let username = whoami::username();

    let mut hasher = Sha256::new();
    hasher.update(b"armin-credential-encryption-v1");
    hasher.update(hostname.as_bytes());
    hasher.update(b":");
    hasher.update(username.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Encrypt a credential. Output is base64 of `nonce || ciphertext`.
pub fn seal_credential(plaintext: &str) -> Result<String, String> {
    let cipher = Aes256Gcm::new_from_slice(&derive_key())
        .map_err(|e| format!("Failed to create cipher: {}", e))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&combined))
}

/// Reverse of [`seal_credential`].
pub fn open_credential(sealed: &str) -> Result<String, String> {
    let cipher = Aes256Gcm::new_from_slice(&derive_key())
        .map_err(|e| format!("Failed to create cipher: {}", e))?;

    let combined = BASE64
        .decode(sealed)
        .map_err(|e| format!("Failed to decode base64: {}", e))?;

    if combined.len() < NONCE_SIZE {
        return Err("Sealed credential too short".to_string());
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| format!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8 in credential: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal_credential("AIza-test-key").expect("seal failed");
        assert_ne!(sealed, "AIza-test-key");
        assert_eq!(open_credential(&sealed).expect("open failed"), "AIza-test-key");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let a = seal_credential("same").unwrap();
        let b = seal_credential("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(open_credential("not-valid-base64!!!").is_err());
        assert!(open_credential(&BASE64.encode(b"short")).is_err());
    }
}
