//! `ENC:` secret decryption.
//!
//! AES-256-GCM keyed by a master key run through scrypt with a fixed salt:
//! a 16-byte IV, then ciphertext, then a 16-byte auth tag, all concatenated
//! and base64-encoded after the `ENC:` prefix. The 16-byte nonce is
//! non-standard for GCM (the usual choice is 12 bytes); we instantiate the
//! generic `AesGcm<Aes256, U16>` form instead of the crate's `Aes256Gcm`
//! alias to match it, matching the wire format produced by the systems
//! that originally encrypted these secrets.
//!
//! The fixed salt means two runs with the same master key derive the same
//! encryption key; that's the point (it lets an operator decrypt a value
//! encrypted by a different run of the CLI), not an oversight.

use aes::Aes256;
use aes_gcm::aead::{consts::U16, Aead, KeyInit};
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use scrypt::Params;

use crate::errors::{ApiloomError, Result};

type Aes256Gcm16 = AesGcm<Aes256, U16>;

const ENC_PREFIX: &str = "ENC:";
const FIXED_SALT: &[u8] = b"apiloom-enc-fixed-salt-v1";
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// `log_n = 14, r = 8, p = 1` — scrypt's recommended interactive-use
/// parameters, per the crate's own docs.
fn scrypt_params() -> Params {
    Params::new(14, 8, 1, 32).expect("fixed scrypt parameters are valid")
}

fn derive_key(master_key: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    scrypt::scrypt(master_key, FIXED_SALT, &scrypt_params(), &mut key)
        .map_err(|e| ApiloomError::EncryptionError(format!("key derivation failed: {e}")))?;
    Ok(key)
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX)
}

/// Decrypts a full `ENC:<base64>` value. Errors if the prefix is missing,
/// the payload is too short to contain a nonce and tag, or authentication
/// fails (wrong master key or tampered ciphertext).
pub fn decrypt(value: &str, master_key: &[u8]) -> Result<String> {
    let payload = value.strip_prefix(ENC_PREFIX).ok_or_else(|| {
        ApiloomError::EncryptionError(format!("value is not ENC:-prefixed: {value}"))
    })?;
    let raw = BASE64.decode(payload)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(ApiloomError::EncryptionError(
            "encrypted payload shorter than nonce + tag".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext_and_tag) = raw.split_at(NONCE_LEN);

    let key = derive_key(master_key)?;
    let cipher = Aes256Gcm16::new_from_slice(&key)
        .map_err(|e| ApiloomError::EncryptionError(format!("bad key length: {e}")))?;
    let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext_and_tag)
        .map_err(|e| ApiloomError::EncryptionError(format!("decryption failed: {e}")))?;
    String::from_utf8(plaintext)
        .map_err(|e| ApiloomError::EncryptionError(format!("decrypted payload is not utf-8: {e}")))
}

/// Encrypts `plaintext` into an `ENC:<base64>` value. Used by the CLI's
/// `encrypt` subcommand, not by the Substitutor (which only decrypts).
pub fn encrypt(plaintext: &str, master_key: &[u8]) -> Result<String> {
    let key = derive_key(master_key)?;
    let cipher = Aes256Gcm16::new_from_slice(&key)
        .map_err(|e| ApiloomError::EncryptionError(format!("bad key length: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(&nonce_bytes);

    let ciphertext_and_tag = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| ApiloomError::EncryptionError(format!("encryption failed: {e}")))?;

    let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext_and_tag.len());
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&ciphertext_and_tag);
    Ok(format!("{ENC_PREFIX}{}", BASE64.encode(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = b"correct horse battery staple";
        let enc = encrypt("server=db;password=hunter2", key).unwrap();
        assert!(is_encrypted(&enc));
        let plain = decrypt(&enc, key).unwrap();
        assert_eq!(plain, "server=db;password=hunter2");
    }

    #[test]
    fn wrong_master_key_fails_to_decrypt() {
        let enc = encrypt("secret", b"key-one").unwrap();
        let result = decrypt(&enc, b"key-two");
        assert!(result.is_err());
    }

    #[test]
    fn missing_prefix_is_rejected() {
        let result = decrypt("not-encrypted-value", b"key");
        assert!(result.is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let short = format!("{ENC_PREFIX}{}", BASE64.encode(b"too short"));
        let result = decrypt(&short, b"key");
        assert!(result.is_err());
    }
}
