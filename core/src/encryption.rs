//! Field-level AES-256-GCM encryption for assignee names.
//!
//! Encrypted values look like `ENC:<base64(nonce || ciphertext || tag)>`. A
//! document with encrypted fields carries `"__encrypted__": true`.

use aes_gcm::Aes256Gcm;
use aes_gcm::KeyInit;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::AeadCore;
use aes_gcm::aead::OsRng;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use sha2::Digest;
use sha2::Sha256;
use std::fmt;

use crate::error::Result;
use crate::error::TeamError;
use crate::model::Project;

pub const KEY_ENV_VAR: &str = "TEAM_ENCRYPTION_KEY";
pub const ENCRYPTED_PREFIX: &str = "ENC:";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

/// 44-char keys are base64 of 32 raw bytes; anything else is a passphrase.
fn derive_key(key: &str) -> [u8; KEY_LEN] {
    let decoded = if key.len() == 44 {
        BASE64_URL
            .decode(key.as_bytes())
            .or_else(|_| BASE64.decode(key.as_bytes()))
            .ok()
    } else {
        None
    };
    let material = decoded.unwrap_or_else(|| Sha256::digest(key.as_bytes()).to_vec());
    if material.len() == KEY_LEN {
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&material);
        out
    } else {
        Sha256::digest(&material).into()
    }
}

impl FieldCipher {
    pub fn from_key(key: &str) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(TeamError::Encryption("encryption key is empty".into()));
        }
        let bytes = derive_key(key);
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| TeamError::Encryption("invalid key length".into()))?;
        Ok(Self { cipher })
    }

    /// A fresh random key in the 44-character base64 form.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        BASE64_URL.encode(key)
    }

    /// Values that already carry the prefix are returned unchanged.
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        if is_encrypted(plain) {
            return Ok(plain.to_string());
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| TeamError::Encryption("encryption failed".into()))?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(payload)))
    }

    pub fn decrypt(&self, value: &str) -> Result<String> {
        let Some(encoded) = value.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(value.to_string());
        };
        let payload = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| TeamError::Encryption(format!("invalid payload: {e}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(TeamError::Encryption("payload too short".into()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| TeamError::Encryption("decryption failed (wrong key?)".into()))?;
        String::from_utf8(plain).map_err(|_| TeamError::Encryption("plaintext is not UTF-8".into()))
    }

    /// Decrypt, or hand back the input when it cannot be decrypted.
    pub fn decrypt_lossy(&self, value: &str) -> String {
        self.decrypt(value).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "field_decrypt_failed");
            value.to_string()
        })
    }

    pub fn encrypt_project(&self, project: &mut Project) -> Result<()> {
        for role in project.teams.iter_mut().flat_map(|t| t.roles.iter_mut()) {
            if let Some(person) = role.assigned_to.as_mut() {
                *person = self.encrypt(person)?;
            }
        }
        project.encrypted = true;
        Ok(())
    }

    pub fn decrypt_project(&self, project: &mut Project) {
        for role in project.teams.iter_mut().flat_map(|t| t.roles.iter_mut()) {
            if let Some(person) = role.assigned_to.as_mut() {
                *person = self.decrypt_lossy(person);
            }
        }
        project.encrypted = false;
    }

    /// Apply to the string members of an audit `details` object.
    pub fn encrypt_fields(&self, details: &mut serde_json::Value, fields: &[&str]) -> Result<()> {
        if let Some(map) = details.as_object_mut() {
            for field in fields {
                if let Some(serde_json::Value::String(s)) = map.get_mut(*field) {
                    *s = self.encrypt(s)?;
                }
            }
        }
        Ok(())
    }

    pub fn decrypt_fields(&self, details: &mut serde_json::Value, fields: &[&str]) {
        if let Some(map) = details.as_object_mut() {
            for field in fields {
                if let Some(serde_json::Value::String(s)) = map.get_mut(*field) {
                    *s = self.decrypt_lossy(s);
                }
            }
        }
    }
}
