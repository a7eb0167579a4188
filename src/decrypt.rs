//! Conditional decryption of protected class entries.
//!
//! Entries whose path carries the protected marker (and not the synthetic
//! marker) are run through a keyed [`Decryptor`] before parsing. Everything else
//! passes through untouched.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, DecryptionError};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const KEY_LEN: usize = 10;

/// Symmetric key plus the auxiliary derivation seed, owned by one scan session.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    seed: String,
}

impl KeyMaterial {
    pub const KEY_LEN: usize = KEY_LEN;

    pub fn new(key: &[u8], seed: impl Into<String>) -> Result<Self, ConfigError> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| ConfigError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        let seed = seed.into();
        if seed.is_empty() {
            return Err(ConfigError::EmptySeed);
        }
        Ok(Self { key, seed })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// Keyed transform applied to protected entries.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, bytes: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, DecryptionError>;
}

/// AES-256-CBC with PKCS#7 padding.
///
/// The cipher key is `SHA-256(key || seed)` and the IV is the first 16 bytes of
/// `SHA-256(seed || key)`, so the transform is fully determined by the key material.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesCbcCipher;

impl AesCbcCipher {
    fn derive(key: &KeyMaterial) -> ([u8; 32], [u8; 16]) {
        let cipher_key: [u8; 32] = Sha256::new()
            .chain_update(key.key())
            .chain_update(key.seed().as_bytes())
            .finalize()
            .into();
        let iv_digest = Sha256::new()
            .chain_update(key.seed().as_bytes())
            .chain_update(key.key())
            .finalize();
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&iv_digest[..16]);
        (cipher_key, iv)
    }

    /// Producer side of [`Decryptor::decrypt`].
    pub fn encrypt(&self, plaintext: &[u8], key: &KeyMaterial) -> Vec<u8> {
        let (cipher_key, iv) = Self::derive(key);
        Aes256CbcEnc::new(&cipher_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }
}

impl Decryptor for AesCbcCipher {
    fn decrypt(&self, bytes: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, DecryptionError> {
        let (cipher_key, iv) = Self::derive(key);
        Aes256CbcDec::new(&cipher_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(bytes)
            .map_err(|e| DecryptionError::Transform(e.to_string()))
    }
}

/// Path predicate deciding which entries are decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    protected_marker: String,
    synthetic_marker: String,
}

impl PathRule {
    /// An empty `synthetic_marker` disables the exclusion.
    pub fn new(
        protected_marker: impl Into<String>,
        synthetic_marker: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let protected_marker = protected_marker.into();
        if protected_marker.is_empty() {
            return Err(ConfigError::EmptyProtectedMarker);
        }
        Ok(Self {
            protected_marker,
            synthetic_marker: synthetic_marker.into(),
        })
    }

    pub fn applies_to(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path.contains(self.protected_marker.as_str())
            && (self.synthetic_marker.is_empty()
                || !path.contains(self.synthetic_marker.as_str()))
    }
}

/// Forward slashes, no leading `./` or `/`. Case is preserved.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    let path: Cow<'_, str> = if path.contains('\\') {
        Cow::Owned(path.replace('\\', "/"))
    } else {
        Cow::Borrowed(path)
    };

    let mut start = 0;
    loop {
        let rest = &path[start..];
        if rest.starts_with("./") {
            start += 2;
        } else if rest.starts_with('/') {
            start += 1;
        } else {
            break;
        }
    }

    match path {
        Cow::Borrowed(s) => Cow::Borrowed(&s[start..]),
        Cow::Owned(s) if start == 0 => Cow::Owned(s),
        Cow::Owned(s) => Cow::Owned(s[start..].to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutput {
    pub bytes: Vec<u8>,
    pub decrypted: bool,
}

#[derive(Clone)]
struct ActiveGate {
    rule: PathRule,
    key: KeyMaterial,
    decryptor: Arc<dyn Decryptor>,
}

#[derive(Clone, Default)]
pub struct DecryptionGate {
    active: Option<ActiveGate>,
}

impl fmt::Debug for DecryptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active {
            Some(active) => f
                .debug_struct("DecryptionGate")
                .field("rule", &active.rule)
                .field("key", &active.key)
                .finish(),
            None => f.write_str("DecryptionGate(disabled)"),
        }
    }
}

impl DecryptionGate {
    pub fn new(rule: PathRule, key: KeyMaterial, decryptor: Arc<dyn Decryptor>) -> Self {
        Self {
            active: Some(ActiveGate {
                rule,
                key,
                decryptor,
            }),
        }
    }

    /// A gate that forwards every entry unchanged.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.rule.applies_to(path))
    }

    /// Runs the keyed transform regardless of path, for bytes already known to be protected.
    pub fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        match self.active.as_ref() {
            Some(active) => active.decryptor.decrypt(bytes, &active.key),
            None => Err(DecryptionError::Transform(
                "no key material configured".to_string(),
            )),
        }
    }

    pub fn apply(&self, path: &str, bytes: Vec<u8>) -> Result<GateOutput, DecryptionError> {
        let Some(active) = self.active.as_ref() else {
            return Ok(GateOutput {
                bytes,
                decrypted: false,
            });
        };
        if bytes.is_empty() || !active.rule.applies_to(path) {
            return Ok(GateOutput {
                bytes,
                decrypted: false,
            });
        }

        let plain = active.decryptor.decrypt(&bytes, &active.key)?;
        Ok(GateOutput {
            bytes: plain,
            decrypted: true,
        })
    }
}
