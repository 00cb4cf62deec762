//! Privacy key pairs and their encrypted at-rest form.
//!
//! Each privacy-enabled address owns two key pairs: the view pair scans
//! incoming outputs, the spend pair authorizes spends. The private halves
//! are persisted only under authenticated encryption keyed from the
//! wallet password (Argon2id -> ChaCha20-Poly1305) and decrypted on
//! demand.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::WalletError,
    types::{PrivateKey, PublicKey},
};

/// Argon2 parameters for the password-derived key.
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// In-memory key material of one privacy-enabled address.
#[derive(Clone)]
pub struct PrivacyKeys {
    pub view_priv: PrivateKey,
    pub view_pub: PublicKey,
    pub spend_priv: PrivateKey,
    pub spend_pub: PublicKey,
}

impl PrivacyKeys {
    pub fn public_pair(&self) -> PublicKeyPair {
        PublicKeyPair {
            view_pub: self.view_pub,
            spend_pub: self.spend_pub,
        }
    }
}

/// A recipient's long-term public halves: `view_pub || spend_pub`,
/// exchanged as 64 bytes of hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyPair {
    pub view_pub: PublicKey,
    pub spend_pub: PublicKey,
}

impl PublicKeyPair {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() != 64 {
            return Err(WalletError::InvalidPubKeyLen(bytes.len()));
        }
        Ok(Self {
            view_pub: PublicKey::from_bytes(&bytes[..32])?,
            spend_pub: PublicKey::from_bytes(&bytes[32..])?,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(s)
            .map_err(|_| WalletError::InvalidParams("public key pair is not valid hex"))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        let mut pair = Vec::with_capacity(64);
        pair.extend_from_slice(self.view_pub.as_bytes());
        pair.extend_from_slice(self.spend_pub.as_bytes());
        hex::encode(pair)
    }
}

/// At-rest record of one address's privacy keys. Public halves stay in
/// clear for scanning setup; the concatenated private halves are sealed
/// with the wallet password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPrivacyKeys {
    pub view_pub: PublicKey,
    pub spend_pub: PublicKey,
    /// Argon2 salt, base64.
    salt: String,
    /// ChaCha20-Poly1305 nonce, hex.
    nonce: String,
    /// Encrypted `view_priv || spend_priv`, hex.
    ciphertext: String,
}

impl EncryptedPrivacyKeys {
    /// Seal key material under the wallet password.
    pub fn seal(keys: &PrivacyKeys, password: &str) -> Result<Self, WalletError> {
        let salt = SaltString::generate(&mut OsRng);
        let key = derive_key(password, salt.as_str())?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill(&mut nonce_bytes);

        let mut plaintext = Zeroizing::new(Vec::with_capacity(64));
        plaintext.extend_from_slice(keys.view_priv.as_bytes());
        plaintext.extend_from_slice(keys.spend_priv.as_bytes());

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| WalletError::Crypto("failed to create cipher".to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| WalletError::Crypto("key encryption failed".to_string()))?;

        Ok(Self {
            view_pub: keys.view_pub,
            spend_pub: keys.spend_pub,
            salt: salt.to_string(),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Decrypt the private halves. A wrong password surfaces as
    /// `WalletLocked`.
    pub fn open(&self, password: &str) -> Result<PrivacyKeys, WalletError> {
        let key = derive_key(password, &self.salt)?;

        let nonce_bytes = hex::decode(&self.nonce)
            .map_err(|_| WalletError::Serialization("invalid nonce encoding".to_string()))?;
        if nonce_bytes.len() != 12 {
            return Err(WalletError::Serialization("invalid nonce length".to_string()));
        }
        let ciphertext = hex::decode(&self.ciphertext)
            .map_err(|_| WalletError::Serialization("invalid ciphertext encoding".to_string()))?;

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| WalletError::Crypto("failed to create cipher".to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(nonce, ciphertext.as_slice())
                .map_err(|_| WalletError::WalletLocked)?,
        );
        if plaintext.len() != 64 {
            return Err(WalletError::Serialization(
                "unexpected key material length".to_string(),
            ));
        }

        Ok(PrivacyKeys {
            view_priv: PrivateKey::from_bytes(&plaintext[..32])?,
            view_pub: self.view_pub,
            spend_priv: PrivateKey::from_bytes(&plaintext[32..])?,
            spend_pub: self.spend_pub,
        })
    }

    pub fn public_pair(&self) -> PublicKeyPair {
        PublicKeyPair {
            view_pub: self.view_pub,
            spend_pub: self.spend_pub,
        }
    }
}

/// Derive a 32-byte encryption key from the wallet password with
/// Argon2id.
fn derive_key(password: &str, salt: &str) -> Result<[u8; 32], WalletError> {
    let salt = SaltString::from_b64(salt)
        .map_err(|_| WalletError::Serialization("invalid salt format".to_string()))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            ARGON2_MEMORY_KB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(32),
        )
        .map_err(|_| WalletError::Crypto("invalid Argon2 parameters".to_string()))?,
    );

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| WalletError::Crypto("key derivation failed".to_string()))?;
    let hash_output = hash
        .hash
        .ok_or_else(|| WalletError::Crypto("no hash output".to_string()))?;

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash_output.as_bytes()[..32]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> PrivacyKeys {
        PrivacyKeys {
            view_priv: PrivateKey::from([1u8; 32]),
            view_pub: PublicKey::from([2u8; 32]),
            spend_priv: PrivateKey::from([3u8; 32]),
            spend_pub: PublicKey::from([4u8; 32]),
        }
    }

    #[test]
    fn pair_hex_roundtrip() {
        let pair = sample_keys().public_pair();
        let hex = pair.to_hex();
        assert_eq!(hex.len(), 128);
        assert_eq!(PublicKeyPair::from_hex(&hex).unwrap(), pair);
    }

    #[test]
    fn pair_rejects_wrong_length() {
        match PublicKeyPair::from_bytes(&[0u8; 63]) {
            Err(WalletError::InvalidPubKeyLen(63)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(PublicKeyPair::from_hex("abcd").is_err());
        assert!(PublicKeyPair::from_hex("zz").is_err());
    }

    #[test]
    fn seal_open_roundtrip() {
        let keys = sample_keys();
        let sealed = EncryptedPrivacyKeys::seal(&keys, "hunter2").unwrap();
        let opened = sealed.open("hunter2").unwrap();
        assert_eq!(opened.view_priv, keys.view_priv);
        assert_eq!(opened.spend_priv, keys.spend_priv);
        assert_eq!(opened.view_pub, keys.view_pub);
        assert_eq!(opened.spend_pub, keys.spend_pub);
    }

    #[test]
    fn wrong_password_reads_as_locked() {
        let sealed = EncryptedPrivacyKeys::seal(&sample_keys(), "hunter2").unwrap();
        match sealed.open("wrong") {
            Err(WalletError::WalletLocked) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
            Ok(_) => panic!("unexpected: open succeeded with wrong password"),
        }
    }
}
