//! RSA Server Identity
//!
//! The server proves its identity by decrypting values a client encrypted
//! against its published public key. At load time the PEM private key is
//! parsed and the public thumbprint string is computed once; both are
//! read-only afterwards and shared across connections.

use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;

/// Keys larger than this are rejected at load.
pub const MAX_KEY_BITS: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read private key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("private key is {0} bits; keys above {MAX_KEY_BITS} bits are not accepted")]
    TooLarge(usize),
}

/// The loaded private key plus its published thumbprint.
pub struct ServerIdentity {
    key: RsaPrivateKey,
    thumbprint: String,
}

impl ServerIdentity {
    /// Load a PEM private key (PKCS#1 or PKCS#8) from disk.
    pub fn load(path: &Path, hostname: &str) -> Result<Self, KeyError> {
        let pem = fs::read_to_string(path)?;
        Self::from_pem(&pem, hostname)
    }

    pub fn from_pem(pem: &str, hostname: &str) -> Result<Self, KeyError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        let bits = key.n().bits();
        if bits > MAX_KEY_BITS {
            return Err(KeyError::TooLarge(bits));
        }

        // "<nbits> <e decimal> <n decimal> root@<hostname>" — what
        // RSAPUBLIC returns verbatim.
        let thumbprint = format!("{bits} {} {} root@{hostname}", key.e(), key.n());

        Ok(Self { key, thumbprint })
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Decrypt an RSAVALIDATE challenge with PKCS#1 v1.5 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.key.decrypt(Pkcs1v15Encrypt, ciphertext)
    }

    /// The public half, for clients of the library (and tests) that need
    /// to encrypt a challenge.
    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.key)
    }
}
