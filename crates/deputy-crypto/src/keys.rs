//! Relay signing keys derived from a key file seed via HKDF-SHA256.
//!
//! Flow: key file `{"seed": ...}` → HKDF-SHA256 → 32-byte secret → ed25519 signing key

use std::fmt;
use std::path::Path;

use deputy_types::{bytes_to_hex, hex_to_bytes, DeputyError, Hex, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::Deserialize;
use sha2::Sha256;

const HKDF_INFO: &str = "Deputy.KeyGen";

/// On-disk key material for one signing address.
#[derive(Deserialize)]
pub struct KeyFile {
    pub seed: String,
}

impl KeyFile {
    /// Read `keys/<address>.json`-style key material. Never written by the relay.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeputyError::KeyDerivation(format!("failed to read key file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DeputyError::KeyDerivation(format!("malformed key file {}: {}", path.display(), e))
        })
    }
}

/// Derive a 32-byte secret using HKDF-SHA256.
fn derive_secret(seed: &str, nonce: Option<&str>) -> Result<[u8; 32]> {
    if seed.len() < 16 {
        return Err(DeputyError::SeedTooShort);
    }

    let info = match nonce {
        Some(n) => format!("{}:{}", HKDF_INFO, n),
        None => HKDF_INFO.to_string(),
    };

    // HKDF with no salt (RFC 5869 default: HashLen zeros)
    let hk = Hkdf::<Sha256>::new(None, seed.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| DeputyError::KeyDerivation(e.to_string()))?;

    Ok(okm)
}

/// The relaying account's key pair.
#[derive(Clone)]
pub struct RelayKeyPair {
    signing_key: SigningKey,
}

impl RelayKeyPair {
    /// Derive a key pair from a seed and optional nonce.
    pub fn from_seed(seed: &str, nonce: Option<&str>) -> Result<Self> {
        let secret = derive_secret(seed, nonce)?;
        Ok(Self { signing_key: SigningKey::from_bytes(&secret) })
    }

    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = KeyFile::load(path)?;
        Self::from_seed(&file.seed, None)
    }

    /// Account address: the 0x-prefixed public key.
    pub fn address(&self) -> Hex {
        bytes_to_hex(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign `message`, returning the 64-byte signature as hex.
    pub fn sign(&self, message: &[u8]) -> Hex {
        bytes_to_hex(&self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for RelayKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayKeyPair").field("address", &self.address()).finish()
    }
}

/// Check a hex signature produced by [`RelayKeyPair::sign`].
pub fn verify(address: &str, message: &[u8], signature: &str) -> Result<bool> {
    let pk_bytes: [u8; 32] = hex_to_bytes(address)?
        .try_into()
        .map_err(|_| DeputyError::InvalidHex(format!("bad public key length: {}", address)))?;
    let sig_bytes: [u8; 64] = hex_to_bytes(signature)?
        .try_into()
        .map_err(|_| DeputyError::InvalidHex(format!("bad signature length: {}", signature)))?;

    let key = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| DeputyError::KeyDerivation(e.to_string()))?;
    Ok(key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok())
}
