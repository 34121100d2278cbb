//! # Signing & Verification
//!
//! Ed25519 signatures over immutable payload hashes. Keys and signatures are
//! fixed-length byte strings (32-byte keys, 64-byte signatures) and travel as
//! lower-case hex.
//!
//! The signed message is the 32 raw digest bytes of the payload hash, not its
//! hex text. Only the public key is ever serialized into an artifact.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::path::Path;

use crate::error::{ProvenanceError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Private signing key. `Debug` never prints key material.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

/// Public verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

/// Generate a fresh keypair from the OS random source.
///
/// **Not for production use.** Locally generated keys are meant for tests and
/// dry runs; production deployments load signing keys from a managed secret
/// store via [`PrivateKey::load`].
pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public = PublicKey(signing_key.verifying_key());
    (PrivateKey(signing_key), public)
}

/// Sign a hex-encoded payload hash, returning the hex signature.
pub fn sign(payload_hash: &str, private_key: &PrivateKey) -> Result<String> {
    let message = decode_payload_hash(payload_hash)
        .ok_or_else(|| ProvenanceError::crypto(format!("invalid payload hash: {payload_hash}")))?;
    let signature = private_key.0.sign(&message);
    Ok(hex::encode(signature.to_bytes()))
}

/// Verify a hex signature over a hex payload hash. Never fails; malformed
/// input of any kind yields `false`.
pub fn verify(payload_hash: &str, signature: &str, public_key: &str) -> bool {
    let Some(message) = decode_payload_hash(payload_hash) else {
        return false;
    };
    let Ok(public_key) = PublicKey::from_hex(public_key) else {
        return false;
    };
    let Some(signature) = decode_fixed::<SIGNATURE_LEN>(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature);
    public_key.0.verify(&message, &signature).is_ok()
}

impl PrivateKey {
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = decode_fixed::<32>(hex_key.trim())
            .ok_or_else(|| ProvenanceError::crypto("private key must be 32 bytes of hex"))?;
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Load a hex-encoded private key from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvenanceError::crypto(format!(
                "cannot read private key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_hex(&content)
    }

    /// Write the key as hex to `path`, owner-readable only on Unix.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        std::io::Write::write_all(&mut file, format!("{}\n", self.to_hex()).as_bytes())?;
        Ok(())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

impl PublicKey {
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = decode_fixed::<PUBLIC_KEY_LEN>(hex_key.trim())
            .ok_or_else(|| ProvenanceError::crypto("public key must be 32 bytes of hex"))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| ProvenanceError::crypto(format!("invalid public key: {e}")))?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvenanceError::crypto(format!("cannot read public key {}: {e}", path.display()))
        })?;
        Self::from_hex(&content)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn decode_payload_hash(payload_hash: &str) -> Option<[u8; 32]> {
    decode_fixed::<32>(payload_hash)
}

fn decode_fixed<const N: usize>(hex_str: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}
