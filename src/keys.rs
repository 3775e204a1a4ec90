//! ECDSA P-256 key material and the text signature form carried on the wire.
//!
//! Every signature in the protocol (proof-chain steps, channel messages,
//! failure proofs) is the ASCII string `"(r,s)"` with `r` and `s` rendered
//! as decimal big integers. Both sides treat that byte string as canonical:
//! it is hashed into the proof chain exactly as transmitted. Public keys
//! travel as PKIX/DER `SubjectPublicKeyInfo` documents.

use num_bigint::BigUint;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size in bytes of every digest used by the protocol.
pub const DIGEST_SIZE: usize = 32;

/// The signature placeholder hashed into the first step of a proof chain.
pub const ZERO_SIGNATURE: &[u8] = b"(0,0)";

/// ECDSA P-256 signing and verifying key material for one principal.
#[derive(Debug, Clone)]
pub struct Keypair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

/// Errors reported while producing or decoding key material and signatures.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// A PKIX/DER public-key document failed to encode or decode.
    #[error("public key codec error: {0}")]
    PublicKey(String),
    /// The signing operation itself failed.
    #[error("signing error: {0}")]
    Signing(String),
}

impl Keypair {
    /// Generates a fresh keypair from the operating-system RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    /// Returns the public half as a PKIX/DER `SubjectPublicKeyInfo` document.
    pub fn public_key_der(&self) -> Result<Vec<u8>, KeyError> {
        encode_public_key_der(&self.verifying)
    }

    /// Returns the verifying key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    /// Signs a 32-byte digest, returning the ASCII `"(r,s)"` form.
    pub fn sign_digest(&self, digest: &[u8; DIGEST_SIZE]) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .signing
            .sign_prehash(digest)
            .map_err(|err| KeyError::Signing(err.to_string()))?;
        Ok(encode_signature_text(&signature))
    }
}

/// Encodes a verifying key as a PKIX/DER document.
pub fn encode_public_key_der(key: &VerifyingKey) -> Result<Vec<u8>, KeyError> {
    let document = key
        .to_public_key_der()
        .map_err(|err| KeyError::PublicKey(err.to_string()))?;
    Ok(document.as_bytes().to_vec())
}

/// Decodes a PKIX/DER document back into a verifying key.
pub fn decode_public_key_der(der: &[u8]) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_public_key_der(der).map_err(|err| KeyError::PublicKey(err.to_string()))
}

/// Renders a signature as the canonical `"(r,s)"` decimal text bytes.
pub fn encode_signature_text(signature: &Signature) -> Vec<u8> {
    let bytes = signature.to_bytes();
    let r = BigUint::from_bytes_be(&bytes[..DIGEST_SIZE]);
    let s = BigUint::from_bytes_be(&bytes[DIGEST_SIZE..]);
    format!("({r},{s})").into_bytes()
}

/// Parses the `"(r,s)"` text form. Returns `None` for any malformation,
/// including scalars wider than the curve order's 32 bytes.
pub fn decode_signature_text(text: &[u8]) -> Option<Signature> {
    let text = std::str::from_utf8(text).ok()?;
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let (r_text, s_text) = inner.split_once(',')?;
    let r = scalar_bytes(r_text)?;
    let s = scalar_bytes(s_text)?;
    Signature::from_scalars(r, s).ok()
}

fn scalar_bytes(decimal: &str) -> Option<p256::FieldBytes> {
    if decimal.is_empty() || !decimal.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = BigUint::parse_bytes(decimal.as_bytes(), 10)?;
    let raw = value.to_bytes_be();
    if raw.len() > DIGEST_SIZE {
        return None;
    }
    let mut padded = [0u8; DIGEST_SIZE];
    padded[DIGEST_SIZE - raw.len()..].copy_from_slice(&raw);
    Some(padded.into())
}

/// Verifies a `"(r,s)"` text signature over a 32-byte digest.
pub fn verify_digest(key: &VerifyingKey, digest: &[u8; DIGEST_SIZE], signature_text: &[u8]) -> bool {
    match decode_signature_text(signature_text) {
        Some(signature) => key.verify_prehash(digest, &signature).is_ok(),
        None => false,
    }
}

/// Verifies a text signature under a DER-encoded public key.
pub fn verify_digest_der(der: &[u8], digest: &[u8; DIGEST_SIZE], signature_text: &[u8]) -> bool {
    match decode_public_key_der(der) {
        Ok(key) => verify_digest(&key, digest, signature_text),
        Err(_) => false,
    }
}

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let keys = Keypair::generate();
        let digest = sha256(b"retrievability");
        let signature = keys.sign_digest(&digest).unwrap();
        assert!(signature.starts_with(b"(") && signature.ends_with(b")"));
        assert!(verify_digest(keys.verifying_key(), &digest, &signature));
    }

    #[test]
    fn verify_rejects_wrong_digest() {
        let keys = Keypair::generate();
        let signature = keys.sign_digest(&sha256(b"one")).unwrap();
        assert!(!verify_digest(keys.verifying_key(), &sha256(b"two"), &signature));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let keys = Keypair::generate();
        let other = Keypair::generate();
        let digest = sha256(b"payload");
        let signature = keys.sign_digest(&digest).unwrap();
        assert!(!verify_digest(other.verifying_key(), &digest, &signature));
    }

    #[test]
    fn der_roundtrip() {
        let keys = Keypair::generate();
        let der = keys.public_key_der().unwrap();
        let decoded = decode_public_key_der(&der).unwrap();
        assert_eq!(&decoded, keys.verifying_key());
    }

    #[test]
    fn malformed_signature_text_is_rejected() {
        let keys = Keypair::generate();
        let digest = sha256(b"payload");
        for bad in [
            &b"(1,2"[..],
            b"1,2)",
            b"(,2)",
            b"(1,)",
            b"(a,b)",
            b"()",
            ZERO_SIGNATURE,
        ] {
            assert!(!verify_digest(keys.verifying_key(), &digest, bad));
        }
    }

    #[test]
    fn signature_text_parses_back() {
        let keys = Keypair::generate();
        let digest = sha256(b"parse me");
        let text = keys.sign_digest(&digest).unwrap();
        let parsed = decode_signature_text(&text).unwrap();
        assert_eq!(encode_signature_text(&parsed), text);
    }
}
