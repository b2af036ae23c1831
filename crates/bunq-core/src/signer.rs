//! Request signing and response verification (RSA-PKCS1v15 over SHA-256).
//!
//! Keys live in the keystore and are loaded on every call; the signer holds
//! no key material of its own. Verification has one sanctioned gap: until
//! the installation response has delivered the server public key there is
//! nothing to verify against, and the caller may explicitly allow that
//! single unverified exchange.

use crate::error::Error;
use crate::keystore::{self, KeyStore};
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{error, warn};
use zeroize::Zeroizing;

pub const CLIENT_KEY_BITS: usize = 2048;

/// Outcome of a response verification that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// No server public key in the keystore yet; nothing was checked.
    SkippedNoServerKey,
}

pub struct Signer {
    store: KeyStore,
}

impl Signer {
    pub fn new(store: KeyStore) -> Self {
        Self { store }
    }

    /// Signs raw body bytes with the client private key, returning the
    /// base64 text for the `X-Bunq-Client-Signature` header.
    ///
    /// The bytes passed here must be exactly the bytes put on the wire;
    /// re-serializing the body after signing would invalidate the signature.
    pub fn sign(&self, body: &[u8]) -> Result<String, Error> {
        let pem = Zeroizing::new(
            self.store
                .get_str(keystore::CLIENT_PRIVATE_KEY)?
                .ok_or(Error::MissingClientKey)?,
        );
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem.as_str())
            .map_err(|err| Error::InvalidKey(format!("client private key: {err}")))?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let signature = signing_key
            .try_sign(body)
            .map_err(|err| Error::Signing(err.to_string()))?;
        Ok(general_purpose::STANDARD.encode(signature.to_vec()))
    }

    /// Verifies a response body against the `X-Bunq-Server-Signature` header.
    ///
    /// Returns [`Verification::SkippedNoServerKey`] when the keystore has no
    /// server public key; the caller decides whether that is acceptable. A
    /// present key with a bad signature is always an error.
    pub fn verify(&self, body: &[u8], signature_b64: &str) -> Result<Verification, Error> {
        let Some(pem) = self.store.get_str(keystore::SERVER_PUBLIC_KEY)? else {
            warn!("no server public key stored; skipping response signature verification");
            return Ok(Verification::SkippedNoServerKey);
        };
        let public_key = RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|err| Error::InvalidKey(format!("server public key: {err}")))?;
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);
        let raw = general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|err| {
                error!(error = %err, "server signature header is not valid base64");
                Error::InvalidSignature
            })?;
        let signature = Signature::try_from(raw.as_slice()).map_err(|_| Error::InvalidSignature)?;
        match verifying_key.verify(body, &signature) {
            Ok(()) => Ok(Verification::Verified),
            Err(err) => {
                error!(error = %err, "response signature verification failed");
                Err(Error::InvalidSignature)
            }
        }
    }
}

/// Generates the client keypair: PKCS#8 private PEM plus SPKI public PEM.
pub fn generate_client_keypair() -> Result<(Zeroizing<String>, String), Error> {
    let private_key = RsaPrivateKey::new(&mut OsRng, CLIENT_KEY_BITS)
        .map_err(|err| Error::KeyGeneration(err.to_string()))?;
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| Error::KeyGeneration(err.to_string()))?;
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|err| Error::KeyGeneration(err.to_string()))?;
    Ok((private_pem, public_pem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store_with_keys(dir: &tempfile::TempDir, with_server_key: bool) -> KeyStore {
        let store = KeyStore::new(dir.path().join("keystore.json"));
        let (private_pem, public_pem) = generate_client_keypair().unwrap();
        let mut installation = json!({
            "private_key_client": private_pem.as_str(),
            "public_key_client": public_pem.as_str(),
        });
        if with_server_key {
            // Reuse the client public key as the "server" key so the test
            // can produce verifiable signatures itself.
            installation["public_key_server"] = json!(public_pem);
        }
        store
            .update(json!({ "installation_context": installation }))
            .unwrap();
        store
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let dir = tempdir().unwrap();
        let signer = Signer::new(store_with_keys(&dir, true));
        let body = br#"{"secret":"token"}"#;
        let signature = signer.sign(body).unwrap();
        assert_eq!(
            signer.verify(body, &signature).unwrap(),
            Verification::Verified
        );
    }

    #[test]
    fn tampered_body_fails_verification() {
        let dir = tempdir().unwrap();
        let signer = Signer::new(store_with_keys(&dir, true));
        let signature = signer.sign(b"original").unwrap();
        assert!(matches!(
            signer.verify(b"tampered", &signature),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn verification_skipped_without_server_key() {
        let dir = tempdir().unwrap();
        let signer = Signer::new(store_with_keys(&dir, false));
        let signature = signer.sign(b"anything").unwrap();
        assert_eq!(
            signer.verify(b"anything", &signature).unwrap(),
            Verification::SkippedNoServerKey
        );
    }

    #[test]
    fn malformed_signature_header_fails() {
        let dir = tempdir().unwrap();
        let signer = Signer::new(store_with_keys(&dir, true));
        assert!(matches!(
            signer.verify(b"body", "!!! not base64 !!!"),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn signing_without_private_key_is_a_caller_bug() {
        let dir = tempdir().unwrap();
        let signer = Signer::new(KeyStore::new(dir.path().join("keystore.json")));
        assert!(matches!(signer.sign(b"body"), Err(Error::MissingClientKey)));
    }
}
