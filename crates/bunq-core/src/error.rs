use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the bunq client.
///
/// Signature problems are deliberately separate from transport and API
/// errors: a caller may retry a timeout, but must never retry past a
/// failed response verification.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bunq request to `{endpoint}` failed with status {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response shape from {context}: {body}")]
    UnexpectedResponse {
        context: &'static str,
        body: String,
    },

    #[error("response signature verification failed")]
    InvalidSignature,

    #[error("no server public key in the keystore; refusing to trust the response")]
    MissingServerKey,

    #[error("no client private key in the keystore")]
    MissingClientKey,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("keystore io at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keystore at {} is not valid JSON: {source}", path.display())]
    StoreFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failure: {0}")]
    Json(#[from] serde_json::Error),
}
