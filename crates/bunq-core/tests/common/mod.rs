#![allow(dead_code)]

use base64::{engine::general_purpose, Engine as _};
use bunq_core::keystore::KeyStore;
use bunq_core::signer::generate_client_keypair;
use bunq_core::{BunqClient, ClientConfig, Environment};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::json;
use sha2::Sha256;
use std::sync::OnceLock;

/// Stand-in for the bunq backend's signing identity. Generated once per
/// test binary; RSA keygen is too slow to repeat per test.
pub struct ServerKey {
    signing_key: SigningKey<Sha256>,
    public_pem: String,
}

impl ServerKey {
    fn generate() -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_pem,
        }
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Signature header value for a response body, as the real API sets it.
    pub fn sign(&self, body: &str) -> String {
        let signature = self.signing_key.sign(body.as_bytes());
        general_purpose::STANDARD.encode(signature.to_vec())
    }
}

pub fn server_key() -> &'static ServerKey {
    static SERVER_KEY: OnceLock<ServerKey> = OnceLock::new();
    SERVER_KEY.get_or_init(ServerKey::generate)
}

/// Client keypair shared across tests, again to amortize keygen.
pub fn client_keys() -> &'static (String, String) {
    static CLIENT_KEYS: OnceLock<(String, String)> = OnceLock::new();
    CLIENT_KEYS.get_or_init(|| {
        let (private_pem, public_pem) = generate_client_keypair().unwrap();
        (private_pem.as_str().to_owned(), public_pem)
    })
}

pub fn store_at(dir: &tempfile::TempDir) -> KeyStore {
    KeyStore::new(dir.path().join("keystore.json"))
}

pub fn seed_client_keys(store: &KeyStore) {
    let (private_pem, public_pem) = client_keys();
    store
        .update(json!({
            "installation_context": {
                "private_key_client": private_pem,
                "public_key_client": public_pem,
            }
        }))
        .unwrap();
}

pub fn seed_installation(store: &KeyStore) {
    seed_client_keys(store);
    store
        .update(json!({
            "installation_context": {
                "token": "install-token",
                "public_key_server": server_key().public_pem(),
            }
        }))
        .unwrap();
}

pub fn seed_device(store: &KeyStore) {
    seed_installation(store);
    store
        .update(json!({
            "installation_context": { "device_id": 7 },
            "api_token": "stored-api-token",
        }))
        .unwrap();
}

pub fn seed_session(store: &KeyStore, expires_in_secs: i64, user_id: i64) {
    seed_device(store);
    store
        .update(json!({
            "session_context": {
                "token": "session-token",
                "expires_at": (Utc::now() + Duration::seconds(expires_in_secs)).to_rfc3339(),
                "user_person_id": { "id": user_id, "session_timeout": 3600 },
            }
        }))
        .unwrap();
}

pub fn client_for(server: &mockito::ServerGuard, store: &KeyStore) -> BunqClient {
    let config = ClientConfig::new(Environment::Sandbox, store.path())
        .with_api_token("onetime-token")
        .with_base_url(server.url());
    BunqClient::new(config).unwrap()
}

/// Registers a 200 mock whose body carries a valid server signature, the
/// way every real bunq response does. Callers chain matchers/expectations
/// and finish with `create_async`.
pub fn signed_mock(
    server: &mut mockito::ServerGuard,
    method: &str,
    path: &str,
    body: &str,
) -> mockito::Mock {
    server
        .mock(method, path)
        .with_status(200)
        .with_header("X-Bunq-Server-Signature", &server_key().sign(body))
        .with_body(body)
}

pub fn installation_body() -> String {
    json!({
        "Response": [
            { "Id": { "id": 99 } },
            { "Token": { "id": 100, "token": "install-token" } },
            { "ServerPublicKey": { "server_public_key": server_key().public_pem() } },
        ]
    })
    .to_string()
}

pub fn device_body(device_id: i64) -> String {
    json!({ "Response": [ { "Id": { "id": device_id } } ] }).to_string()
}

pub fn session_body(user_id: i64, session_timeout: i64) -> String {
    json!({
        "Response": [
            { "Id": { "id": 42 } },
            { "Token": { "id": 43, "token": "fresh-session-token" } },
            {
                "UserPerson": {
                    "id": user_id,
                    "display_name": "T. User",
                    "session_timeout": session_timeout,
                }
            },
        ]
    })
    .to_string()
}

pub fn empty_page_body() -> String {
    json!({ "Response": [], "Pagination": { "older_url": null } }).to_string()
}
