//! Four-stage trust bootstrap and session renewal.
//!
//! The flow follows bunq's authentication design
//! (<https://beta.doc.bunq.com/basics/authentication>): generate a client
//! keypair, trade the public key for an installation token plus the
//! server's public key, register this device against the API token, then
//! open a session. Each stage persists its artifacts before the next one
//! runs, so the walk resumes from whatever the keystore already holds and
//! re-executes only what is missing — an existing keypair is never
//! regenerated, an active device never re-registered.

use crate::client::{unexpected, BunqClient, ResponseVerification};
use crate::error::Error;
use crate::keystore::{self, KeyStore};
use crate::signer;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// Slack subtracted from session lifetimes so a request never rides a
/// token that expires mid-flight.
pub const SESSION_EXPIRY_MARGIN_SECS: i64 = 60;

/// Device registration is permanent per API token; a repeat attempt
/// answers 400 with a body containing this phrase, which is then stored
/// as the device id.
const DEVICE_ALREADY_EXISTS: &str = "device already exists";

/// Bootstrap stages in dependency order. Each stage's entry condition is
/// that the previous stage's artifacts exist in the keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GenerateKeys,
    CreateInstallation,
    RegisterDevice,
    CreateSession,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::GenerateKeys => f.write_str("generate client keypair"),
            Stage::CreateInstallation => f.write_str("create installation"),
            Stage::RegisterDevice => f.write_str("register device"),
            Stage::CreateSession => f.write_str("create session"),
        }
    }
}

/// The next stage whose artifacts are missing from the store, or `None`
/// when a usable session exists. Pure over the store contents; performs
/// no network calls.
pub fn next_missing_stage(store: &KeyStore, now: DateTime<Utc>) -> Result<Option<Stage>, Error> {
    if store.get(keystore::CLIENT_PRIVATE_KEY)?.is_none() {
        return Ok(Some(Stage::GenerateKeys));
    }
    if store.get(keystore::INSTALLATION_TOKEN)?.is_none() {
        return Ok(Some(Stage::CreateInstallation));
    }
    if store.get(keystore::API_TOKEN)?.is_none() || store.get(keystore::DEVICE_ID)?.is_none() {
        return Ok(Some(Stage::RegisterDevice));
    }
    if valid_session_token(store, now)?.is_none() {
        return Ok(Some(Stage::CreateSession));
    }
    Ok(None)
}

/// The stored session token, provided its expiry is further out than the
/// safety margin. A missing or unreadable expiry reads as expired.
pub(crate) fn valid_session_token(
    store: &KeyStore,
    now: DateTime<Utc>,
) -> Result<Option<String>, Error> {
    let Some(expires_at) = store.get_str(keystore::SESSION_EXPIRES_AT)? else {
        return Ok(None);
    };
    let Ok(expires_at) = DateTime::parse_from_rfc3339(&expires_at) else {
        return Ok(None);
    };
    if now + Duration::seconds(SESSION_EXPIRY_MARGIN_SECS) >= expires_at.with_timezone(&Utc) {
        return Ok(None);
    }
    store.get_str(keystore::SESSION_TOKEN)
}

fn expiry_from_timeout(now: DateTime<Utc>, session_timeout_secs: i64) -> DateTime<Utc> {
    now + Duration::seconds(session_timeout_secs)
        - Duration::seconds(SESSION_EXPIRY_MARGIN_SECS)
}

impl BunqClient {
    /// Brings the keystore to a state with a live session, executing only
    /// the bootstrap stages whose artifacts are missing.
    ///
    /// Safe to call before every request: with a valid session it costs a
    /// keystore read and no network traffic. Renewal is serialized within
    /// this client; the keystore file itself has no cross-process lock, so
    /// a deployment must keep a single writer per keystore at a time.
    pub async fn ensure_session_active(&self) -> Result<(), Error> {
        if next_missing_stage(&self.store, Utc::now())?.is_none() {
            return Ok(());
        }
        let _renewal = self.renewal.lock().await;
        // Four stages at most, plus one pass to confirm the walk converged.
        for _ in 0..=4 {
            match next_missing_stage(&self.store, Utc::now())? {
                None => return Ok(()),
                Some(Stage::GenerateKeys) => self.generate_keys()?,
                Some(Stage::CreateInstallation) => self.create_installation().await?,
                Some(Stage::RegisterDevice) => self.register_device().await?,
                Some(Stage::CreateSession) => self.create_session().await?,
            }
        }
        Err(Error::UnexpectedResponse {
            context: "session bootstrap",
            body: "stages kept reporting missing artifacts after a full walk; \
                   the granted session may be shorter than the safety margin"
                .into(),
        })
    }

    /// Swaps the stored API token for `new_token`, wipes every derived
    /// artifact and re-runs the full bootstrap against the new token. On
    /// any failure the keystore is restored from its pre-exchange
    /// snapshot, leaving the old token active.
    pub async fn exchange_pat(&self, new_token: &str) -> Result<(), Error> {
        let snapshot = self.store.snapshot()?;
        let mut wiped = snapshot.clone();
        if let Some(document) = wiped.as_object_mut() {
            document.insert("api_token".to_string(), Value::from(new_token));
            document.remove("installation_context");
            document.remove("session_context");
        }
        self.store.replace(wiped)?;
        if let Err(err) = self.ensure_session_active().await {
            error!(error = %err, "token exchange failed; restoring previous keystore");
            self.store.replace(snapshot)?;
            return Err(err);
        }
        warn!("API token exchanged; revoke the old token in the bunq app");
        Ok(())
    }

    fn generate_keys(&self) -> Result<(), Error> {
        info!("generating client RSA keypair");
        let (private_pem, public_pem) = signer::generate_client_keypair()?;
        self.store.update(json!({
            "installation_context": {
                "private_key_client": private_pem.as_str(),
                "public_key_client": public_pem,
            }
        }))
    }

    async fn create_installation(&self) -> Result<(), Error> {
        let public_key = self
            .store
            .get_str(keystore::CLIENT_PUBLIC_KEY)?
            .ok_or(Error::MissingClientKey)?;
        info!("creating installation");
        let response = self
            .request(
                Method::POST,
                "installation",
                &[],
                Some(&json!({ "client_public_key": public_key })),
                &[],
                // The response delivers the very key responses are verified
                // against; nothing to check it with yet.
                ResponseVerification::AllowUnverified,
            )
            .await?;
        let token = response
            .pointer("/Response/1/Token/token")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected("installation response", &response))?;
        let server_public_key = response
            .pointer("/Response/2/ServerPublicKey/server_public_key")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected("installation response", &response))?;
        self.store.update(json!({
            "installation_context": {
                "token": token,
                "public_key_server": server_public_key,
            }
        }))
    }

    async fn register_device(&self) -> Result<(), Error> {
        let api_token = self.api_token()?;
        info!("registering device");
        let body = json!({
            "description": self.config.device_description,
            "secret": api_token.as_str(),
        });
        let device_id = match self
            .request(
                Method::POST,
                "device-server",
                &[],
                Some(&body),
                &[],
                ResponseVerification::Required,
            )
            .await
        {
            Ok(response) => response
                .pointer("/Response/0/Id/id")
                .cloned()
                .ok_or_else(|| unexpected("device-server response", &response))?,
            Err(Error::Api {
                status: 400, body, ..
            }) if body.contains(DEVICE_ALREADY_EXISTS) => {
                info!("device already registered by an earlier run");
                Value::from(DEVICE_ALREADY_EXISTS)
            }
            Err(err) => return Err(err),
        };
        // Persisting the token here is what frees later runs from needing
        // the original onetime token.
        self.store.update(json!({
            "installation_context": { "device_id": device_id },
            "api_token": api_token.as_str(),
        }))
    }

    async fn create_session(&self) -> Result<(), Error> {
        let api_token = self.api_token()?;
        info!("creating session");
        let response = self
            .request(
                Method::POST,
                "session-server",
                &[],
                Some(&json!({ "secret": api_token.as_str() })),
                &[],
                ResponseVerification::Required,
            )
            .await?;
        let token = response
            .pointer("/Response/1/Token/token")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected("session-server response", &response))?;
        let user = response
            .pointer("/Response/2/UserPerson")
            .ok_or_else(|| unexpected("session-server response", &response))?;
        let timeout = user
            .get("session_timeout")
            .and_then(Value::as_i64)
            .ok_or_else(|| unexpected("session-server response", &response))?;
        let expires_at = expiry_from_timeout(Utc::now(), timeout);
        self.store.update(json!({
            "session_context": {
                "token": token,
                "expires_at": expires_at.to_rfc3339(),
                "user_person_id": user,
            }
        }))
    }

    /// The API token to bootstrap with. Once device registration has
    /// persisted a token the keystore wins; the configured onetime token
    /// only matters for a keystore that has never completed stage three.
    fn api_token(&self) -> Result<Zeroizing<String>, Error> {
        if let Some(token) = self.store.get_str(keystore::API_TOKEN)? {
            return Ok(Zeroizing::new(token));
        }
        match &self.config.api_token {
            Some(token) => Ok(token.clone()),
            None => Err(Error::Config("no API token available for bootstrap".into())),
        }
    }
}
