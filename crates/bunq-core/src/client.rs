//! Signed HTTP client for the bunq API.
//!
//! Every POST body is signed with the client private key and every 2xx
//! response is verified against the server public key before its JSON is
//! handed to the caller. Which bearer token a request carries is a pure
//! function of the endpoint name, so callers never deal with bootstrap
//! state; asking for a session-authenticated endpoint transparently runs
//! whatever bootstrap stages are still missing.

use crate::config::ClientConfig;
use crate::error::Error;
use crate::keystore::{self, KeyStore};
use crate::model::Pagination;
use crate::session;
use crate::signer::{Signer, Verification};
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const HEADER_CLIENT_AUTH: &str = "X-Bunq-Client-Authentication";
const HEADER_CLIENT_SIGNATURE: &str = "X-Bunq-Client-Signature";
const HEADER_SERVER_SIGNATURE: &str = "X-Bunq-Server-Signature";

/// Which bearer token an endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// The installation call runs before any trust exists; no bearer.
    None,
    /// Bootstrap endpoints authenticate with the installation token.
    Installation,
    /// Everything else needs a live session token.
    Session,
}

/// Maps an endpoint name to the bearer it must carry.
pub fn auth_for_endpoint(endpoint: &str) -> Auth {
    match endpoint {
        "installation" => Auth::None,
        "device-server" | "session-server" => Auth::Installation,
        _ => Auth::Session,
    }
}

/// Whether a missing server public key is acceptable for this request.
/// Only the installation call, which is what delivers that key in the
/// first place, may go unverified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseVerification {
    Required,
    AllowUnverified,
}

pub struct BunqClient {
    pub(crate) config: ClientConfig,
    pub(crate) store: KeyStore,
    pub(crate) signer: Signer,
    pub(crate) http: reqwest::Client,
    pub(crate) renewal: Mutex<()>,
}

impl BunqClient {
    /// Fails fast when neither the keystore nor the config can produce an
    /// API token, since every bootstrap would be doomed mid-flight.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let store = KeyStore::new(config.keystore_path.clone());
        if store.get(keystore::API_TOKEN)?.is_none() && config.api_token.is_none() {
            return Err(Error::Config(
                "no API token available: keystore has none stored and no onetime token was configured"
                    .into(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(format!("bunq-core/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            signer: Signer::new(store.clone()),
            store,
            config,
            http,
            renewal: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET an endpoint, bootstrapping a session first when the endpoint
    /// needs one.
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, Error> {
        if auth_for_endpoint(endpoint) == Auth::Session {
            self.ensure_session_active().await?;
        }
        self.request(
            Method::GET,
            endpoint,
            params,
            None,
            &[],
            ResponseVerification::Required,
        )
        .await
    }

    /// POST a JSON body, signed, bootstrapping a session first when the
    /// endpoint needs one.
    pub async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        extra_headers: &[(&str, String)],
    ) -> Result<Value, Error> {
        if auth_for_endpoint(endpoint) == Auth::Session {
            self.ensure_session_active().await?;
        }
        self.request(
            Method::POST,
            endpoint,
            &[],
            Some(body),
            extra_headers,
            ResponseVerification::Required,
        )
        .await
    }

    /// Walks a list endpoint newest-to-oldest, concatenating the `Response`
    /// arrays of every page.
    pub async fn get_paginated(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        page_size: u32,
    ) -> Result<Vec<Value>, Error> {
        self.get_paginated_while(endpoint, params, page_size, |_| true)
            .await
    }

    /// Like [`BunqClient::get_paginated`], but stops once `continue_loading`
    /// returns false for the page it is shown. That page is still included
    /// in the result; the predicate only prevents fetching older ones.
    pub async fn get_paginated_while(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        page_size: u32,
        mut continue_loading: impl FnMut(&[Value]) -> bool,
    ) -> Result<Vec<Value>, Error> {
        // The page size rides along on the first request only; older_url
        // cursors already encode it.
        let mut first_query: Vec<(&str, String)> = params.to_vec();
        first_query.push(("count", page_size.to_string()));
        let mut endpoint = endpoint.to_string();
        let mut first = true;
        let mut items = Vec::new();
        loop {
            let query = if first { first_query.as_slice() } else { &[] };
            let response = self.get(&endpoint, query).await?;
            first = false;
            let Some(page) = response.get("Response").and_then(Value::as_array) else {
                return Err(unexpected("paginated response", &response));
            };
            let pagination: Pagination = match response.get("Pagination") {
                Some(value) => serde_json::from_value(value.clone())?,
                None => Pagination::default(),
            };
            let keep_going = pagination.older_url.is_some() && continue_loading(page.as_slice());
            items.extend(page.iter().cloned());
            match pagination.older_url {
                Some(older_url) if keep_going => endpoint = older_url,
                _ => break,
            }
        }
        Ok(items)
    }

    /// One signed request/verified response exchange.
    ///
    /// Bearer tokens are read straight from the keystore here, never
    /// renewed; session renewal belongs to the public entry points. The
    /// bootstrap stages rely on that to call this without recursing.
    pub(crate) async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
        extra_headers: &[(&str, String)],
        verification: ResponseVerification,
    ) -> Result<Value, Error> {
        let url = resolve_url(self.base_url(), endpoint);
        let bearer = match auth_for_endpoint(endpoint) {
            Auth::None => None,
            Auth::Installation => self.store.get_str(keystore::INSTALLATION_TOKEN)?,
            Auth::Session => session::valid_session_token(&self.store, Utc::now())?,
        };

        let mut request = self
            .http
            .request(method, &url)
            .header("Cache-Control", "no-cache")
            .header("Content-Type", "application/json");
        if let Some(token) = bearer {
            request = request.header(HEADER_CLIENT_AUTH, token);
        }
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            // Sign exactly the bytes that go on the wire.
            let raw = serde_json::to_vec(body)?;
            request = request
                .header(HEADER_CLIENT_SIGNATURE, self.signer.sign(&raw)?)
                .body(raw);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let server_signature = response
            .headers()
            .get(HEADER_SERVER_SIGNATURE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let raw_body = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&raw_body).into_owned();
            error!(endpoint, status = status.as_u16(), body = %body, "bunq request failed");
            return Err(Error::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        match (verification, server_signature) {
            (_, Some(signature)) => {
                if self.signer.verify(&raw_body, &signature)? == Verification::SkippedNoServerKey
                    && verification == ResponseVerification::Required
                {
                    return Err(Error::MissingServerKey);
                }
            }
            (ResponseVerification::AllowUnverified, None) => {
                warn!(endpoint, "response carried no server signature header");
            }
            (ResponseVerification::Required, None) => {
                error!(endpoint, "response is missing the server signature header");
                return Err(Error::InvalidSignature);
            }
        }

        Ok(serde_json::from_slice(&raw_body)?)
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url_override
            .as_deref()
            .unwrap_or_else(|| self.config.environment.base_url())
    }
}

/// Logs and wraps a response whose 2xx body does not have the documented
/// shape; these are fatal because retrying cannot change the shape.
pub(crate) fn unexpected(context: &'static str, response: &Value) -> Error {
    error!(context, body = %response, "unexpected response shape");
    Error::UnexpectedResponse {
        context,
        body: response.to_string(),
    }
}

/// Joins an endpoint onto the base URL. Cursor URLs from the server come
/// back as `/v1/...` paths; only that leading version prefix is stripped,
/// anything else named `v1` deeper in the path is payload.
fn resolve_url(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with(base) {
        return endpoint.to_string();
    }
    let path = endpoint.strip_prefix("/v1").unwrap_or(endpoint);
    format!("{}/{}", base, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_endpoints_have_fixed_auth() {
        assert_eq!(auth_for_endpoint("installation"), Auth::None);
        assert_eq!(auth_for_endpoint("device-server"), Auth::Installation);
        assert_eq!(auth_for_endpoint("session-server"), Auth::Installation);
    }

    #[test]
    fn resource_endpoints_need_a_session() {
        assert_eq!(auth_for_endpoint("user/7/monetary-account"), Auth::Session);
        assert_eq!(
            auth_for_endpoint("/v1/user/7/payment?older_id=3"),
            Auth::Session
        );
    }

    #[test]
    fn resolve_url_prefixes_relative_endpoints() {
        let base = "https://api.bunq.com/v1";
        assert_eq!(
            resolve_url(base, "session-server"),
            "https://api.bunq.com/v1/session-server"
        );
        assert_eq!(
            resolve_url(base, "/user/1/payment"),
            "https://api.bunq.com/v1/user/1/payment"
        );
    }

    #[test]
    fn resolve_url_strips_only_the_leading_version_prefix() {
        let base = "https://api.bunq.com/v1";
        assert_eq!(
            resolve_url(base, "/v1/user/1/payment?older_id=9&count=3"),
            "https://api.bunq.com/v1/user/1/payment?older_id=9&count=3"
        );
        // A v1 further down the path is data, not a version prefix.
        assert_eq!(
            resolve_url(base, "user/1/attachment/v1abc"),
            "https://api.bunq.com/v1/user/1/attachment/v1abc"
        );
    }

    #[test]
    fn resolve_url_passes_absolute_urls_through() {
        let base = "https://api.bunq.com/v1";
        let absolute = "https://api.bunq.com/v1/user/1/payment?count=5";
        assert_eq!(resolve_url(base, absolute), absolute);
    }
}
