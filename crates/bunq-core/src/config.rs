use crate::error::Error;
use crate::paths;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use zeroize::Zeroizing;

/// bunq deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    /// API root for the environment, including the version prefix.
    ///
    /// See <https://beta.doc.bunq.com/basics/moving-to-production>.
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://public-api.SANDBOX.bunq.com/v1",
            Environment::Production => "https://api.bunq.com/v1",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SANDBOX" => Ok(Environment::Sandbox),
            "PRODUCTION" => Ok(Environment::Production),
            other => Err(Error::Config(format!("unknown bunq environment: {other}"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => f.write_str("SANDBOX"),
            Environment::Production => f.write_str("PRODUCTION"),
        }
    }
}

/// Everything the client needs before it can issue a request.
///
/// The onetime API token is only required for the very first bootstrap of a
/// keystore; once device registration has persisted the token, the client
/// runs from the keystore alone.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    pub keystore_path: PathBuf,
    pub api_token: Option<Zeroizing<String>>,
    pub device_description: String,
    /// Replaces the environment base URL when set. Intended for pointing the
    /// client at a local stand-in server.
    pub base_url_override: Option<String>,
}

impl ClientConfig {
    pub fn new(environment: Environment, keystore_path: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            keystore_path: keystore_path.into(),
            api_token: None,
            device_description: default_device_description(),
            base_url_override: None,
        }
    }

    /// Builds a config from `BUNQ_*` environment variables.
    ///
    /// `BUNQ_ENVIRONMENT` defaults to `SANDBOX`; an unrecognised value is a
    /// hard error rather than a fallback, so a typo can never route sandbox
    /// traffic at production.
    pub fn from_env() -> Result<Self, Error> {
        let environment = match std::env::var("BUNQ_ENVIRONMENT") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Sandbox,
        };
        let keystore_path = match std::env::var("BUNQ_KEYSTORE") {
            Ok(value) => PathBuf::from(value),
            Err(_) => paths::default_keystore_path(environment)?,
        };
        let api_token = std::env::var("BUNQ_API_TOKEN").ok().map(Zeroizing::new);
        let device_description = std::env::var("BUNQ_DEVICE_DESCRIPTION")
            .unwrap_or_else(|_| default_device_description());
        let base_url_override = std::env::var("BUNQ_API_BASE_URL").ok();
        Ok(Self {
            environment,
            keystore_path,
            api_token,
            device_description,
            base_url_override,
        })
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(Zeroizing::new(token.into()));
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }
}

fn default_device_description() -> String {
    format!("bunq-core/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_names() {
        assert_eq!("SANDBOX".parse::<Environment>().unwrap(), Environment::Sandbox);
        assert_eq!(
            "PRODUCTION".parse::<Environment>().unwrap(),
            Environment::Production
        );
    }

    #[test]
    fn environment_rejects_unknown_name() {
        let err = "sandbox".parse::<Environment>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn base_urls_carry_version_prefix() {
        assert!(Environment::Sandbox.base_url().ends_with("/v1"));
        assert!(Environment::Production.base_url().ends_with("/v1"));
    }
}
