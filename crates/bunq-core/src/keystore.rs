//! Durable JSON document holding everything the bootstrap produces.
//!
//! The document is re-read on every access and patched with a recursive
//! merge, so a fresh value written by one component is immediately visible
//! to the others. Writes go through a temp file plus rename; a crash
//! mid-write can never leave a half-written keystore behind, which would
//! otherwise force a full re-bootstrap.

use crate::error::Error;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// Dotted key paths for the bootstrap artifacts.
pub const CLIENT_PRIVATE_KEY: &str = "installation_context.private_key_client";
pub const CLIENT_PUBLIC_KEY: &str = "installation_context.public_key_client";
pub const SERVER_PUBLIC_KEY: &str = "installation_context.public_key_server";
pub const INSTALLATION_TOKEN: &str = "installation_context.token";
pub const DEVICE_ID: &str = "installation_context.device_id";
pub const API_TOKEN: &str = "api_token";
pub const SESSION_TOKEN: &str = "session_context.token";
pub const SESSION_EXPIRES_AT: &str = "session_context.expires_at";
pub const SESSION_USER_ID: &str = "session_context.user_person_id.id";

#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a value by dotted path, e.g. `"session_context.token"`.
    ///
    /// Missing files, missing segments and explicit `null` all read as
    /// `None`; only io and malformed JSON are errors.
    pub fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let mut current = Value::Object(self.read_document()?);
        for part in key.split('.') {
            let Some(next) = current.get(part) else {
                return Ok(None);
            };
            if next.is_null() {
                return Ok(None);
            }
            current = next.clone();
        }
        Ok(Some(current))
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.get(key)?.and_then(|value| value.as_str().map(str::to_owned)))
    }

    /// Merges `patch` into the stored document and persists the result.
    ///
    /// Objects merge recursively; any other value type overwrites. Sibling
    /// keys not named by the patch are untouched.
    pub fn update(&self, patch: Value) -> Result<(), Error> {
        let mut document = Value::Object(self.read_document()?);
        merge_values(&mut document, patch);
        self.write_atomic(&document)
    }

    /// The whole document, for snapshot/rollback during token exchange.
    pub fn snapshot(&self) -> Result<Value, Error> {
        Ok(Value::Object(self.read_document()?))
    }

    /// Replaces the whole document, discarding the current contents.
    pub fn replace(&self, document: Value) -> Result<(), Error> {
        self.write_atomic(&document)
    }

    fn read_document(&self) -> Result<Map<String, Value>, Error> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(Error::Store {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|err| Error::StoreFormat {
            path: self.path.clone(),
            source: err,
        })
    }

    fn write_atomic(&self, document: &Value) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| Error::Store {
                    path: self.path.clone(),
                    source: err,
                })?;
            }
        }
        let raw = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw).map_err(|err| Error::Store {
            path: tmp.clone(),
            source: err,
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| Error::Store {
            path: self.path.clone(),
            source: err,
        })
    }
}

fn merge_values(original: &mut Value, patch: Value) {
    match (original, patch) {
        (Value::Object(original), Value::Object(patch)) => {
            for (key, value) in patch {
                match original.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        original.insert(key, value);
                    }
                }
            }
        }
        (original, patch) => *original = patch,
    }
}
