//! bunq-core — authenticated, signed access to the bunq API
//!
//! # Design principles
//! - Trust is bootstrapped once from a onetime token and kept in a single
//!   JSON keystore; every later run resumes from whatever that file holds.
//! - Every POST body is RSA-signed and every 2xx response is verified
//!   before its JSON reaches a caller; the one sanctioned gap is the
//!   installation call, which is what delivers the server key.
//! - Components receive their collaborators explicitly; no global state.
//!
//! # Module layout
//! - `client`    — signed GET/POST plus backward-cursor pagination
//! - `session`   — four-stage trust bootstrap state machine and renewal
//! - `signer`    — RSA-PKCS1v15/SHA-256 signing and verification
//! - `keystore`  — dotted-path JSON document with atomic merge-writes
//! - `resources` — accounts, payments and notification callbacks
//! - `model`     — typed resource payloads
//! - `config`    — environment selection and client configuration
//! - `paths`     — platform data locations
//! - `error`     — unified error type

pub mod client;
pub mod config;
pub mod error;
pub mod keystore;
pub mod model;
pub mod paths;
pub mod resources;
pub mod session;
pub mod signer;

pub use client::{auth_for_endpoint, Auth, BunqClient};
pub use config::{ClientConfig, Environment};
pub use error::Error;
pub use keystore::KeyStore;
pub use model::{BunqAccount, BunqPayment, NotificationFilterUrl};
pub use session::Stage;
