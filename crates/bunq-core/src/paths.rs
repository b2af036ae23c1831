use crate::config::Environment;
use crate::error::Error;
use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "bunqcore";
pub const APP_NAME: &str = "bunq";

pub fn data_dir() -> Result<PathBuf, Error> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| Error::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Installation artifacts are not portable between environments, so each
/// environment gets its own keystore file.
pub fn default_keystore_path(environment: Environment) -> Result<PathBuf, Error> {
    let name = match environment {
        Environment::Sandbox => "keystore-sandbox.json",
        Environment::Production => "keystore-production.json",
    };
    Ok(data_dir()?.join(name))
}
