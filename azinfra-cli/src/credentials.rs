//! The `--azure-creds` file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use azinfra_core::AzureCredentials;

/// Expands `~` the way the shell would.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Reads a YAML (or JSON) credentials file. Nothing is validated here.
pub fn read_credentials(path: &Path) -> Result<AzureCredentials> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse credentials file {}", path.display()))
}

/// Loads credentials for a service principal login; every field must be present.
pub fn load_client_secret(path: &Path) -> Result<AzureCredentials> {
    let credentials = read_credentials(path)?;
    credentials
        .validate()
        .with_context(|| format!("invalid credentials file {}", path.display()))?;
    Ok(credentials)
}

/// Loads credentials when a bearer token is supplied separately; only the subscription is used.
pub fn load_subscription(path: &Path) -> Result<AzureCredentials> {
    let credentials = read_credentials(path)?;
    ensure!(
        !credentials.subscription_id.trim().is_empty(),
        "credentials file {} is missing subscriptionId",
        path.display()
    );
    Ok(credentials)
}
