//! Endpoints and timing knobs.

use std::time::Duration;

use crate::error::CloudError;
use crate::retry::RetryPolicy;

/// Default location used when none is supplied.
pub const DEFAULT_LOCATION: &str = "eastus";

/// Where the control plane, the token authority and blob storage live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    /// Azure Resource Manager base URL, without a trailing slash.
    pub resource_manager: String,
    /// Scope requested for ARM access tokens.
    pub token_scope: String,
    /// Entra ID authority host, without a trailing slash.
    pub authority_host: String,
    pub blob_endpoint: BlobEndpoint,
}

impl CloudEnvironment {
    pub fn public() -> Self {
        Self {
            resource_manager: "https://management.azure.com".to_string(),
            token_scope: "https://management.azure.com/.default".to_string(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            blob_endpoint: BlobEndpoint::Suffix("blob.core.windows.net".to_string()),
        }
    }

    /// Points ARM and blob traffic at a single base URL (emulators, tests).
    pub fn local(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            resource_manager: base_url.clone(),
            token_scope: format!("{base_url}/.default"),
            authority_host: base_url.clone(),
            blob_endpoint: BlobEndpoint::PathStyle(base_url),
        }
    }
}

impl Default for CloudEnvironment {
    fn default() -> Self {
        Self::public()
    }
}

/// How blob URLs are formed for a storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobEndpoint {
    /// `https://{account}.{suffix}`
    Suffix(String),
    /// `{base}/{account}`, as the Azurite emulator serves it.
    PathStyle(String),
}

impl BlobEndpoint {
    pub fn account_url(&self, account: &str) -> String {
        match self {
            BlobEndpoint::Suffix(suffix) => format!("https://{account}.{suffix}"),
            BlobEndpoint::PathStyle(base) => format!("{base}/{account}"),
        }
    }
}

/// Timing used by the orchestrator while it waits on the cloud.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Applied to role assignment creation only, to ride out principal propagation.
    pub role_assignment_retry: RetryPolicy,
    /// Which role assignment failures are worth another attempt.
    pub role_assignment_retryable: fn(&CloudError) -> bool,
    /// Cadence for long-running operations when the provider sends no `Retry-After`.
    pub default_poll_interval: Duration,
    /// Fixed cadence while the image blob copy is pending.
    pub blob_copy_poll_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            role_assignment_retry: RetryPolicy::new(100, Duration::from_secs(1)),
            role_assignment_retryable: retry_unless_cancelled,
            default_poll_interval: Duration::from_secs(10),
            blob_copy_poll_interval: Duration::from_secs(5),
        }
    }
}

impl OrchestratorSettings {
    /// No waiting anywhere; for tests against fakes.
    pub fn immediate() -> Self {
        Self {
            role_assignment_retry: RetryPolicy::new(100, Duration::ZERO),
            role_assignment_retryable: retry_unless_cancelled,
            default_poll_interval: Duration::ZERO,
            blob_copy_poll_interval: Duration::ZERO,
        }
    }
}

/// Retries every failure except cancellation.
pub fn retry_unless_cancelled(err: &CloudError) -> bool {
    !err.is_cancelled()
}

/// Narrower predicate: only errors the control plane reports while a new principal
/// propagates (`PrincipalNotFound`, HTTP 400/403/404) and server side hiccups.
pub fn retry_propagation_errors(err: &CloudError) -> bool {
    match err {
        CloudError::Api { status, code, .. } => {
            code.eq_ignore_ascii_case("PrincipalNotFound")
                || matches!(*status, 400 | 403 | 404 | 429)
                || *status >= 500
        }
        CloudError::Transport { .. } => true,
        _ => false,
    }
}
