//! Error types.
//!
//! [`CloudError`] describes a single failed interaction with the cloud (transport, API
//! rejection, failed long-running operation, cancellation). [`Error`] is what the
//! provisioners and the orchestrator return: one variant per failing step, carrying the
//! resource it was working on and the underlying [`CloudError`].

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CloudError {
    #[snafu(display("request to {url} failed"))]
    Transport { url: String, source: reqwest::Error },

    #[snafu(display("{method} {url} returned HTTP {status}: {code}: {message}"))]
    Api {
        method: String,
        url: String,
        status: u16,
        code: String,
        message: String,
    },

    #[snafu(display("failed to decode {what} returned by {url}"))]
    Decode {
        what: String,
        url: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to acquire an access token: {message}"))]
    Authentication { message: String },

    #[snafu(display("operation ended in state {status}: {code}: {message}"))]
    OperationFailed {
        status: String,
        code: String,
        message: String,
    },

    #[snafu(display("blob copy into {url} ended in state {status}: {description}"))]
    CopyFailed {
        url: String,
        status: String,
        description: String,
    },

    #[snafu(display("storage account key for {account} is not valid base64"))]
    InvalidAccountKey {
        account: String,
        source: base64::DecodeError,
    },

    #[snafu(display("operation cancelled"))]
    Cancelled,
}

impl CloudError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloudError::Cancelled)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid options: {message}"))]
    InvalidOptions { message: String },

    #[snafu(display(
        "the image source url must be from an azure blob storage under {prefix}, otherwise upload will fail with an `One of the request inputs is out of range` error (got {url})"
    ))]
    UntrustedImageSource { url: String, prefix: String },

    #[snafu(display("'{id}' is not a valid {kind} resource id"))]
    InvalidResourceId { id: String, kind: String },

    #[snafu(display("failed to get resource group '{name}'"))]
    GetResourceGroup { name: String, source: CloudError },

    #[snafu(display("failed to create resource group '{name}'"))]
    CreateResourceGroup { name: String, source: CloudError },

    #[snafu(display("failed to retrieve list of DNS zones"))]
    ListDnsZones { source: CloudError },

    #[snafu(display("could not find any DNS zones in subscription named '{base_domain}'"))]
    BaseDomainNotFound { base_domain: String },

    #[snafu(display("failed to create managed identity '{name}'"))]
    CreateIdentity { name: String, source: CloudError },

    #[snafu(display("failed to retrieve role definitions for scope {scope}"))]
    ListRoleDefinitions { scope: String, source: CloudError },

    #[snafu(display("didn't find the '{role}' role in scope {scope}"))]
    RoleDefinitionNotFound { role: String, scope: String },

    #[snafu(display("failed to add role assignment to role after {attempts} attempt(s)"))]
    RoleAssignment { attempts: u32, source: CloudError },

    #[snafu(display("failed to get virtual network {id}"))]
    GetVirtualNetwork { id: String, source: CloudError },

    #[snafu(display("failed to get network security group '{name}'"))]
    GetSecurityGroup { name: String, source: CloudError },

    #[snafu(display("failed to create network security group '{name}'"))]
    CreateSecurityGroup { name: String, source: CloudError },

    #[snafu(display("failed to create virtual network '{name}'"))]
    CreateVirtualNetwork { name: String, source: CloudError },

    #[snafu(display("virtual network '{network}' has no subnets"))]
    NoSubnets { network: String },

    #[snafu(display("{resource} '{name}' was returned without {field}"))]
    MissingField {
        resource: &'static str,
        name: String,
        field: &'static str,
    },

    #[snafu(display("failed to create private DNS zone '{name}'"))]
    CreatePrivateZone { name: String, source: CloudError },

    #[snafu(display("failed to set up network link '{name}' for private DNS zone '{zone}'"))]
    CreateZoneLink {
        zone: String,
        name: String,
        source: CloudError,
    },

    #[snafu(display("failed to create public IP address '{name}'"))]
    CreatePublicIp { name: String, source: CloudError },

    #[snafu(display("failed to create guest cluster egress load balancer '{name}'"))]
    CreateLoadBalancer { name: String, source: CloudError },

    #[snafu(display("failed to create storage account '{name}'"))]
    CreateStorageAccount { name: String, source: CloudError },

    #[snafu(display("failed to create blob container '{name}' in {account}"))]
    CreateBlobContainer {
        account: String,
        name: String,
        source: CloudError,
    },

    #[snafu(display("failed to list storage account keys for {account}"))]
    ListStorageKeys { account: String, source: CloudError },

    #[snafu(display("no storage account keys exist for {account}"))]
    NoStorageKeys { account: String },

    #[snafu(display("failed to construct storage object authorizer for {account}"))]
    StorageAuthorizer { account: String, source: CloudError },

    #[snafu(display("failed to upload rhcos image from {source_url}"))]
    CopyImage {
        source_url: String,
        source: CloudError,
    },

    #[snafu(display("failed to create image '{name}'"))]
    CreateImage { name: String, source: CloudError },

    #[snafu(display("cancelled before {step}"), context(name(StepCancelledSnafu)))]
    Cancelled { step: String },

    #[snafu(display("failed to serialize result"))]
    SerializeOutput { source: serde_yaml::Error },

    #[snafu(display("failed to write result to {}", path.display()))]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// True when the run stopped because the cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        if matches!(self, Error::Cancelled { .. }) {
            return true;
        }
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if err
                .downcast_ref::<CloudError>()
                .is_some_and(CloudError::is_cancelled)
            {
                return true;
            }
            current = err.source();
        }
        false
    }
}
