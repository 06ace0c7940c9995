//! Cloud control-plane client abstraction.
//!
//! One trait per service capability. The provisioners only see these traits, through the
//! [`Clients`] bundle built once at start, so tests can swap the REST implementation for an
//! in-memory cloud.

pub mod arm;
pub mod blob;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::{SharedKeyCredential, TokenCredential};
use crate::config::{CloudEnvironment, OrchestratorSettings};
use crate::error::CloudError;
use crate::lro::Poller;
use crate::models::{
    BlobContainer, BlobCopy, DnsZone, Identity, Image, LoadBalancer, Page, PrivateZone,
    PublicIpAddress, ResourceGroup, RoleAssignment, RoleDefinition, SecurityGroup,
    StorageAccount, StorageAccountCreate, StorageAccountKeys, VirtualNetwork, VirtualNetworkLink,
};

pub use arm::ArmClient;
pub use blob::BlobClient;

#[async_trait]
pub trait ResourceGroupsApi: Send + Sync {
    async fn get_resource_group(&self, name: &str) -> Result<ResourceGroup, CloudError>;

    async fn create_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<ResourceGroup, CloudError>;
}

#[async_trait]
pub trait DnsZonesApi: Send + Sync {
    /// Public DNS zones in the subscription. `next_link` continues a previous page.
    async fn list_zones(&self, next_link: Option<&str>) -> Result<Page<DnsZone>, CloudError>;
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn create_identity(
        &self,
        resource_group: &str,
        name: &str,
        identity: &Identity,
    ) -> Result<Identity, CloudError>;
}

#[async_trait]
pub trait AuthorizationApi: Send + Sync {
    async fn list_role_definitions(
        &self,
        scope: &str,
        next_link: Option<&str>,
    ) -> Result<Page<RoleDefinition>, CloudError>;

    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, CloudError>;
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn get_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork, CloudError>;

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, CloudError>;

    async fn begin_create_security_group(
        &self,
        resource_group: &str,
        name: &str,
        group: &SecurityGroup,
    ) -> Result<Poller<SecurityGroup>, CloudError>;

    async fn begin_create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<Poller<VirtualNetwork>, CloudError>;

    async fn begin_create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<Poller<PublicIpAddress>, CloudError>;

    async fn begin_create_load_balancer(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<Poller<LoadBalancer>, CloudError>;
}

#[async_trait]
pub trait PrivateDnsApi: Send + Sync {
    async fn begin_create_private_zone(
        &self,
        resource_group: &str,
        name: &str,
        zone: &PrivateZone,
    ) -> Result<Poller<PrivateZone>, CloudError>;

    async fn begin_create_zone_link(
        &self,
        resource_group: &str,
        zone: &str,
        name: &str,
        link: &VirtualNetworkLink,
    ) -> Result<Poller<VirtualNetworkLink>, CloudError>;
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn begin_create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        account: &StorageAccountCreate,
    ) -> Result<Poller<StorageAccount>, CloudError>;

    async fn create_blob_container(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<BlobContainer, CloudError>;

    /// Account keys, including the Kerberos keys (`$expand=kerb`).
    async fn list_keys(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<StorageAccountKeys, CloudError>;
}

/// A blob addressed by account, container and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobTarget {
    pub account: String,
    pub container: String,
    pub blob: String,
}

#[async_trait]
pub trait BlobApi: Send + Sync {
    fn blob_url(&self, target: &BlobTarget) -> String;

    /// Starts a server side copy of `source_url` into `target`. The returned poller resolves
    /// once the storage service reports the copy as finished.
    async fn begin_copy_from_url(
        &self,
        credential: &SharedKeyCredential,
        target: &BlobTarget,
        source_url: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Poller<BlobCopy>, CloudError>;
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn begin_create_image(
        &self,
        resource_group: &str,
        name: &str,
        image: &Image,
    ) -> Result<Poller<Image>, CloudError>;
}

/// Service handles shared by every provisioner in a run.
#[derive(Clone)]
pub struct Clients {
    pub resource_groups: Arc<dyn ResourceGroupsApi>,
    pub dns_zones: Arc<dyn DnsZonesApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub authorization: Arc<dyn AuthorizationApi>,
    pub network: Arc<dyn NetworkApi>,
    pub private_dns: Arc<dyn PrivateDnsApi>,
    pub storage: Arc<dyn StorageApi>,
    pub blob: Arc<dyn BlobApi>,
    pub compute: Arc<dyn ComputeApi>,
}

impl Clients {
    /// REST clients for the given cloud and subscription.
    pub fn arm(
        environment: &CloudEnvironment,
        subscription_id: &str,
        credential: Arc<dyn TokenCredential>,
        settings: &OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        let http = reqwest::Client::new();
        let arm = Arc::new(ArmClient::new(
            http.clone(),
            environment,
            subscription_id,
            credential,
            settings.default_poll_interval,
            cancel.clone(),
        ));
        let blob = Arc::new(BlobClient::new(
            http,
            environment.blob_endpoint.clone(),
            settings.blob_copy_poll_interval,
            cancel,
        ));

        Self {
            resource_groups: arm.clone(),
            dns_zones: arm.clone(),
            identity: arm.clone(),
            authorization: arm.clone(),
            network: arm.clone(),
            private_dns: arm.clone(),
            storage: arm.clone(),
            blob,
            compute: arm,
        }
    }

    /// Uses one provider for every capability.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ResourceGroupsApi
            + DnsZonesApi
            + IdentityApi
            + AuthorizationApi
            + NetworkApi
            + PrivateDnsApi
            + StorageApi
            + BlobApi
            + ComputeApi
            + 'static,
    {
        Self {
            resource_groups: provider.clone(),
            dns_zones: provider.clone(),
            identity: provider.clone(),
            authorization: provider.clone(),
            network: provider.clone(),
            private_dns: provider.clone(),
            storage: provider.clone(),
            blob: provider.clone(),
            compute: provider,
        }
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}
