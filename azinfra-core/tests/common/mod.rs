//! In-memory cloud with create-or-update semantics that records every call.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use azinfra_core::auth::SharedKeyCredential;
use azinfra_core::client::{
    AuthorizationApi, BlobApi, BlobTarget, ComputeApi, DnsZonesApi, IdentityApi, NetworkApi,
    PrivateDnsApi, ResourceGroupsApi, StorageApi,
};
use azinfra_core::config::OrchestratorSettings;
use azinfra_core::lro::Poller;
use azinfra_core::models::{
    BlobContainer, BlobCopy, DnsZone, Identity, IdentityProperties, Image, LoadBalancer, Page,
    PrivateZone, PublicIpAddress, ResourceGroup, RoleAssignment, RoleDefinition,
    RoleDefinitionProperties, SecurityGroup, StorageAccount, StorageAccountCreate,
    StorageAccountKey, StorageAccountKeys, SubResource, Subnet, SubnetProperties, VirtualNetwork,
    VirtualNetworkLink,
};
use azinfra_core::{CancellationToken, Clients, CloudError, InfraOptions, Orchestrator};

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
pub const BASE_DOMAIN: &str = "example.com";
pub const RHCOS_IMAGE: &str = "https://rhcos.blob.core.windows.net/imagebucket/rhcos-417.x86_64.vhd";

pub fn arm_id(resource_group: &str, kind: &str, name: &str) -> String {
    format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{resource_group}/providers/{kind}/{name}")
}

/// Knobs a test sets before the fake is shared.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// The first N role assignment attempts are rejected.
    pub reject_role_assignments: u32,
    pub contributor_exists: bool,
    /// Each inner vec is one page of the DNS zone listing.
    pub dns_zone_pages: Vec<Vec<String>>,
    /// Networks come back from creation without subnets.
    pub strip_subnets: bool,
    pub no_storage_keys: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            reject_role_assignments: 0,
            contributor_exists: true,
            dns_zone_pages: vec![vec!["other.org".to_string()], vec![BASE_DOMAIN.to_string()]],
            strip_subnets: false,
            no_storage_keys: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct State {
    pub calls: Vec<String>,
    pub resource_groups: BTreeMap<String, ResourceGroup>,
    pub identities: BTreeMap<String, Identity>,
    pub role_assignment_attempts: u32,
    pub role_assignments: BTreeMap<String, RoleAssignment>,
    pub security_groups: BTreeMap<String, SecurityGroup>,
    pub virtual_networks: BTreeMap<String, VirtualNetwork>,
    pub private_zones: BTreeMap<String, PrivateZone>,
    pub zone_links: BTreeMap<String, VirtualNetworkLink>,
    pub public_ips: BTreeMap<String, PublicIpAddress>,
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    pub storage_accounts: BTreeMap<String, StorageAccountCreate>,
    pub containers: BTreeMap<String, BlobContainer>,
    pub copies: Vec<(String, String, BTreeMap<String, String>)>,
    pub images: BTreeMap<String, Image>,
}

impl State {
    pub fn called(&self, prefix: &str) -> bool {
        self.calls.iter().any(|c| c.starts_with(prefix))
    }
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    pub behaviour: Behaviour,
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            state: Mutex::new(State::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Seeds a group the caller already owns.
    pub fn seed_resource_group(&self, name: &str) -> String {
        let id = format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{name}");
        self.state().resource_groups.insert(
            name.to_string(),
            ResourceGroup {
                id: Some(id.clone()),
                name: Some(name.to_string()),
                location: "westus".to_string(),
                tags: BTreeMap::new(),
            },
        );
        id
    }

    /// Seeds a network with two subnets, the first bound to `security_group_id`.
    pub fn seed_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        security_group_id: Option<&str>,
    ) -> VirtualNetwork {
        let id = arm_id(resource_group, "Microsoft.Network/virtualNetworks", name);
        let subnet = |subnet: &str, nsg: Option<&str>| Subnet {
            id: Some(format!("{id}/subnets/{subnet}")),
            name: Some(subnet.to_string()),
            properties: Some(SubnetProperties {
                address_prefix: None,
                network_security_group: nsg.map(SubResource::new),
            }),
        };
        let mut vnet = azinfra_core::provision::network::virtual_network_spec("westus", "");
        vnet.id = Some(id.clone());
        vnet.name = Some(name.to_string());
        if let Some(props) = vnet.properties.as_mut() {
            props.subnets = vec![subnet("nodes", security_group_id), subnet("other", None)];
        }
        self.state()
            .virtual_networks
            .insert(format!("{resource_group}/{name}"), vnet.clone());
        vnet
    }

    pub fn seed_security_group(&self, resource_group: &str, name: &str) -> String {
        let id = arm_id(resource_group, "Microsoft.Network/networkSecurityGroups", name);
        self.state().security_groups.insert(
            format!("{resource_group}/{name}"),
            SecurityGroup {
                id: Some(id.clone()),
                name: Some(name.to_string()),
                ..SecurityGroup::default()
            },
        );
        id
    }
}

fn not_found(kind: &str, name: &str) -> CloudError {
    CloudError::Api {
        method: "GET".to_string(),
        url: format!("fake://{kind}/{name}"),
        status: 404,
        code: format!("{kind}NotFound"),
        message: format!("{kind} '{name}' could not be found"),
    }
}

#[async_trait]
impl ResourceGroupsApi for FakeCloud {
    async fn get_resource_group(&self, name: &str) -> Result<ResourceGroup, CloudError> {
        let state = self.record(format!("get_resource_group {name}"));
        state
            .resource_groups
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("ResourceGroup", name))
    }

    async fn create_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<ResourceGroup, CloudError> {
        let mut state = self.record(format!("create_resource_group {name}"));
        let mut created = group.clone();
        created.id = Some(format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{name}"));
        created.name = Some(name.to_string());
        state.resource_groups.insert(name.to_string(), created.clone());
        Ok(created)
    }
}

#[async_trait]
impl DnsZonesApi for FakeCloud {
    async fn list_zones(&self, next_link: Option<&str>) -> Result<Page<DnsZone>, CloudError> {
        self.record(format!("list_zones {}", next_link.unwrap_or("-")));
        let index: usize = next_link
            .and_then(|link| link.strip_prefix("page-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let pages = &self.behaviour.dns_zone_pages;
        let value = pages
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|zone| DnsZone {
                id: Some(arm_id("dns", "Microsoft.Network/dnszones", &zone)),
                name: Some(zone),
                location: Some("global".to_string()),
            })
            .collect();
        let next_link = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(Page { value, next_link })
    }
}

#[async_trait]
impl IdentityApi for FakeCloud {
    async fn create_identity(
        &self,
        resource_group: &str,
        name: &str,
        identity: &Identity,
    ) -> Result<Identity, CloudError> {
        let mut state = self.record(format!("create_identity {name}"));
        let mut created = identity.clone();
        created.id = Some(arm_id(
            resource_group,
            "Microsoft.ManagedIdentity/userAssignedIdentities",
            name,
        ));
        created.name = Some(name.to_string());
        created.properties = Some(IdentityProperties {
            principal_id: Some(format!("principal-{name}")),
            client_id: Some(format!("client-{name}")),
            tenant_id: None,
        });
        state
            .identities
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(created)
    }
}

#[async_trait]
impl AuthorizationApi for FakeCloud {
    async fn list_role_definitions(
        &self,
        scope: &str,
        next_link: Option<&str>,
    ) -> Result<Page<RoleDefinition>, CloudError> {
        self.record(format!("list_role_definitions {scope}"));
        let definition = |role: &str, guid: &str| RoleDefinition {
            id: Some(format!(
                "/subscriptions/{SUBSCRIPTION}/providers/Microsoft.Authorization/roleDefinitions/{guid}"
            )),
            name: Some(guid.to_string()),
            properties: Some(RoleDefinitionProperties {
                role_name: Some(role.to_string()),
                role_type: Some("BuiltInRole".to_string()),
            }),
        };

        // Contributor sits on the second page
        if next_link.is_none() {
            return Ok(Page {
                value: vec![
                    definition("Reader", "acdd72a7"),
                    definition("Contributor Lite", "0000cafe"),
                ],
                next_link: Some("roles-2".to_string()),
            });
        }
        let value = if self.behaviour.contributor_exists {
            vec![definition("Contributor", "b24988ac")]
        } else {
            vec![definition("Owner", "8e3af657")]
        };
        Ok(Page::last(value))
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, CloudError> {
        let mut state = self.record(format!("create_role_assignment {name}"));
        state.role_assignment_attempts += 1;
        if state.role_assignment_attempts <= self.behaviour.reject_role_assignments {
            return Err(CloudError::Api {
                method: "PUT".to_string(),
                url: format!("fake://{scope}/roleAssignments/{name}"),
                status: 400,
                code: "PrincipalNotFound".to_string(),
                message: "Principal does not exist in the directory".to_string(),
            });
        }
        let prefix = format!("{scope}/providers/Microsoft.Authorization/roleAssignments/");
        let duplicate = state.role_assignments.iter().any(|(existing, bound)| {
            existing != name
                && bound.properties == assignment.properties
                && bound.id.as_deref().is_some_and(|id| id.starts_with(&prefix))
        });
        if duplicate {
            return Err(CloudError::Api {
                method: "PUT".to_string(),
                url: format!("fake://{scope}/roleAssignments/{name}"),
                status: 409,
                code: "RoleAssignmentExists".to_string(),
                message: "The role assignment already exists.".to_string(),
            });
        }
        let mut created = assignment.clone();
        created.id = Some(format!("{prefix}{name}"));
        created.name = Some(name.to_string());
        state.role_assignments.insert(name.to_string(), created.clone());
        Ok(created)
    }
}

#[async_trait]
impl NetworkApi for FakeCloud {
    async fn get_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork, CloudError> {
        let state = self.record(format!("get_virtual_network {resource_group}/{name}"));
        state
            .virtual_networks
            .get(&format!("{resource_group}/{name}"))
            .cloned()
            .ok_or_else(|| not_found("VirtualNetwork", name))
    }

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, CloudError> {
        let state = self.record(format!("get_security_group {resource_group}/{name}"));
        state
            .security_groups
            .get(&format!("{resource_group}/{name}"))
            .cloned()
            .ok_or_else(|| not_found("NetworkSecurityGroup", name))
    }

    async fn begin_create_security_group(
        &self,
        resource_group: &str,
        name: &str,
        group: &SecurityGroup,
    ) -> Result<Poller<SecurityGroup>, CloudError> {
        let mut state = self.record(format!("create_security_group {name}"));
        let mut created = group.clone();
        created.id = Some(arm_id(
            resource_group,
            "Microsoft.Network/networkSecurityGroups",
            name,
        ));
        created.name = Some(name.to_string());
        state
            .security_groups
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }

    async fn begin_create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<Poller<VirtualNetwork>, CloudError> {
        let mut state = self.record(format!("create_virtual_network {name}"));
        let id = arm_id(resource_group, "Microsoft.Network/virtualNetworks", name);
        let mut created = network.clone();
        created.id = Some(id.clone());
        created.name = Some(name.to_string());
        if let Some(props) = created.properties.as_mut() {
            if self.behaviour.strip_subnets {
                props.subnets.clear();
            }
            for subnet in &mut props.subnets {
                let subnet_name = subnet.name.clone().unwrap_or_default();
                subnet.id = Some(format!("{id}/subnets/{subnet_name}"));
            }
            props.provisioning_state = Some("Succeeded".to_string());
        }
        state
            .virtual_networks
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }

    async fn begin_create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<Poller<PublicIpAddress>, CloudError> {
        let mut state = self.record(format!("create_public_ip {name}"));
        let mut created = address.clone();
        created.id = Some(arm_id(
            resource_group,
            "Microsoft.Network/publicIPAddresses",
            name,
        ));
        created.name = Some(name.to_string());
        state
            .public_ips
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }

    async fn begin_create_load_balancer(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<Poller<LoadBalancer>, CloudError> {
        let mut state = self.record(format!("create_load_balancer {name}"));
        let mut created = load_balancer.clone();
        created.id = Some(arm_id(resource_group, "Microsoft.Network/loadBalancers", name));
        created.name = Some(name.to_string());
        state
            .load_balancers
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }
}

#[async_trait]
impl PrivateDnsApi for FakeCloud {
    async fn begin_create_private_zone(
        &self,
        resource_group: &str,
        name: &str,
        zone: &PrivateZone,
    ) -> Result<Poller<PrivateZone>, CloudError> {
        let mut state = self.record(format!("create_private_zone {name}"));
        let mut created = zone.clone();
        created.id = Some(arm_id(resource_group, "Microsoft.Network/privateDnsZones", name));
        created.name = Some(name.to_string());
        state
            .private_zones
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }

    async fn begin_create_zone_link(
        &self,
        resource_group: &str,
        zone: &str,
        name: &str,
        link: &VirtualNetworkLink,
    ) -> Result<Poller<VirtualNetworkLink>, CloudError> {
        let mut state = self.record(format!("create_zone_link {zone}/{name}"));
        let mut created = link.clone();
        created.id = Some(format!(
            "{}/virtualNetworkLinks/{name}",
            arm_id(resource_group, "Microsoft.Network/privateDnsZones", zone)
        ));
        created.name = Some(name.to_string());
        state
            .zone_links
            .insert(format!("{resource_group}/{zone}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }
}

#[async_trait]
impl StorageApi for FakeCloud {
    async fn begin_create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        account: &StorageAccountCreate,
    ) -> Result<Poller<StorageAccount>, CloudError> {
        let mut state = self.record(format!("create_storage_account {name}"));
        state
            .storage_accounts
            .insert(name.to_string(), account.clone());
        Ok(Poller::ready(StorageAccount {
            id: Some(arm_id(
                resource_group,
                "Microsoft.Storage/storageAccounts",
                name,
            )),
            name: Some(name.to_string()),
            location: Some(account.location.clone()),
            sku: Some(account.sku.clone()),
        }))
    }

    async fn create_blob_container(
        &self,
        _resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<BlobContainer, CloudError> {
        let mut state = self.record(format!("create_blob_container {account}/{name}"));
        let container = BlobContainer {
            id: None,
            name: Some(name.to_string()),
        };
        state
            .containers
            .insert(format!("{account}/{name}"), container.clone());
        Ok(container)
    }

    async fn list_keys(
        &self,
        _resource_group: &str,
        account: &str,
    ) -> Result<StorageAccountKeys, CloudError> {
        self.record(format!("list_keys {account}"));
        if self.behaviour.no_storage_keys {
            return Ok(StorageAccountKeys::default());
        }
        Ok(StorageAccountKeys {
            keys: vec![StorageAccountKey {
                key_name: Some("key1".to_string()),
                // base64("fake-storage-key")
                value: Some("ZmFrZS1zdG9yYWdlLWtleQ==".to_string()),
                permissions: Some("FULL".to_string()),
            }],
        })
    }
}

#[async_trait]
impl BlobApi for FakeCloud {
    fn blob_url(&self, target: &BlobTarget) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            target.account, target.container, target.blob
        )
    }

    async fn begin_copy_from_url(
        &self,
        credential: &SharedKeyCredential,
        target: &BlobTarget,
        source_url: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Poller<BlobCopy>, CloudError> {
        let url = self.blob_url(target);
        let mut state = self.record(format!("copy_blob {}", credential.account()));
        state
            .copies
            .push((url.clone(), source_url.to_string(), metadata.clone()));
        Ok(Poller::ready(BlobCopy {
            url,
            copy_id: Some("copy-1".to_string()),
            status: "success".to_string(),
            progress: None,
        }))
    }
}

#[async_trait]
impl ComputeApi for FakeCloud {
    async fn begin_create_image(
        &self,
        resource_group: &str,
        name: &str,
        image: &Image,
    ) -> Result<Poller<Image>, CloudError> {
        let mut state = self.record(format!("create_image {name}"));
        let mut created = image.clone();
        created.id = Some(arm_id(resource_group, "Microsoft.Compute/images", name));
        created.name = Some(name.to_string());
        state
            .images
            .insert(format!("{resource_group}/{name}"), created.clone());
        Ok(Poller::ready(created))
    }
}

pub fn options() -> InfraOptions {
    InfraOptions {
        name: "foo".to_string(),
        infra_id: "bar".to_string(),
        base_domain: BASE_DOMAIN.to_string(),
        rhcos_image: RHCOS_IMAGE.to_string(),
        ..InfraOptions::default()
    }
}

pub fn orchestrator(fake: &Arc<FakeCloud>) -> Orchestrator {
    orchestrator_with(fake, CancellationToken::new())
}

pub fn orchestrator_with(fake: &Arc<FakeCloud>, cancel: CancellationToken) -> Orchestrator {
    Orchestrator::new(
        Clients::from_provider(fake.clone()),
        SUBSCRIPTION,
        OrchestratorSettings::immediate(),
        cancel,
    )
}
