//! Virtual network and security group: reuse an existing network or create both.

use snafu::ResultExt;
use tracing::{info, warn};

use super::{Target, complete, required, resource_name, security_group_name};
use crate::error::{
    CreateSecurityGroupSnafu, CreateVirtualNetworkSnafu, Error, GetSecurityGroupSnafu,
    GetVirtualNetworkSnafu, InvalidResourceIdSnafu, NoSubnetsSnafu,
};
use crate::models::{
    AddressSpace, SecurityGroup, SubResource, Subnet, SubnetProperties, VirtualNetwork,
    VirtualNetworkProperties,
};
use crate::resource_id::ResourceId;

pub const VNET_ADDRESS_PREFIX: &str = "10.0.0.0/16";
pub const SUBNET_ADDRESS_PREFIX: &str = "10.0.0.0/24";
pub const SUBNET_NAME: &str = "default";

const VIRTUAL_NETWORK_KIND: &str = "Microsoft.Network/virtualNetworks";

/// Decided once, before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPlan {
    /// Use the network with this id as is.
    Reuse { id: ResourceId },
    Create {
        name: String,
        security_group: SecurityGroupPlan,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityGroupPlan {
    /// A group the caller already has in the target resource group.
    Existing { name: String },
    Create { name: String },
}

impl NetworkPlan {
    pub fn new(
        vnet_id: Option<&str>,
        security_group: Option<&str>,
        name: &str,
        infra_id: &str,
    ) -> Result<Self, Error> {
        if let Some(vnet_id) = vnet_id {
            let id = ResourceId::parse_kind(vnet_id, VIRTUAL_NETWORK_KIND)?;
            if security_group.is_some() {
                warn!("--network-security-group is ignored when reusing a virtual network");
            }
            return Ok(NetworkPlan::Reuse { id });
        }

        let security_group = match security_group {
            Some(existing) => SecurityGroupPlan::Existing {
                name: existing.to_string(),
            },
            None => SecurityGroupPlan::Create {
                name: security_group_name(name, infra_id),
            },
        };
        Ok(NetworkPlan::Create {
            name: resource_name(name, infra_id),
            security_group,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedNetwork {
    pub vnet_id: String,
    pub vnet_name: String,
    /// First subnet; the one cluster nodes are placed in.
    pub subnet_id: String,
    /// Empty when a reused subnet has no security group attached.
    pub security_group_id: String,
}

pub async fn provision_network(
    target: &Target<'_>,
    plan: &NetworkPlan,
) -> Result<ProvisionedNetwork, Error> {
    match plan {
        NetworkPlan::Reuse { id } => reuse_network(target, id).await,
        NetworkPlan::Create {
            name,
            security_group,
        } => create_network(target, name, security_group).await,
    }
}

async fn reuse_network(target: &Target<'_>, id: &ResourceId) -> Result<ProvisionedNetwork, Error> {
    let vnet = target
        .clients
        .network
        .get_virtual_network(&id.resource_group, &id.name)
        .await
        .context(GetVirtualNetworkSnafu { id: id.to_string() })?;

    let network = validate_network(&vnet, &id.name)?;
    info!(name = %network.vnet_name, "Successfully retrieved existing vnet");

    if !network.security_group_id.is_empty() {
        match ResourceId::parse(&network.security_group_id) {
            Some(nsg) => info!(
                name = %nsg.name,
                resource_group = %nsg.resource_group,
                "Successfully retrieved existing network security group"
            ),
            None => {
                return InvalidResourceIdSnafu {
                    id: network.security_group_id.clone(),
                    kind: "Microsoft.Network/networkSecurityGroups",
                }
                .fail();
            }
        }
    }
    Ok(network)
}

async fn create_network(
    target: &Target<'_>,
    name: &str,
    security_group: &SecurityGroupPlan,
) -> Result<ProvisionedNetwork, Error> {
    let security_group_id = match security_group {
        SecurityGroupPlan::Existing { name } => {
            let group = target
                .clients
                .network
                .get_security_group(target.resource_group, name)
                .await
                .context(GetSecurityGroupSnafu { name })?;
            let id = required(group.id.as_deref(), "network security group", name, "id")?;
            info!(name = %name, "Successfully retrieved existing network security group");
            id
        }
        SecurityGroupPlan::Create { name } => {
            let spec = SecurityGroup {
                location: Some(target.location.to_string()),
                ..SecurityGroup::default()
            };
            let group = complete(
                target
                    .clients
                    .network
                    .begin_create_security_group(target.resource_group, name, &spec),
                target.cancel,
            )
            .await
            .context(CreateSecurityGroupSnafu { name })?;
            let id = required(group.id.as_deref(), "network security group", name, "id")?;
            info!(
                name = %group.name.as_deref().unwrap_or(name),
                "Successfully created network security group"
            );
            id
        }
    };

    let spec = virtual_network_spec(target.location, &security_group_id);
    let vnet = complete(
        target
            .clients
            .network
            .begin_create_virtual_network(target.resource_group, name, &spec),
        target.cancel,
    )
    .await
    .context(CreateVirtualNetworkSnafu { name })?;

    let mut network = validate_network(&vnet, name)?;
    if network.security_group_id.is_empty() {
        network.security_group_id = security_group_id;
    }
    info!(name = %network.vnet_name, "Successfully created vnet");
    Ok(network)
}

/// One `10.0.0.0/16` address space with a single `default` subnet bound to the security group.
pub fn virtual_network_spec(location: &str, security_group_id: &str) -> VirtualNetwork {
    VirtualNetwork {
        location: Some(location.to_string()),
        properties: Some(VirtualNetworkProperties {
            address_space: Some(AddressSpace {
                address_prefixes: vec![VNET_ADDRESS_PREFIX.to_string()],
            }),
            subnets: vec![Subnet {
                name: Some(SUBNET_NAME.to_string()),
                properties: Some(SubnetProperties {
                    address_prefix: Some(SUBNET_ADDRESS_PREFIX.to_string()),
                    network_security_group: Some(SubResource::new(security_group_id)),
                }),
                ..Subnet::default()
            }],
            provisioning_state: None,
        }),
        ..VirtualNetwork::default()
    }
}

/// Everything later steps read from a network must be present.
pub fn validate_network(vnet: &VirtualNetwork, name: &str) -> Result<ProvisionedNetwork, Error> {
    let vnet_id = required(vnet.id.as_deref(), "virtual network", name, "id")?;
    let vnet_name = required(vnet.name.as_deref(), "virtual network", name, "name")?;
    let Some(subnet) = vnet.subnets().first() else {
        return NoSubnetsSnafu { network: vnet_name }.fail();
    };
    let subnet_id = required(subnet.id.as_deref(), "subnet", &vnet_name, "id")?;
    required(subnet.name.as_deref(), "subnet", &vnet_name, "name")?;

    Ok(ProvisionedNetwork {
        vnet_id,
        vnet_name,
        subnet_id,
        security_group_id: subnet.security_group_id().unwrap_or_default().to_string(),
    })
}
