//! Public IP and the outbound-only load balancer guest cluster nodes egress through.
//!
//! The load balancer carries no inbound rules; the in-cluster cloud provider adds those later.

use snafu::ResultExt;
use tracing::info;

use super::{Target, complete, required};
use crate::error::{CreateLoadBalancerSnafu, CreatePublicIpSnafu, Error};
use crate::models::{
    BackendAddressPool, FrontendIpConfiguration, FrontendIpConfigurationProperties, LoadBalancer,
    LoadBalancerProperties, OutboundRule, OutboundRuleProperties, Probe, ProbeProperties,
    PublicIpAddress, PublicIpAddressProperties, Sku, SubResource,
};
use crate::resource_id::load_balancer_child_id;

pub const HEALTH_PROBE_PORT: i32 = 30595;
pub const HEALTH_PROBE_PATH: &str = "/healthz";
const IDLE_TIMEOUT_MINUTES: i32 = 4;
const OUTBOUND_PORTS_PER_INSTANCE: i32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Egress {
    pub public_ip_id: String,
    pub load_balancer_id: String,
}

/// Static IPv4 address, standard SKU.
pub fn public_ip_spec(location: &str) -> PublicIpAddress {
    PublicIpAddress {
        location: Some(location.to_string()),
        sku: Some(Sku::named("Standard")),
        properties: Some(PublicIpAddressProperties {
            public_ip_address_version: Some("IPv4".to_string()),
            public_ip_allocation_method: Some("Static".to_string()),
            idle_timeout_in_minutes: Some(IDLE_TIMEOUT_MINUTES),
            ..PublicIpAddressProperties::default()
        }),
        ..PublicIpAddress::default()
    }
}

/// Frontend, backend pool, probe and outbound rule all share the infra id as their name. The
/// outbound rule references the pool and frontend by id before they exist, so the ids are built
/// from the load balancer's own path.
pub fn load_balancer_spec(
    subscription_id: &str,
    resource_group: &str,
    infra_id: &str,
    location: &str,
    public_ip_id: &str,
) -> LoadBalancer {
    let child = |kind: &str| {
        load_balancer_child_id(subscription_id, resource_group, infra_id, kind, infra_id)
    };

    LoadBalancer {
        location: Some(location.to_string()),
        sku: Some(Sku::named("Standard")),
        properties: Some(LoadBalancerProperties {
            frontend_ip_configurations: vec![FrontendIpConfiguration {
                name: infra_id.to_string(),
                properties: Some(FrontendIpConfigurationProperties {
                    private_ip_allocation_method: Some("Dynamic".to_string()),
                    public_ip_address: Some(SubResource::new(public_ip_id)),
                }),
                ..FrontendIpConfiguration::default()
            }],
            backend_address_pools: vec![BackendAddressPool {
                id: None,
                name: infra_id.to_string(),
            }],
            probes: vec![Probe {
                name: infra_id.to_string(),
                properties: ProbeProperties {
                    protocol: "Http".to_string(),
                    port: HEALTH_PROBE_PORT,
                    interval_in_seconds: 5,
                    number_of_probes: 2,
                    request_path: Some(HEALTH_PROBE_PATH.to_string()),
                },
            }],
            outbound_rules: vec![OutboundRule {
                name: infra_id.to_string(),
                properties: OutboundRuleProperties {
                    backend_address_pool: SubResource::new(child("backendAddressPools")),
                    frontend_ip_configurations: vec![SubResource::new(child(
                        "frontendIPConfigurations",
                    ))],
                    protocol: "All".to_string(),
                    allocated_outbound_ports: OUTBOUND_PORTS_PER_INSTANCE,
                    enable_tcp_reset: true,
                    idle_timeout_in_minutes: IDLE_TIMEOUT_MINUTES,
                },
            }],
            provisioning_state: None,
        }),
        ..LoadBalancer::default()
    }
}

/// Creates the public IP, then the load balancer fronted by it.
pub async fn provision_egress(target: &Target<'_>, infra_id: &str) -> Result<Egress, Error> {
    let address = complete(
        target.clients.network.begin_create_public_ip(
            target.resource_group,
            infra_id,
            &public_ip_spec(target.location),
        ),
        target.cancel,
    )
    .await
    .context(CreatePublicIpSnafu { name: infra_id })?;
    let public_ip_id = required(address.id.as_deref(), "public IP address", infra_id, "id")?;
    info!(name = %infra_id, "Successfully created public IP address for guest cluster egress load balancer");

    let spec = load_balancer_spec(
        target.subscription_id,
        target.resource_group,
        infra_id,
        target.location,
        &public_ip_id,
    );
    let load_balancer = complete(
        target
            .clients
            .network
            .begin_create_load_balancer(target.resource_group, infra_id, &spec),
        target.cancel,
    )
    .await
    .context(CreateLoadBalancerSnafu { name: infra_id })?;
    let load_balancer_id = required(load_balancer.id.as_deref(), "load balancer", infra_id, "id")?;
    info!(name = %infra_id, "Successfully created guest cluster egress load balancer");

    Ok(Egress {
        public_ip_id,
        load_balancer_id,
    })
}
