//! Public base-domain lookup and the cluster's private zone.

use snafu::ResultExt;
use tracing::{debug, info};

use super::{Target, complete, private_zone_name, required, resource_name};
use crate::client::DnsZonesApi;
use crate::error::{
    BaseDomainNotFoundSnafu, CreatePrivateZoneSnafu, CreateZoneLinkSnafu, Error, ListDnsZonesSnafu,
};
use crate::models::{PrivateZone, SubResource, VirtualNetworkLink, VirtualNetworkLinkProperties};

/// Private zones and their links are global resources.
pub const PRIVATE_ZONE_LOCATION: &str = "global";

/// Id of the public zone named exactly `base_domain`, searching every page of the listing.
pub async fn find_base_domain_zone(
    api: &dyn DnsZonesApi,
    base_domain: &str,
) -> Result<String, Error> {
    let mut next_link: Option<String> = None;
    let mut pages = 0u32;
    loop {
        let page = api
            .list_zones(next_link.as_deref())
            .await
            .context(ListDnsZonesSnafu)?;
        pages += 1;

        if let Some(zone) = page
            .value
            .iter()
            .find(|zone| zone.name.as_deref() == Some(base_domain))
        {
            return required(zone.id.as_deref(), "DNS zone", base_domain, "id");
        }

        match page.next_link.filter(|link| !link.is_empty()) {
            Some(link) => next_link = Some(link),
            None => break,
        }
    }

    debug!(base_domain, pages, "base domain zone not found");
    BaseDomainNotFoundSnafu { base_domain }.fail()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateDns {
    pub zone_id: String,
    pub zone_name: String,
}

/// Creates `{name}-azurecluster.{baseDomain}` and links it to `vnet_id` without registration.
pub async fn create_private_dns(
    target: &Target<'_>,
    name: &str,
    infra_id: &str,
    base_domain: &str,
    vnet_id: &str,
) -> Result<PrivateDns, Error> {
    let zone_name = private_zone_name(name, base_domain);
    let spec = PrivateZone {
        location: PRIVATE_ZONE_LOCATION.to_string(),
        ..PrivateZone::default()
    };
    let zone = complete(
        target
            .clients
            .private_dns
            .begin_create_private_zone(target.resource_group, &zone_name, &spec),
        target.cancel,
    )
    .await
    .context(CreatePrivateZoneSnafu { name: &zone_name })?;

    let created = PrivateDns {
        zone_id: required(zone.id.as_deref(), "private DNS zone", &zone_name, "id")?,
        zone_name: zone.name.unwrap_or_else(|| zone_name.clone()),
    };
    info!(name = %created.zone_name, "Successfully created private DNS zone");

    let link_name = resource_name(name, infra_id);
    let link = VirtualNetworkLink {
        location: PRIVATE_ZONE_LOCATION.to_string(),
        properties: VirtualNetworkLinkProperties {
            virtual_network: SubResource::new(vnet_id),
            registration_enabled: false,
            virtual_network_link_state: None,
        },
        ..VirtualNetworkLink::default()
    };
    complete(
        target.clients.private_dns.begin_create_zone_link(
            target.resource_group,
            &created.zone_name,
            &link_name,
            &link,
        ),
        target.cancel,
    )
    .await
    .context(CreateZoneLinkSnafu {
        zone: &created.zone_name,
        name: &link_name,
    })?;
    info!(name = %link_name, "Successfully created private DNS zone link");

    Ok(created)
}
