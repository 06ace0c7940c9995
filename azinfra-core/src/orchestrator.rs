//! Runs the provisioning steps in order and assembles the [`InfraOutput`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::client::Clients;
use crate::config::{DEFAULT_LOCATION, OrchestratorSettings};
use crate::error::{Error, InvalidOptionsSnafu, StepCancelledSnafu};
use crate::output::{InfraOutput, write_output_file};
use crate::provision::dns::{create_private_dns, find_base_domain_zone};
use crate::provision::egress::provision_egress;
use crate::provision::identity::{bind_contributor_role, create_managed_identity};
use crate::provision::image::{provision_image, validate_image_source};
use crate::provision::network::{NetworkPlan, provision_network};
use crate::provision::resource_group::resolve_resource_group;
use crate::provision::Target;

/// What to provision.
#[derive(Debug, Clone)]
pub struct InfraOptions {
    pub name: String,
    pub infra_id: String,
    pub base_domain: String,
    pub location: String,
    /// Existing group to provision into; created as `{name}-{infraID}` when absent.
    pub resource_group_name: Option<String>,
    pub resource_group_tags: BTreeMap<String, String>,
    /// Existing virtual network to reuse instead of creating one.
    pub vnet_id: Option<String>,
    /// Existing security group in `resource_group_name` for a new network.
    pub network_security_group: Option<String>,
    pub rhcos_image: String,
    pub output_file: Option<PathBuf>,
}

impl Default for InfraOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            infra_id: String::new(),
            base_domain: String::new(),
            location: DEFAULT_LOCATION.to_string(),
            resource_group_name: None,
            resource_group_tags: BTreeMap::new(),
            vnet_id: None,
            network_security_group: None,
            rhcos_image: String::new(),
            output_file: None,
        }
    }
}

impl InfraOptions {
    /// Checks everything that can be checked without talking to the cloud.
    pub fn validate(&self) -> Result<(), Error> {
        for (flag, value) in [
            ("--name", &self.name),
            ("--infra-id", &self.infra_id),
            ("--location", &self.location),
            ("--rhcos-image", &self.rhcos_image),
        ] {
            if value.trim().is_empty() {
                return InvalidOptionsSnafu {
                    message: format!("{flag} is required"),
                }
                .fail();
            }
        }

        if self.network_security_group.is_some() && self.resource_group_name.is_none() {
            return InvalidOptionsSnafu {
                message: "flag --resource-group-name is required when using --network-security-group",
            }
            .fail();
        }

        validate_image_source(&self.rhcos_image)
    }
}

/// Holds the clients for one subscription and drives a run.
#[derive(Debug)]
pub struct Orchestrator {
    clients: Clients,
    subscription_id: String,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        clients: Clients,
        subscription_id: impl Into<String>,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clients,
            subscription_id: subscription_id.into(),
            settings,
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn checkpoint(&self, step: &str) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return StepCancelledSnafu { step }.fail();
        }
        Ok(())
    }

    /// Provisions everything in order, stopping at the first failure. Resources created
    /// before a failure are left in place.
    #[instrument(skip_all, fields(name = %options.name, infra_id = %options.infra_id))]
    pub async fn run(&self, options: &InfraOptions) -> Result<InfraOutput, Error> {
        options.validate()?;
        let plan = NetworkPlan::new(
            options.vnet_id.as_deref(),
            options.network_security_group.as_deref(),
            &options.name,
            &options.infra_id,
        )?;

        let mut result = InfraOutput {
            base_domain: options.base_domain.clone(),
            location: options.location.clone(),
            infra_id: options.infra_id.clone(),
            ..InfraOutput::default()
        };

        // Resource group
        self.checkpoint("resource group")?;
        let group = resolve_resource_group(
            self.clients.resource_groups.as_ref(),
            options.resource_group_name.as_deref(),
            &options.name,
            &options.infra_id,
            &options.location,
            &options.resource_group_tags,
        )
        .await?;
        result.resource_group_name.clone_from(&group.name);

        let target = Target {
            clients: &self.clients,
            cancel: &self.cancel,
            subscription_id: &self.subscription_id,
            resource_group: &group.name,
            location: &options.location,
        };

        // Public zone hosting the base domain
        self.checkpoint("base domain lookup")?;
        result.public_zone_id =
            find_base_domain_zone(self.clients.dns_zones.as_ref(), &options.base_domain).await?;

        // Managed identity and its role
        self.checkpoint("managed identity")?;
        let identity = create_managed_identity(&target, &options.name, &options.infra_id).await?;
        result.machine_identity_id.clone_from(&identity.id);

        self.checkpoint("role assignment")?;
        bind_contributor_role(
            &target,
            &group.id,
            &identity,
            &self.settings.role_assignment_retry,
            self.settings.role_assignment_retryable,
        )
        .await?;

        // Network
        self.checkpoint("virtual network")?;
        let network = provision_network(&target, &plan).await?;
        result.vnet_id = network.vnet_id;
        result.vnet_name = network.vnet_name;
        result.subnet_id = network.subnet_id;
        result.security_group_id = network.security_group_id;

        // Private DNS
        self.checkpoint("private DNS zone")?;
        let private_dns = create_private_dns(
            &target,
            &options.name,
            &options.infra_id,
            &options.base_domain,
            &result.vnet_id,
        )
        .await?;
        result.private_zone_id = private_dns.zone_id;

        // Egress
        self.checkpoint("egress load balancer")?;
        provision_egress(&target, &options.infra_id).await?;

        // Boot image
        self.checkpoint("boot image")?;
        result.boot_image_id = provision_image(&target, &options.rhcos_image).await?;

        if let Some(path) = &options.output_file {
            write_output_file(&result, path)?;
        }

        info!(resource_group = %result.resource_group_name, "Successfully created infrastructure");
        Ok(result)
    }
}
