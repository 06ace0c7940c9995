//! `azinfra infra create`

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use azinfra_core::config::DEFAULT_LOCATION;
use azinfra_core::{
    CancellationToken, ClientSecretCredential, Clients, CloudEnvironment, InfraOptions,
    Orchestrator, OrchestratorSettings, StaticCredential, TokenCredential,
};
use clap::{Args, Parser};
use tracing::info;

use crate::credentials::{expand_path, load_client_secret, load_subscription};

#[derive(Debug, Parser, Clone)]
pub enum InfraCommands {
    /// Create the infrastructure a hosted cluster needs
    Create(CreateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CreateArgs {
    /// A name for the cluster
    #[clap(long)]
    pub name: String,

    /// Cluster ID
    #[clap(long)]
    pub infra_id: String,

    /// Path to a credentials file
    #[clap(long)]
    pub azure_creds: String,

    /// Location where cluster infra should be created
    #[clap(long, default_value = DEFAULT_LOCATION)]
    pub location: String,

    /// The ingress base domain for the cluster
    #[clap(long, default_value = "")]
    pub base_domain: String,

    /// An existing resource group to create the infrastructure resources under
    #[clap(long)]
    pub resource_group_name: Option<String>,

    /// Additional tags for a created resource group (e.g. 'key1=value1,key2=value2')
    #[clap(short = 't', long, value_delimiter = ',', value_parser = parse_tag)]
    pub resource_group_tags: Vec<(String, String)>,

    /// Name of an existing network security group to use in a new virtual network
    #[clap(long)]
    pub network_security_group: Option<String>,

    /// Resource ID of an existing virtual network to use
    #[clap(long)]
    pub vnet_id: Option<String>,

    /// URL of the RHCOS VHD to use for nodes
    #[clap(long)]
    pub rhcos_image: String,

    /// Path to file that will contain output information from infra resources
    #[clap(long)]
    pub output_file: Option<String>,

    /// Bearer token for the control plane instead of the credentials file's client secret
    #[clap(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

/// `key=value`; the value may be empty, the key may not.
pub fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("'{raw}' is not a key=value pair")),
    }
}

impl CreateArgs {
    pub fn to_options(&self) -> InfraOptions {
        InfraOptions {
            name: self.name.clone(),
            infra_id: self.infra_id.clone(),
            base_domain: self.base_domain.clone(),
            location: self.location.clone(),
            resource_group_name: non_empty(self.resource_group_name.as_deref()),
            resource_group_tags: self
                .resource_group_tags
                .iter()
                .cloned()
                .collect::<BTreeMap<_, _>>(),
            vnet_id: non_empty(self.vnet_id.as_deref()),
            network_security_group: non_empty(self.network_security_group.as_deref()),
            rhcos_image: self.rhcos_image.clone(),
            output_file: non_empty(self.output_file.as_deref()).map(|p| expand_path(&p)),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Handle infra commands
pub async fn handle_infra_command(cmd: InfraCommands, cancel: CancellationToken) -> Result<()> {
    match cmd {
        InfraCommands::Create(args) => create(&args, cancel).await,
    }
}

async fn create(args: &CreateArgs, cancel: CancellationToken) -> Result<()> {
    let options = args.to_options();
    // flag problems are reported before the credentials file is touched
    options.validate()?;

    let environment = CloudEnvironment::public();
    let creds_path = expand_path(&args.azure_creds);
    let (subscription_id, credential): (String, Arc<dyn TokenCredential>) =
        match non_empty(args.access_token.as_deref()) {
            Some(token) => {
                let creds = load_subscription(&creds_path)?;
                (creds.subscription_id, Arc::new(StaticCredential::new(token)))
            }
            None => {
                let creds = load_client_secret(&creds_path)?;
                let credential = ClientSecretCredential::new(
                    reqwest::Client::new(),
                    &environment.authority_host,
                    &creds,
                );
                (creds.subscription_id, Arc::new(credential))
            }
        };

    let settings = OrchestratorSettings::default();
    let clients = Clients::arm(
        &environment,
        &subscription_id,
        credential,
        &settings,
        cancel.clone(),
    );
    let orchestrator = Orchestrator::new(clients, subscription_id, settings, cancel);

    let output = orchestrator
        .run(&options)
        .await
        .context("failed to create infrastructure")?;

    if options.output_file.is_none() {
        print!("{}", output.to_yaml()?);
    }
    info!(infra_id = %output.infra_id, "Done");
    Ok(())
}
