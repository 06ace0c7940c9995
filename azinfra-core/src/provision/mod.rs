//! The individual provisioning steps.
//!
//! Each step takes a [`Target`] describing where resources land and returns the identifiers
//! later steps need. Steps never retry (except the role binding) and never clean up.

pub mod dns;
pub mod egress;
pub mod identity;
pub mod image;
pub mod network;
pub mod resource_group;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::client::Clients;
use crate::error::{CloudError, Error, MissingFieldSnafu};
use crate::lro::Poller;

/// Subscription, resource group and location every resource of a run is created in.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub clients: &'a Clients,
    pub cancel: &'a CancellationToken,
    pub subscription_id: &'a str,
    pub resource_group: &'a str,
    pub location: &'a str,
}

/// `{name}-{infraID}`: resource group, identity, virtual network and zone link.
pub fn resource_name(name: &str, infra_id: &str) -> String {
    format!("{name}-{infra_id}")
}

pub fn security_group_name(name: &str, infra_id: &str) -> String {
    format!("{name}-{infra_id}-nsg")
}

pub fn private_zone_name(name: &str, base_domain: &str) -> String {
    format!("{name}-azurecluster.{base_domain}")
}

/// Starts a long-running operation and waits for it to finish.
pub(crate) async fn complete<T, F>(begin: F, cancel: &CancellationToken) -> Result<T, CloudError>
where
    T: Send + 'static,
    F: Future<Output = Result<Poller<T>, CloudError>>,
{
    let poller = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(CloudError::Cancelled),
        poller = begin => poller?,
    };
    poller.await_terminal(cancel).await
}

/// A non-empty string field the rest of the run depends on.
pub(crate) fn required(
    value: Option<&str>,
    resource: &'static str,
    name: &str,
    field: &'static str,
) -> Result<String, Error> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => MissingFieldSnafu {
            resource,
            name,
            field,
        }
        .fail(),
    }
}
