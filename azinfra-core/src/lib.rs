//! Provisioning orchestrator for the Azure infrastructure a hosted cluster runs on.
//!
//! The crate stands up, in a fixed order:
//! - a resource group (found or created)
//! - a managed identity bound to the `Contributor` role
//! - a virtual network with a security group (reused or created)
//! - a private DNS zone linked to that network
//! - a public IP and an egress load balancer
//! - a bootable compute image copied from an RHCOS VHD
//!
//! and returns an [`InfraOutput`] record for downstream cluster bring-up.
//!
//! Every remote call goes through the service traits in [`client`], so the whole workflow
//! can be driven against an in-memory fake.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod lro;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod provision;
pub mod resource_id;
pub mod retry;

pub use auth::{AzureCredentials, ClientSecretCredential, StaticCredential, TokenCredential};
pub use client::Clients;
pub use config::{CloudEnvironment, OrchestratorSettings};
pub use error::{CloudError, Error};
pub use orchestrator::{InfraOptions, Orchestrator};
pub use output::InfraOutput;
pub use tokio_util::sync::CancellationToken;
