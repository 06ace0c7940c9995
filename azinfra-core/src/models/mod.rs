//! Wire types for the Azure Resource Manager REST API.
//!
//! Only the fields this crate reads or writes are modelled. Everything is optional on the way
//! in because the control plane omits fields freely; callers check what they rely on.

pub mod compute;
pub mod dns;
pub mod identity;
pub mod network;
pub mod resources;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use compute::*;
pub use dns::*;
pub use identity::*;
pub use network::*;
pub use resources::*;
pub use storage::*;

/// Reference to another resource by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl Sku {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            tier: None,
        }
    }
}

/// One page of a list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(rename = "nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

impl<T> Page<T> {
    pub fn last(value: Vec<T>) -> Self {
        Self {
            value,
            next_link: None,
        }
    }
}

/// `properties.provisioningState` values that end an operation.
pub fn is_terminal_state(state: &str) -> bool {
    matches!(
        state.to_ascii_lowercase().as_str(),
        "succeeded" | "failed" | "canceled" | "cancelled"
    )
}

pub fn is_success_state(state: &str) -> bool {
    state.eq_ignore_ascii_case("succeeded")
}
