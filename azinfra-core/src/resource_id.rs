//! Azure Resource Manager resource identifiers.
//!
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{child}/{name}...]`

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, InvalidResourceIdSnafu};

lazy_static! {
    static ref RESOURCE_ID: Regex = Regex::new(
        r"(?i)^/subscriptions/(?P<sub>[^/]+)/resourceGroups/(?P<rg>[^/]+)/providers/(?P<ns>[^/]+)/(?P<type>[^/]+)/(?P<name>[^/]+)(?P<rest>(?:/[^/]+/[^/]+)*)/?$"
    )
    .expect("resource id pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    /// Provider namespace, e.g. `Microsoft.Network`.
    pub namespace: String,
    /// Top level resource type, e.g. `virtualNetworks`.
    pub resource_type: String,
    pub name: String,
    /// Child segments after the top level resource, as (type, name) pairs.
    pub children: Vec<(String, String)>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Option<Self> {
        let caps = RESOURCE_ID.captures(id.trim())?;
        let children = caps
            .name("rest")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();

        Some(Self {
            subscription_id: caps["sub"].to_string(),
            resource_group: caps["rg"].to_string(),
            namespace: caps["ns"].to_string(),
            resource_type: caps["type"].to_string(),
            name: caps["name"].to_string(),
            children,
        })
    }

    /// Parses `id` and checks it names a top level resource of `kind`
    /// (`{namespace}/{type}`, compared case-insensitively).
    pub fn parse_kind(id: &str, kind: &str) -> Result<Self, Error> {
        let parsed = Self::parse(id).filter(|r| {
            r.children.is_empty()
                && format!("{}/{}", r.namespace, r.resource_type).eq_ignore_ascii_case(kind)
        });
        parsed.ok_or_else(|| InvalidResourceIdSnafu { id, kind }.build())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id, self.resource_group, self.namespace, self.resource_type, self.name
        )?;
        for (kind, name) in &self.children {
            write!(f, "/{kind}/{name}")?;
        }
        Ok(())
    }
}

pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

/// Id of a sub-resource of a load balancer that does not exist yet, e.g. the backend pool an
/// outbound rule points at in the same create request.
pub fn load_balancer_child_id(
    subscription_id: &str,
    resource_group: &str,
    load_balancer: &str,
    child_type: &str,
    child_name: &str,
) -> String {
    format!(
        "{}/providers/Microsoft.Network/loadBalancers/{load_balancer}/{child_type}/{child_name}",
        resource_group_id(subscription_id, resource_group)
    )
}
