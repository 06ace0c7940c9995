use std::collections::BTreeMap;

use snafu::ResultExt;
use tracing::info;

use super::{required, resource_name};
use crate::client::ResourceGroupsApi;
use crate::error::{CreateResourceGroupSnafu, Error, GetResourceGroupSnafu};
use crate::models::ResourceGroup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub id: String,
    pub name: String,
}

/// Fetches `existing` if given (it must exist), otherwise creates `{name}-{infraID}` with `tags`.
pub async fn resolve_resource_group(
    api: &dyn ResourceGroupsApi,
    existing: Option<&str>,
    name: &str,
    infra_id: &str,
    location: &str,
    tags: &BTreeMap<String, String>,
) -> Result<ResolvedGroup, Error> {
    if let Some(existing) = existing {
        let group = api
            .get_resource_group(existing)
            .await
            .context(GetResourceGroupSnafu { name: existing })?;
        let resolved = ResolvedGroup {
            id: required(group.id.as_deref(), "resource group", existing, "id")?,
            name: required(group.name.as_deref(), "resource group", existing, "name")?,
        };
        info!(name = %resolved.name, "Successfully found existing resource group");
        return Ok(resolved);
    }

    let group_name = resource_name(name, infra_id);
    let spec = ResourceGroup {
        location: location.to_string(),
        tags: tags.clone(),
        ..ResourceGroup::default()
    };
    let group = api
        .create_resource_group(&group_name, &spec)
        .await
        .context(CreateResourceGroupSnafu { name: &group_name })?;

    let resolved = ResolvedGroup {
        id: required(group.id.as_deref(), "resource group", &group_name, "id")?,
        name: required(group.name.as_deref(), "resource group", &group_name, "name")?,
    };
    info!(name = %resolved.name, "Successfully created resource group");
    Ok(resolved)
}
