//! Managed identity and its `Contributor` role binding.

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Target, required, resource_name};
use crate::client::AuthorizationApi;
use crate::error::{
    CloudError, CreateIdentitySnafu, Error, ListRoleDefinitionsSnafu, RoleDefinitionNotFoundSnafu,
};
use crate::models::{Identity, RoleAssignment, RoleAssignmentProperties};
use crate::retry::{RetryError, RetryPolicy, retry};

/// The only role the machine identity is ever bound to.
pub const CONTRIBUTOR_ROLE: &str = "Contributor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub id: String,
    pub name: String,
    /// Authorization handle used for the role binding; distinct from `id`.
    pub principal_id: String,
}

/// Creates (or converges on) the `{name}-{infraID}` user assigned identity.
pub async fn create_managed_identity(
    target: &Target<'_>,
    name: &str,
    infra_id: &str,
) -> Result<ManagedIdentity, Error> {
    let identity_name = resource_name(name, infra_id);
    let spec = Identity {
        location: target.location.to_string(),
        ..Identity::default()
    };
    let identity = target
        .clients
        .identity
        .create_identity(target.resource_group, &identity_name, &spec)
        .await
        .context(CreateIdentitySnafu {
            name: &identity_name,
        })?;

    let created = ManagedIdentity {
        id: required(identity.id.as_deref(), "managed identity", &identity_name, "id")?,
        name: identity.name.clone().unwrap_or(identity_name.clone()),
        principal_id: required(
            identity.principal_id(),
            "managed identity",
            &identity_name,
            "principal id",
        )?,
    };
    info!(name = %created.id, "Successfully created managed identity");
    Ok(created)
}

/// Id of the role definition whose display name is exactly `role`, searching every page.
pub async fn find_role_definition(
    api: &dyn AuthorizationApi,
    scope: &str,
    role: &str,
) -> Result<String, Error> {
    let mut next_link: Option<String> = None;
    loop {
        let page = api
            .list_role_definitions(scope, next_link.as_deref())
            .await
            .context(ListRoleDefinitionsSnafu { scope })?;

        if let Some(definition) = page.value.iter().find(|d| d.role_name() == Some(role)) {
            return required(definition.id.as_deref(), "role definition", role, "id");
        }

        match page.next_link.filter(|link| !link.is_empty()) {
            Some(link) => next_link = Some(link),
            None => return RoleDefinitionNotFoundSnafu { role, scope }.fail(),
        }
    }
}

/// A binding of the same principal, role and scope made by an earlier run.
fn is_existing_assignment(err: &CloudError) -> bool {
    matches!(err, CloudError::Api { status: 409, code, .. } if code == "RoleAssignmentExists")
}

/// Binds `principal_id` to `role_definition_id` at `scope`.
///
/// A freshly created principal is rejected for a while until it propagates, so creation is
/// retried under `policy` for every error `should_retry` accepts. The assignment name is
/// generated once and reused by every attempt. An identical binding left by a previous run
/// counts as success.
pub async fn assign_role(
    api: &dyn AuthorizationApi,
    scope: &str,
    role_definition_id: &str,
    principal_id: &str,
    policy: &RetryPolicy,
    should_retry: fn(&CloudError) -> bool,
    cancel: &CancellationToken,
) -> Result<RoleAssignment, Error> {
    let assignment_name = Uuid::new_v4().to_string();
    let assignment = RoleAssignment {
        properties: RoleAssignmentProperties {
            role_definition_id: role_definition_id.to_string(),
            principal_id: principal_id.to_string(),
            principal_type: Some("ServicePrincipal".to_string()),
        },
        ..RoleAssignment::default()
    };

    let outcome = retry(policy, cancel, should_retry, |attempt| {
        let assignment_name = assignment_name.as_str();
        let assignment = &assignment;
        async move {
            match api
                .create_role_assignment(scope, assignment_name, assignment)
                .await
            {
                Err(err) if is_existing_assignment(&err) => {
                    info!("Role assignment already exists");
                    Ok(assignment.clone())
                }
                Err(err) => {
                    debug!(attempt, error = %err, "role assignment rejected");
                    Err(err)
                }
                ok => ok,
            }
        }
    })
    .await;

    match outcome {
        Ok(created) => Ok(created),
        Err(
            RetryError::Exhausted { attempts, source } | RetryError::Permanent { attempts, source },
        ) => {
            warn!(attempts, "giving up on role assignment");
            Err(Error::RoleAssignment { attempts, source })
        }
        Err(RetryError::Cancelled { attempts }) => Err(Error::RoleAssignment {
            attempts,
            source: CloudError::Cancelled,
        }),
    }
}

/// Looks up `Contributor` in the resource group scope and binds the identity to it.
pub async fn bind_contributor_role(
    target: &Target<'_>,
    resource_group_id: &str,
    identity: &ManagedIdentity,
    policy: &RetryPolicy,
    should_retry: fn(&CloudError) -> bool,
) -> Result<RoleAssignment, Error> {
    let authorization = target.clients.authorization.as_ref();
    let role_definition_id =
        find_role_definition(authorization, resource_group_id, CONTRIBUTOR_ROLE).await?;

    info!("Assigning role to managed identity, this may take some time");
    let assignment = assign_role(
        authorization,
        resource_group_id,
        &role_definition_id,
        &identity.principal_id,
        policy,
        should_retry,
        target.cancel,
    )
    .await?;
    info!(name = %identity.id, "Successfully assigned contributor role to managed identity");
    Ok(assignment)
}
