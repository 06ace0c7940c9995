//! Azure Resource Manager REST client.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    AuthorizationApi, ComputeApi, DnsZonesApi, IdentityApi, NetworkApi, PrivateDnsApi,
    ResourceGroupsApi, StorageApi,
};
use crate::auth::TokenCredential;
use crate::config::CloudEnvironment;
use crate::error::{CloudError, DecodeSnafu, TransportSnafu};
use crate::lro::{Operation, PollStatus, Poller};
use crate::models::{
    BlobContainer, DnsZone, Identity, Image, LoadBalancer, Page, PrivateZone, PublicIpAddress,
    ResourceGroup, RoleAssignment, RoleDefinition, SecurityGroup, StorageAccount,
    StorageAccountCreate, StorageAccountKeys, VirtualNetwork, VirtualNetworkLink,
    is_success_state, is_terminal_state,
};

pub const RESOURCES_API_VERSION: &str = "2021-04-01";
pub const DNS_API_VERSION: &str = "2018-05-01";
pub const MSI_API_VERSION: &str = "2023-01-31";
pub const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
pub const NETWORK_API_VERSION: &str = "2023-09-01";
pub const PRIVATE_DNS_API_VERSION: &str = "2020-06-01";
pub const STORAGE_API_VERSION: &str = "2023-01-01";
pub const COMPUTE_API_VERSION: &str = "2023-09-01";

const ASYNC_OPERATION: &str = "azure-asyncoperation";

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(serde::Deserialize, Default)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(serde::Deserialize)]
struct AsyncOperationStatus {
    #[serde(default)]
    status: String,
    error: Option<ErrorDetail>,
}

#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    credential: Arc<dyn TokenCredential>,
    token_scope: String,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ArmClient {
    pub fn new(
        http: reqwest::Client,
        environment: &CloudEnvironment,
        subscription_id: &str,
        credential: Arc<dyn TokenCredential>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            endpoint: environment.resource_manager.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            credential,
            token_scope: environment.token_scope.clone(),
            poll_interval,
            cancel,
        }
    }

    fn scope_url(&self, scope: &str, path: &str, api_version: &str) -> String {
        format!("{}{scope}{path}?api-version={api_version}", self.endpoint)
    }

    fn subscription_url(&self, path: &str, api_version: &str) -> String {
        self.scope_url(
            &format!("/subscriptions/{}", self.subscription_id),
            path,
            api_version,
        )
    }

    fn resource_group_url(&self, resource_group: &str, path: &str, api_version: &str) -> String {
        self.subscription_url(&format!("/resourceGroups/{resource_group}{path}"), api_version)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Response, CloudError> {
        let token = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(CloudError::Cancelled),
            token = self.credential.get_token(&self.token_scope) => token?,
        };
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(&token.token);
        request = match body {
            Some(body) => request.json(&body),
            None if method == Method::POST || method == Method::PUT => {
                request.header(CONTENT_LENGTH, 0)
            }
            None => request,
        };

        trace!(%method, url, "sending request");
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(CloudError::Cancelled),
            response = request.send() => response.context(TransportSnafu { url })?,
        };
        check(method.as_str(), url, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        let response = self.execute(Method::GET, url, None).await?;
        decode(url, response).await
    }

    async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, CloudError> {
        let response = self
            .execute(Method::PUT, url, Some(to_value(url, body)?))
            .await?;
        decode(url, response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        let response = self.execute(Method::POST, url, None).await?;
        decode(url, response).await
    }

    /// PUT a resource and hand back a poller for whichever LRO pattern the provider chose.
    async fn begin_put<B, T>(&self, url: &str, body: &B) -> Result<Poller<T>, CloudError>
    where
        B: Serialize,
        T: DeserializeOwned + Send + 'static,
    {
        let response = self
            .execute(Method::PUT, url, Some(to_value(url, body)?))
            .await?;
        let status = response.status();
        let headers = response.headers().clone();

        let mode = if let Some(operation_url) = header(&headers, ASYNC_OPERATION) {
            Mode::AsyncOperation(operation_url)
        } else if status == StatusCode::ACCEPTED {
            match header(&headers, LOCATION.as_str()) {
                Some(location) => Mode::Location(location),
                None => Mode::ProvisioningState,
            }
        } else {
            let value: Value = decode_or_null(url, response).await?;
            match provisioning_state(&value) {
                Some(state) if !is_terminal_state(&state) => Mode::ProvisioningState,
                Some(state) if !is_success_state(&state) => {
                    return Err(failed_state(state, &value));
                }
                _ => return Ok(Poller::ready(from_value(url, value)?)),
            }
        };

        debug!(url, ?mode, "waiting on long-running operation");
        let operation = ArmOperation {
            client: self.clone(),
            resource_url: url.to_string(),
            mode,
            first_delay: retry_after(&headers),
            _resource: PhantomData,
        };
        Ok(Poller::new(operation, self.poll_interval))
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Mode {
    /// `Azure-AsyncOperation`: poll the status monitor, then GET the resource.
    AsyncOperation(String),
    /// `Location` on a 202: poll until it stops answering 202.
    Location(String),
    /// No monitor: GET the resource until `provisioningState` is terminal.
    ProvisioningState,
}

struct ArmOperation<T> {
    client: ArmClient,
    resource_url: String,
    mode: Mode,
    first_delay: Option<Duration>,
    _resource: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> Operation<T> for ArmOperation<T> {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError> {
        // the initial response's Retry-After applies before the first status check
        if let Some(delay) = self.first_delay.take() {
            return Ok(PollStatus::InProgress {
                retry_after: Some(delay),
            });
        }

        match &self.mode {
            Mode::AsyncOperation(url) => {
                let response = self.client.execute(Method::GET, url, None).await?;
                let delay = retry_after(response.headers());
                let status: AsyncOperationStatus = decode(url, response).await?;
                if !is_terminal_state(&status.status) {
                    return Ok(PollStatus::InProgress { retry_after: delay });
                }
                if !is_success_state(&status.status) {
                    let detail = status.error.unwrap_or_default();
                    return Err(CloudError::OperationFailed {
                        status: status.status,
                        code: detail.code,
                        message: detail.message,
                    });
                }
                let resource = self.client.get_json(&self.resource_url).await?;
                Ok(PollStatus::Succeeded(resource))
            }
            Mode::Location(url) => {
                let response = self.client.execute(Method::GET, url, None).await?;
                if response.status() == StatusCode::ACCEPTED {
                    return Ok(PollStatus::InProgress {
                        retry_after: retry_after(response.headers()),
                    });
                }
                let value: Value = decode_or_null(url, response).await?;
                let resource = if value.is_null() {
                    self.client.get_json(&self.resource_url).await?
                } else {
                    from_value(url, value)?
                };
                Ok(PollStatus::Succeeded(resource))
            }
            Mode::ProvisioningState => {
                let response = self
                    .client
                    .execute(Method::GET, &self.resource_url, None)
                    .await?;
                let delay = retry_after(response.headers());
                let value: Value = decode(&self.resource_url, response).await?;
                match provisioning_state(&value) {
                    Some(state) if !is_terminal_state(&state) => {
                        Ok(PollStatus::InProgress { retry_after: delay })
                    }
                    Some(state) if !is_success_state(&state) => Err(failed_state(state, &value)),
                    _ => Ok(PollStatus::Succeeded(from_value(&self.resource_url, value)?)),
                }
            }
        }
    }
}

async fn check(method: &str, url: &str, response: Response) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| ErrorDetail {
            code: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: body,
        });
    Err(CloudError::Api {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        code: detail.code,
        message: detail.message,
    })
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, CloudError> {
    let bytes = response.bytes().await.context(TransportSnafu { url })?;
    serde_json::from_slice(&bytes).context(DecodeSnafu {
        what: type_label::<T>(),
        url,
    })
}

/// Like [`decode`], but an empty body yields `Value::Null`.
async fn decode_or_null(url: &str, response: Response) -> Result<Value, CloudError> {
    let bytes = response.bytes().await.context(TransportSnafu { url })?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).context(DecodeSnafu {
        what: "response body",
        url,
    })
}

fn from_value<T: DeserializeOwned>(url: &str, value: Value) -> Result<T, CloudError> {
    serde_json::from_value(value).context(DecodeSnafu {
        what: type_label::<T>(),
        url,
    })
}

fn to_value<B: Serialize>(url: &str, body: &B) -> Result<Value, CloudError> {
    serde_json::to_value(body).context(DecodeSnafu {
        what: "request body",
        url,
    })
}

fn type_label<T>() -> String {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name).to_string()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn provisioning_state(value: &Value) -> Option<String> {
    value
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn failed_state(state: String, value: &Value) -> CloudError {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("resource");
    CloudError::OperationFailed {
        message: format!("{name} ended provisioning in state {state}"),
        status: state,
        code: "ProvisioningFailed".to_string(),
    }
}

#[async_trait]
impl ResourceGroupsApi for ArmClient {
    async fn get_resource_group(&self, name: &str) -> Result<ResourceGroup, CloudError> {
        let url = self.subscription_url(&format!("/resourcegroups/{name}"), RESOURCES_API_VERSION);
        self.get_json(&url).await
    }

    async fn create_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<ResourceGroup, CloudError> {
        let url = self.subscription_url(&format!("/resourcegroups/{name}"), RESOURCES_API_VERSION);
        self.put_json(&url, group).await
    }
}

#[async_trait]
impl DnsZonesApi for ArmClient {
    async fn list_zones(&self, next_link: Option<&str>) -> Result<Page<DnsZone>, CloudError> {
        let url = match next_link {
            Some(link) => link.to_string(),
            None => self.subscription_url("/providers/Microsoft.Network/dnszones", DNS_API_VERSION),
        };
        self.get_json(&url).await
    }
}

#[async_trait]
impl IdentityApi for ArmClient {
    async fn create_identity(
        &self,
        resource_group: &str,
        name: &str,
        identity: &Identity,
    ) -> Result<Identity, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{name}"),
            MSI_API_VERSION,
        );
        self.put_json(&url, identity).await
    }
}

#[async_trait]
impl AuthorizationApi for ArmClient {
    async fn list_role_definitions(
        &self,
        scope: &str,
        next_link: Option<&str>,
    ) -> Result<Page<RoleDefinition>, CloudError> {
        let url = match next_link {
            Some(link) => link.to_string(),
            None => self.scope_url(
                scope,
                "/providers/Microsoft.Authorization/roleDefinitions",
                AUTHORIZATION_API_VERSION,
            ),
        };
        self.get_json(&url).await
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, CloudError> {
        let url = self.scope_url(
            scope,
            &format!("/providers/Microsoft.Authorization/roleAssignments/{name}"),
            AUTHORIZATION_API_VERSION,
        );
        self.put_json(&url, assignment).await
    }
}

#[async_trait]
impl NetworkApi for ArmClient {
    async fn get_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/virtualNetworks/{name}"),
            NETWORK_API_VERSION,
        );
        self.get_json(&url).await
    }

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/networkSecurityGroups/{name}"),
            NETWORK_API_VERSION,
        );
        self.get_json(&url).await
    }

    async fn begin_create_security_group(
        &self,
        resource_group: &str,
        name: &str,
        group: &SecurityGroup,
    ) -> Result<Poller<SecurityGroup>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/networkSecurityGroups/{name}"),
            NETWORK_API_VERSION,
        );
        self.begin_put(&url, group).await
    }

    async fn begin_create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<Poller<VirtualNetwork>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/virtualNetworks/{name}"),
            NETWORK_API_VERSION,
        );
        self.begin_put(&url, network).await
    }

    async fn begin_create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<Poller<PublicIpAddress>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/publicIPAddresses/{name}"),
            NETWORK_API_VERSION,
        );
        self.begin_put(&url, address).await
    }

    async fn begin_create_load_balancer(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<Poller<LoadBalancer>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/loadBalancers/{name}"),
            NETWORK_API_VERSION,
        );
        self.begin_put(&url, load_balancer).await
    }
}

#[async_trait]
impl PrivateDnsApi for ArmClient {
    async fn begin_create_private_zone(
        &self,
        resource_group: &str,
        name: &str,
        zone: &PrivateZone,
    ) -> Result<Poller<PrivateZone>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/privateDnsZones/{name}"),
            PRIVATE_DNS_API_VERSION,
        );
        self.begin_put(&url, zone).await
    }

    async fn begin_create_zone_link(
        &self,
        resource_group: &str,
        zone: &str,
        name: &str,
        link: &VirtualNetworkLink,
    ) -> Result<Poller<VirtualNetworkLink>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Network/privateDnsZones/{zone}/virtualNetworkLinks/{name}"),
            PRIVATE_DNS_API_VERSION,
        );
        self.begin_put(&url, link).await
    }
}

#[async_trait]
impl StorageApi for ArmClient {
    async fn begin_create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        account: &StorageAccountCreate,
    ) -> Result<Poller<StorageAccount>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Storage/storageAccounts/{name}"),
            STORAGE_API_VERSION,
        );
        self.begin_put(&url, account).await
    }

    async fn create_blob_container(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<BlobContainer, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!(
                "/providers/Microsoft.Storage/storageAccounts/{account}/blobServices/default/containers/{name}"
            ),
            STORAGE_API_VERSION,
        );
        self.put_json(&url, &serde_json::json!({})).await
    }

    async fn list_keys(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<StorageAccountKeys, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Storage/storageAccounts/{account}/listKeys"),
            STORAGE_API_VERSION,
        );
        self.post_json(&format!("{url}&$expand=kerb")).await
    }
}

#[async_trait]
impl ComputeApi for ArmClient {
    async fn begin_create_image(
        &self,
        resource_group: &str,
        name: &str,
        image: &Image,
    ) -> Result<Poller<Image>, CloudError> {
        let url = self.resource_group_url(
            resource_group,
            &format!("/providers/Microsoft.Compute/images/{name}"),
            COMPUTE_API_VERSION,
        );
        self.begin_put(&url, image).await
    }
}
