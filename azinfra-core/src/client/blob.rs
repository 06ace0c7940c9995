//! Blob storage data plane, signed with the account's Shared Key.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Request, Response};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BlobApi, BlobTarget};
use crate::auth::SharedKeyCredential;
use crate::config::BlobEndpoint;
use crate::error::{CloudError, TransportSnafu};
use crate::lro::{Operation, PollStatus, Poller};
use crate::models::BlobCopy;

#[derive(Debug, Clone)]
pub struct BlobClient {
    http: reqwest::Client,
    endpoint: BlobEndpoint,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl BlobClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: BlobEndpoint,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            endpoint,
            poll_interval,
            cancel,
        }
    }

    async fn send(
        &self,
        credential: &SharedKeyCredential,
        mut request: Request,
    ) -> Result<Response, CloudError> {
        credential.sign(&mut request)?;
        let method = request.method().to_string();
        let url = request.url().to_string();

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(CloudError::Cancelled),
            response = self.http.execute(request) => {
                response.context(TransportSnafu { url: &url })?
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = header(response.headers(), "x-ms-error-code")
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        let message = response.text().await.unwrap_or_default();
        Err(CloudError::Api {
            method,
            url,
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl BlobApi for BlobClient {
    fn blob_url(&self, target: &BlobTarget) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.account_url(&target.account),
            target.container,
            target.blob
        )
    }

    async fn begin_copy_from_url(
        &self,
        credential: &SharedKeyCredential,
        target: &BlobTarget,
        source_url: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Poller<BlobCopy>, CloudError> {
        let url = self.blob_url(target);
        let mut builder = self
            .http
            .put(&url)
            .header("x-ms-copy-source", source_url)
            .header(CONTENT_LENGTH, 0);
        for (key, value) in metadata {
            builder = builder.header(format!("x-ms-meta-{key}"), value);
        }
        let request = builder.build().context(TransportSnafu { url: &url })?;

        let response = self.send(credential, request).await?;
        let copy = read_copy_state(&url, response.headers());
        info!(url = %url, copy_id = ?copy.copy_id, status = %copy.status, "blob copy started");

        if classify(&copy)? {
            return Ok(Poller::ready(copy));
        }
        let operation = CopyOperation {
            client: self.clone(),
            credential: credential.clone(),
            url,
        };
        Ok(Poller::new(operation, self.poll_interval).with_interval(self.poll_interval))
    }
}

/// Polls blob properties until `x-ms-copy-status` leaves `pending`.
struct CopyOperation {
    client: BlobClient,
    credential: SharedKeyCredential,
    url: String,
}

#[async_trait]
impl Operation<BlobCopy> for CopyOperation {
    async fn poll(&mut self) -> Result<PollStatus<BlobCopy>, CloudError> {
        let request = self
            .client
            .http
            .head(&self.url)
            .build()
            .context(TransportSnafu { url: &self.url })?;
        let response = self.client.send(&self.credential, request).await?;
        let copy = read_copy_state(&self.url, response.headers());
        debug!(
            url = %self.url,
            status = %copy.status,
            progress = ?copy.progress,
            "blob copy status"
        );

        if classify(&copy)? {
            Ok(PollStatus::Succeeded(copy))
        } else {
            Ok(PollStatus::InProgress { retry_after: None })
        }
    }
}

/// `Ok(true)` once the copy succeeded, `Ok(false)` while pending.
fn classify(copy: &BlobCopy) -> Result<bool, CloudError> {
    match copy.status.to_ascii_lowercase().as_str() {
        "success" => Ok(true),
        "pending" => Ok(false),
        _ => Err(CloudError::CopyFailed {
            url: copy.url.clone(),
            status: copy.status.clone(),
            description: copy.progress.clone().unwrap_or_default(),
        }),
    }
}

fn read_copy_state(url: &str, headers: &HeaderMap) -> BlobCopy {
    BlobCopy {
        url: url.to_string(),
        copy_id: header(headers, "x-ms-copy-id"),
        // a synchronous copy may omit the status header
        status: header(headers, "x-ms-copy-status").unwrap_or_else(|| "success".to_string()),
        progress: header(headers, "x-ms-copy-status-description")
            .or_else(|| header(headers, "x-ms-copy-progress")),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
