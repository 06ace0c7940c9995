//! Credentials for the control plane and the storage data plane.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Request, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{
    CloudError, DecodeSnafu, Error, InvalidAccountKeySnafu, InvalidOptionsSnafu, TransportSnafu,
};

type HmacSha256 = Hmac<Sha256>;

/// Storage service version used for every signed data-plane request.
pub const STORAGE_API_VERSION: &str = "2019-12-12";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Service principal credentials, as found in the `--azure-creds` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl AzureCredentials {
    /// Fails on the first empty field, naming it.
    pub fn validate(&self) -> Result<(), Error> {
        let fields = [
            ("subscriptionId", &self.subscription_id),
            ("tenantId", &self.tenant_id),
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return InvalidOptionsSnafu {
                    message: format!("credentials are missing {field}"),
                }
                .fail();
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(EXPIRY_MARGIN).unwrap_or_default();
        self.expires_at - margin > now
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CloudError>;
}

/// A bearer token acquired elsewhere (`az account get-access-token`, workload identity).
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, CloudError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        })
    }
}

/// OAuth2 client credentials grant against Entra ID.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, AccessToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: &str,
        credentials: &AzureCredentials,
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            tenant_id: credentials.tenant_id.clone(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant_id)
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, CloudError> {
        let url = self.token_url();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context(TransportSnafu { url: &url })?;

        let status = response.status();
        let body = response.text().await.context(TransportSnafu { url: &url })?;
        if !status.is_success() {
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| format!("{}: {}", e.error, e.error_description))
                .unwrap_or(body);
            return Err(CloudError::Authentication {
                message: format!("token endpoint returned HTTP {}: {detail}", status.as_u16()),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).context(DecodeSnafu {
            what: "access token",
            url: &url,
        })?;
        // v1 endpoints send expires_in as a string
        let expires_in = match parsed.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(3600),
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(3600),
            _ => 3600,
        };
        Ok(AccessToken {
            token: parsed.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CloudError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope).filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.clone());
        }

        debug!(scope, client_id = %self.client_id, "requesting access token");
        let token = self.request_token(scope).await?;
        cache.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("authority_host", &self.authority_host)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Storage account Shared Key authorizer.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyCredential {
    pub fn new(account: &str, key: &str) -> Result<Self, CloudError> {
        let key = BASE64
            .decode(key.trim())
            .context(InvalidAccountKeySnafu { account })?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Stamps `x-ms-date` / `x-ms-version` if absent and adds the `Authorization` header.
    pub fn sign(&self, request: &mut Request) -> Result<(), CloudError> {
        let headers = request.headers_mut();
        if !headers.contains_key("x-ms-date") {
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            headers.insert("x-ms-date", header_value(&date)?);
        }
        if !headers.contains_key("x-ms-version") {
            headers.insert("x-ms-version", HeaderValue::from_static(STORAGE_API_VERSION));
        }

        let to_sign = string_to_sign(
            &self.account,
            request.method().as_str(),
            request.url(),
            request.headers(),
        );
        let authorization = format!("SharedKey {}:{}", self.account, self.signature(&to_sign)?);
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }

    fn signature(&self, to_sign: &str) -> Result<String, CloudError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| {
            CloudError::Authentication {
                message: format!("unusable storage key for {}: {e}", self.account),
            }
        })?;
        mac.update(to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, CloudError> {
    HeaderValue::from_str(value).map_err(|e| CloudError::Authentication {
        message: format!("cannot encode header value: {e}"),
    })
}

/// Shared Key string-to-sign for service versions 2015-02-21 and later.
pub fn string_to_sign(account: &str, method: &str, url: &Url, headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let content_length = match header("content-length").as_str() {
        "0" => String::new(),
        other => other.to_string(),
    };

    let mut out = [
        method.to_ascii_uppercase(),
        header("content-encoding"),
        header("content-language"),
        content_length,
        header("content-md5"),
        header("content-type"),
        // covered by x-ms-date
        String::new(),
        header("if-modified-since"),
        header("if-match"),
        header("if-none-match"),
        header("if-unmodified-since"),
        header("range"),
    ]
    .join("\n");
    out.push('\n');
    out.push_str(&canonicalized_headers(headers));
    out.push_str(&canonicalized_resource(account, url));
    out
}

fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ms: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().trim().to_string(),
            )
        })
        .collect();
    ms.sort();
    ms.into_iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect()
}

fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut out = format!("/{account}{}", url.path());

    let mut params: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push_str(&format!("\n{name}:{}", values.join(",")));
    }
    out
}
