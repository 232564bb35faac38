//! Authenticated HTTP client for the Carbon Black Cloud REST API.
//!
//! `CbcClient` wraps a `reqwest::Client` together with the resolved base
//! URL, the org key, and the API credentials. Every request carries the
//! `X-Auth-Token` header and a JSON content type; `X-Org` is added when
//! enabled because a handful of services (watchlists, observations,
//! differential live query) insist on it.
//!
//! Paths passed to the request helpers are relative to the base URL (no
//! leading slash). `org_path` builds the `{service}/orgs/{org_key}/{rest}`
//! shape that nearly every endpoint shares.
//!
//! Failed requests are not retried. A non-2xx status is returned as
//! `CbcError::Api` with the response body preserved.

use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

use crate::auth::{AUTH_HEADER, ApiCredentials, ORG_HEADER};
use crate::environment::Environment;
use crate::error::{CbcError, Result};

/// Covers TCP + TLS handshake only.
const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Full round-trip including body download. Search requests returning
/// 10,000 rows and live response file downloads can both be slow.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn build_api_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(API_REQUEST_TIMEOUT)
        .build()?)
}

/// Authenticated HTTP client bound to one org in one environment.
#[derive(Debug)]
pub struct CbcClient {
    client: Client,
    base_url: String,
    org_key: String,
    credentials: ApiCredentials,
    org_header: bool,
}

impl CbcClient {
    /// Creates a client for the given environment's base URL.
    pub fn new(environment: Environment, org_key: &str, credentials: ApiCredentials) -> Result<Self> {
        Self::with_base_url(environment.base_url(), org_key, credentials)
    }

    /// Creates a client against an arbitrary base URL. Tests use this to
    /// point at a local mock server.
    pub fn with_base_url(base_url: &str, org_key: &str, credentials: ApiCredentials) -> Result<Self> {
        if org_key.trim().is_empty() {
            return Err(CbcError::Config("org key is empty".to_string()));
        }
        Ok(CbcClient {
            client: build_api_client()?,
            base_url: format!("{}/", base_url.trim_end_matches('/')),
            org_key: org_key.trim().to_string(),
            credentials,
            org_header: false,
        })
    }

    /// Enables or disables the `X-Org` header on every request.
    pub fn with_org_header(mut self, enabled: bool) -> Self {
        self.org_header = enabled;
        self
    }

    /// The org key this client is bound to.
    pub fn org_key(&self) -> &str {
        &self.org_key
    }

    /// The base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{service}/orgs/{org_key}/{rest}`.
    ///
    /// ```ignore
    /// client.org_path("appservices/v6", "devices/_search")
    /// // => "appservices/v6/orgs/ABCD1234/devices/_search"
    /// ```
    pub fn org_path(&self, service: &str, rest: &str) -> String {
        org_scoped_path(service, &self.org_key, rest)
    }

    fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method, url)
            .header(AUTH_HEADER, self.credentials.token())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if self.org_header {
            req = req.header(ORG_HEADER, &self.org_key);
        }
        if let Some(payload) = body {
            req = req.json(payload);
        }
        req
    }

    /// Sends a request and returns the successful response, converting any
    /// non-2xx status into `CbcError::Api` with the body text attached.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let req = self.build_request(method.clone(), path, body);
        self.execute(req, &method, path).await
    }

    async fn execute(
        &self,
        req: reqwest::RequestBuilder,
        method: &Method,
        path: &str,
    ) -> Result<reqwest::Response> {
        debug!(%method, path, "sending request");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%status, path, "request failed");
            return Err(CbcError::Api { status, body });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let resp = self.send(method, path, body).await?;
        read_json(resp).await
    }

    /// Authenticated GET, JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<T, ()>(Method::GET, path, None).await
    }

    /// Authenticated GET with `query` URL-encoded onto `path`, JSON
    /// response. `query` is anything reqwest can serialize as a query
    /// string, e.g. `&[("rows", 500)]`.
    pub async fn get_query<Q: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T> {
        let req = self.build_request::<()>(Method::GET, path, None).query(query);
        let resp = self.execute(req, &Method::GET, path).await?;
        read_json(resp).await
    }

    /// Authenticated POST with a JSON body, JSON response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    /// Authenticated PUT with a JSON body, JSON response.
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    /// Authenticated DELETE. Returns the success status (usually 204).
    pub async fn delete(&self, path: &str) -> Result<StatusCode> {
        let resp = self.send::<()>(Method::DELETE, path, None).await?;
        Ok(resp.status())
    }

    /// Authenticated GET returning the raw body, for file content downloads.
    pub async fn get_bytes(&self, path: &str) -> Result<bytes::Bytes> {
        let resp = self.send::<()>(Method::GET, path, None).await?;
        Ok(resp.bytes().await?)
    }
}

// Read as text first so a shape mismatch surfaces as a Parse error rather
// than an opaque reqwest decode error.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Path builder shared by `CbcClient::org_path` and callers that need an
/// org *id* (numeric) rather than the client's org key.
pub fn org_scoped_path(service: &str, org: &str, rest: &str) -> String {
    format!(
        "{}/orgs/{}/{}",
        service.trim_matches('/'),
        org,
        rest.trim_start_matches('/')
    )
}
