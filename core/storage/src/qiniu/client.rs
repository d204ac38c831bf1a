//! Qiniu object storage API client.

use chrono::Utc;
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use vdisk_common::{Error, Result};

use super::auth::{encoded_entry, Credentials};
use crate::filesystem::ByteReader;

/// Default upload endpoint.
pub const DEFAULT_UP_HOST: &str = "https://upload.qiniup.com";
/// Default management endpoint.
pub const DEFAULT_RS_HOST: &str = "https://rs.qiniuapi.com";
/// Default listing endpoint.
pub const DEFAULT_RSF_HOST: &str = "https://rsf.qiniuapi.com";

/// Largest page the listing API returns, and the largest batch it accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Qiniu error code for a missing object.
const CODE_NO_SUCH_ENTRY: u16 = 612;
/// Batch response status when some operations failed.
const CODE_PARTIAL_SUCCESS: u16 = 298;

/// Object metadata from the `stat` API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    /// Size in bytes.
    pub fsize: u64,
    /// Content hash (etag).
    #[serde(default)]
    pub hash: String,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
    /// Upload time in units of 100 nanoseconds since the unix epoch.
    pub put_time: i64,
}

/// One object in a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub key: String,
    pub fsize: u64,
    /// Upload time in units of 100 nanoseconds since the unix epoch.
    pub put_time: i64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub mime_type: String,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    #[serde(default)]
    pub items: Vec<ListItem>,
    /// Key prefixes folded by the delimiter.
    #[serde(default)]
    pub common_prefixes: Vec<String>,
    /// Continuation marker; empty on the last page.
    #[serde(default)]
    pub marker: String,
}

impl ListPage {
    /// Whether another page follows this one.
    pub fn has_more(&self) -> bool {
        !self.marker.is_empty()
    }
}

/// Per-operation result inside a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub code: u16,
    #[serde(default)]
    pub data: Option<BatchData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchData {
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchStatus {
    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn message(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.error.clone())
            .unwrap_or_else(|| format!("status {}", self.code))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Wire-level operations on one bucket.
///
/// Implemented over HTTP by [`QiniuClient`]; everything above this seam
/// (pagination, batching, URL policy) lives in the filesystem backend.
pub trait BucketApi: Send + Sync {
    /// Fetch object metadata.
    fn stat(&self, key: &str) -> Result<ObjectStat>;

    /// Upload an object, overwriting any existing one.
    fn upload(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Download the full body behind a (possibly signed) URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Open a streaming download of a (possibly signed) URL.
    fn open(&self, url: &str) -> Result<ByteReader>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Copy an object, overwriting the destination.
    fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Move an object, overwriting the destination.
    fn move_object(&self, from: &str, to: &str) -> Result<()>;

    /// Fetch one listing page. An empty `marker` requests the first page.
    fn list_page(&self, prefix: &str, delimiter: &str, marker: &str, limit: usize)
        -> Result<ListPage>;

    /// Delete several keys in one request.
    ///
    /// Returns one status per key, in order. A partially failed batch is
    /// `Ok` with failing statuses.
    fn batch_delete(&self, keys: &[String]) -> Result<Vec<BatchStatus>>;
}

/// Endpoints for one region.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub up_host: String,
    pub rs_host: String,
    pub rsf_host: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            up_host: DEFAULT_UP_HOST.to_string(),
            rs_host: DEFAULT_RS_HOST.to_string(),
            rsf_host: DEFAULT_RSF_HOST.to_string(),
        }
    }
}

/// Qiniu API client bound to one bucket.
pub struct QiniuClient {
    http: Client,
    credentials: Arc<Credentials>,
    bucket: String,
    endpoints: Endpoints,
    /// Upload token lifetime in seconds.
    token_ttl: i64,
}

impl QiniuClient {
    /// Create a new client.
    pub fn new(
        credentials: Arc<Credentials>,
        bucket: impl Into<String>,
        endpoints: Endpoints,
        token_ttl: i64,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vdisk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credentials,
            bucket: bucket.into(),
            endpoints,
            token_ttl,
        })
    }

    fn url(&self, host: &str, path: &str) -> Result<Url> {
        let base = host.trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| Error::Configuration(format!("Invalid endpoint {}: {}", host, e)))
    }

    fn entry(&self, key: &str) -> String {
        encoded_entry(&self.bucket, key)
    }

    /// Signed management request.
    fn management(&self, url: Url, form_body: Option<String>) -> RequestBuilder {
        let token = self
            .credentials
            .management_token(&url, form_body.as_deref().map(str::as_bytes));

        let request = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, token)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");

        match form_body {
            Some(body) => request.body(body),
            None => request,
        }
    }

    fn send(request: RequestBuilder, action: &str) -> Result<Response> {
        request
            .send()
            .map_err(|e| Error::Network(format!("Failed to {}: {}", action, e)))
    }

    /// Map a non-success response to an error.
    fn error_for(response: Response) -> Error {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        match status.as_u16() {
            404 | CODE_NO_SUCH_ENTRY => Error::NotFound(message),
            401 | 403 => Error::PermissionDenied(message),
            code => Error::Remote { code, message },
        }
    }

    /// Handle API response with error checking.
    fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        if response.status().is_success() {
            response
                .json()
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::error_for(response))
        }
    }

    fn expect_success(response: Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response))
        }
    }

    fn download(&self, url: &str) -> Result<Response> {
        let response = Self::send(self.http.get(url), "download object")?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_for(response))
        }
    }
}

impl BucketApi for QiniuClient {
    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let url = self.url(&self.endpoints.rs_host, &format!("/stat/{}", self.entry(key)))?;
        let token = self.credentials.management_token(&url, None);

        let response = Self::send(
            self.http.get(url).header(header::AUTHORIZATION, token),
            "stat object",
        )?;
        Self::handle_response(response)
    }

    fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let deadline = Utc::now().timestamp().saturating_add(self.token_ttl);
        let token = self.credentials.upload_token(&self.bucket, key, deadline);

        let part = multipart::Part::bytes(data).file_name(key.to_string());
        let form = multipart::Form::new()
            .text("token", token)
            .text("key", key.to_string())
            .part("file", part);

        let response = Self::send(
            self.http.post(&self.endpoints.up_host).multipart(form),
            "upload object",
        )?;
        Self::expect_success(response)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.download(url)?
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network(format!("Failed to read download response: {}", e)))
    }

    fn open(&self, url: &str) -> Result<ByteReader> {
        Ok(Box::new(self.download(url)?))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let url = self.url(&self.endpoints.rs_host, &format!("/delete/{}", self.entry(key)))?;
        let response = Self::send(self.management(url, None), "delete object")?;
        Self::expect_success(response)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let path = format!("/copy/{}/{}/force/true", self.entry(from), self.entry(to));
        let url = self.url(&self.endpoints.rs_host, &path)?;
        let response = Self::send(self.management(url, None), "copy object")?;
        Self::expect_success(response)
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let path = format!("/move/{}/{}/force/true", self.entry(from), self.entry(to));
        let url = self.url(&self.endpoints.rs_host, &path)?;
        let response = Self::send(self.management(url, None), "move object")?;
        Self::expect_success(response)
    }

    fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        limit: usize,
    ) -> Result<ListPage> {
        let mut url = self.url(&self.endpoints.rsf_host, "/list")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("bucket", &self.bucket);
            query.append_pair("limit", &limit.min(MAX_PAGE_SIZE).to_string());
            if !prefix.is_empty() {
                query.append_pair("prefix", prefix);
            }
            if !delimiter.is_empty() {
                query.append_pair("delimiter", delimiter);
            }
            if !marker.is_empty() {
                query.append_pair("marker", marker);
            }
        }
        let token = self.credentials.management_token(&url, None);

        let response = Self::send(
            self.http.get(url).header(header::AUTHORIZATION, token),
            "list objects",
        )?;
        Self::handle_response(response)
    }

    fn batch_delete(&self, keys: &[String]) -> Result<Vec<BatchStatus>> {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for key in keys {
            form.append_pair("op", &format!("/delete/{}", self.entry(key)));
        }
        let body = form.finish();

        let url = self.url(&self.endpoints.rs_host, "/batch")?;
        let response = Self::send(self.management(url, Some(body)), "batch delete")?;

        // 298 means some operations failed; the body still lists every status.
        if response.status().is_success() || response.status().as_u16() == CODE_PARTIAL_SUCCESS {
            response
                .json()
                .map_err(|e| Error::Network(format!("Failed to parse batch response: {}", e)))
        } else {
            Err(Self::error_for(response))
        }
    }
}
