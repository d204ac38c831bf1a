//! Request signing for the Qiniu object storage API.
//!
//! Every token is `access_key:base64url(hmac_sha1(secret_key, data))`,
//! optionally followed by `:data` when the signed data travels with it.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use url::Url;
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;

/// Access key pair; the secret is wiped on drop.
pub struct Credentials {
    access_key: String,
    secret_key: Zeroizing<String>,
}

#[derive(Serialize)]
struct PutPolicy<'a> {
    scope: &'a str,
    deadline: i64,
}

impl Credentials {
    /// Create credentials from an access key and secret key.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: Zeroizing::new(secret_key.into()),
        }
    }

    /// `access_key:signature` over `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        format!("{}:{}", self.access_key, URL_SAFE.encode(digest))
    }

    /// `access_key:signature:encoded_data`, signing the encoded form of `data`.
    pub fn sign_with_data(&self, data: &[u8]) -> String {
        let encoded = URL_SAFE.encode(data);
        format!("{}:{}", self.sign(encoded.as_bytes()), encoded)
    }

    /// Upload token allowing `key` in `bucket` to be written (or overwritten)
    /// until `deadline` (unix seconds).
    pub fn upload_token(&self, bucket: &str, key: &str, deadline: i64) -> String {
        let scope = format!("{}:{}", bucket, key);
        let policy = PutPolicy {
            scope: &scope,
            deadline,
        };
        // Serializing a struct of a str and an integer cannot fail.
        let policy = serde_json::to_vec(&policy).unwrap_or_default();
        self.sign_with_data(&policy)
    }

    /// `Authorization` header value for management requests.
    ///
    /// Signs `path[?query]\n`, followed by the body for form-encoded requests.
    pub fn management_token(&self, url: &Url, form_body: Option<&[u8]>) -> String {
        let mut data = url.path().as_bytes().to_vec();
        if let Some(query) = url.query() {
            data.push(b'?');
            data.extend_from_slice(query.as_bytes());
        }
        data.push(b'\n');
        if let Some(body) = form_body {
            data.extend_from_slice(body);
        }
        format!("QBox {}", self.sign(&data))
    }

    /// Signed download URL for a private bucket, valid until `deadline`.
    pub fn private_url(&self, public_url: &str, deadline: i64) -> String {
        let separator = if public_url.contains('?') { '&' } else { '?' };
        let with_deadline = format!("{}{}e={}", public_url, separator, deadline);
        let token = self.sign(with_deadline.as_bytes());
        format!("{}&token={}", with_deadline, token)
    }
}

/// `base64url("bucket:key")`, the object reference used in management paths.
pub fn encoded_entry(bucket: &str, key: &str) -> String {
    URL_SAFE.encode(format!("{}:{}", bucket, key))
}
