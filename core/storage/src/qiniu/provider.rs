//! Qiniu object storage backend.
//!
//! Objects are addressed by key; directories exist only as key prefixes.

use chrono::{DateTime, TimeZone, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use vdisk_common::{path, BatchFailure, Error, Result};

use super::auth::Credentials;
use super::client::{BucketApi, Endpoints, ListItem, QiniuClient, MAX_PAGE_SIZE};
use crate::config::DiskConfig;
use crate::filesystem::{ByteReader, FileEntry, Filesystem, Visibility};

/// Characters left as-is in download URLs: unreserved plus `/`.
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Longest accepted `ttl`: ten years.
const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// `putTime` ticks per second (100ns units).
const TICKS_PER_SECOND: i64 = 10_000_000;

fn default_ttl() -> u64 {
    3600
}

fn default_list_limit() -> usize {
    MAX_PAGE_SIZE
}

/// Settings for a Qiniu disk.
#[derive(Clone, Deserialize)]
pub struct QiniuConfig {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Download domain, including the scheme.
    pub domain: String,
    /// Lifetime of signed URLs and upload tokens, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Serve downloads through signed URLs only.
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub up_host: Option<String>,
    #[serde(default)]
    pub rs_host: Option<String>,
    #[serde(default)]
    pub rsf_host: Option<String>,
    /// Listing page size.
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl QiniuConfig {
    fn validate(&self, disk: &str) -> Result<()> {
        let required = [
            ("bucket", &self.bucket),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("domain", &self.domain),
        ];
        for (key, value) in required {
            if value.is_empty() {
                return Err(Error::Configuration(format!(
                    "Disk '{}' requires '{}'",
                    disk, key
                )));
            }
        }

        Url::parse(&self.domain).map_err(|e| {
            Error::Configuration(format!(
                "Disk '{}' has invalid domain '{}': {}",
                disk, self.domain, e
            ))
        })?;

        if self.ttl > MAX_TTL_SECONDS {
            return Err(Error::Configuration(format!(
                "Disk '{}' has 'ttl' {} above the maximum of {} seconds",
                disk, self.ttl, MAX_TTL_SECONDS
            )));
        }

        if self.list_limit == 0 {
            return Err(Error::Configuration(format!(
                "Disk '{}' requires a positive 'list_limit'",
                disk
            )));
        }
        Ok(())
    }

    /// `ttl` as a signed offset; bounded by `validate`.
    fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.ttl.min(MAX_TTL_SECONDS)).unwrap_or(i64::MAX)
    }

    fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints {
            up_host: self.up_host.clone().unwrap_or(defaults.up_host),
            rs_host: self.rs_host.clone().unwrap_or(defaults.rs_host),
            rsf_host: self.rsf_host.clone().unwrap_or(defaults.rsf_host),
        }
    }
}

/// Filesystem backed by a Qiniu bucket.
pub struct QiniuFilesystem {
    name: String,
    bucket: String,
    domain: String,
    private: bool,
    ttl: i64,
    list_limit: usize,
    credentials: Arc<Credentials>,
    api: Box<dyn BucketApi>,
}

impl QiniuFilesystem {
    /// Create a backend talking to Qiniu over HTTP.
    pub fn new(name: impl Into<String>, config: QiniuConfig) -> Result<Self> {
        let name = name.into();
        config.validate(&name)?;

        let credentials = Arc::new(Credentials::new(&config.access_key, &config.secret_key));
        let client = QiniuClient::new(
            credentials.clone(),
            &config.bucket,
            config.endpoints(),
            config.ttl_seconds(),
        )?;

        Ok(Self::build(name, config, credentials, Box::new(client)))
    }

    /// Create a backend over an explicit wire implementation.
    pub fn with_api(
        name: impl Into<String>,
        config: QiniuConfig,
        api: Box<dyn BucketApi>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate(&name)?;

        let credentials = Arc::new(Credentials::new(&config.access_key, &config.secret_key));
        Ok(Self::build(name, config, credentials, api))
    }

    fn build(
        name: String,
        config: QiniuConfig,
        credentials: Arc<Credentials>,
        api: Box<dyn BucketApi>,
    ) -> Self {
        Self {
            name,
            bucket: config.bucket.clone(),
            domain: config.domain.trim_end_matches('/').to_string(),
            private: config.private,
            ttl: config.ttl_seconds(),
            list_limit: config.list_limit.min(MAX_PAGE_SIZE),
            credentials,
            api,
        }
    }

    fn key(path: &str) -> Result<&str> {
        let key = path::relative(path);
        if key.is_empty() {
            return Err(Error::InvalidInput("Object key cannot be empty".to_string()));
        }
        Ok(key)
    }

    /// Download URL for a key, signed when the disk is private.
    pub fn url(&self, path: &str) -> Result<String> {
        let key = Self::key(path)?;
        let public = format!("{}/{}", self.domain, utf8_percent_encode(key, KEY_ESCAPE));

        if self.private {
            let deadline = Utc::now().timestamp().saturating_add(self.ttl);
            Ok(self.credentials.private_url(&public, deadline))
        } else {
            Ok(public)
        }
    }

    /// Existing content, with a missing object read as empty.
    fn read_or_empty(&self, path: &str) -> Result<Vec<u8>> {
        match self.read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a listing.
    ///
    /// Returns what was collected along with the error of a failed page, if
    /// any; the loop stops at the first failure.
    fn list_pages(&self, prefix: &str, delimiter: &str) -> (Vec<ListItem>, Option<Error>) {
        let mut items = Vec::new();
        let mut marker = String::new();

        loop {
            match self
                .api
                .list_page(prefix, delimiter, &marker, self.list_limit)
            {
                Ok(page) => {
                    let more = page.has_more();
                    items.extend(page.items);
                    if !more {
                        return (items, None);
                    }
                    marker = page.marker;
                }
                Err(e) => return (items, Some(e)),
            }
        }
    }

    /// Best-effort listing: a failed page ends the listing early.
    fn list(&self, directory: &str, delimiter: &str) -> Vec<FileEntry> {
        let prefix = path::prefix(path::directory(directory));
        let (items, error) = self.list_pages(&prefix, delimiter);

        if let Some(e) = error {
            warn!(
                "Listing of '{}' on disk '{}' stopped after {} entries: {}",
                prefix,
                self.name,
                items.len(),
                e
            );
        }

        items.into_iter().map(|item| self.entry(item)).collect()
    }

    fn record_failure(&self, failed: &mut Vec<BatchFailure>, key: &str, code: u16, message: String) {
        debug!(
            "Batch delete of '{}' on disk '{}' failed: {}",
            key, self.name, message
        );
        failed.push(BatchFailure {
            key: key.to_string(),
            code,
            message,
        });
    }

    fn entry(&self, item: ListItem) -> FileEntry {
        FileEntry {
            name: item.key.clone(),
            path: item.key,
            size: item.fsize,
            modified: put_time(item.put_time).unwrap_or_default(),
            is_directory: false,
            disk: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for QiniuFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiniuFilesystem")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("domain", &self.domain)
            .field("private", &self.private)
            .finish_non_exhaustive()
    }
}

impl Filesystem for QiniuFilesystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match self.api.stat(Self::key(path)?) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.api.fetch(&self.url(path)?)
    }

    fn read_stream(&self, path: &str) -> Result<ByteReader> {
        self.api.open(&self.url(path)?)
    }

    fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.api.upload(Self::key(path)?, contents.to_vec())
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read) -> Result<()> {
        let key = Self::key(path)?;
        let mut data = Vec::new();
        contents.read_to_end(&mut data)?;
        self.api.upload(key, data)
    }

    fn get_visibility(&self, _path: &str) -> Visibility {
        if self.private {
            Visibility::Invisible
        } else {
            Visibility::Visible
        }
    }

    /// Visibility is a property of the bucket; per-object changes are ignored.
    fn set_visibility(&self, _path: &str, _visibility: Visibility) -> Result<()> {
        Ok(())
    }

    fn prepend(&self, path: &str, contents: &[u8]) -> Result<()> {
        let existing = self.read_or_empty(path)?;
        let mut data = Vec::with_capacity(contents.len() + existing.len());
        data.extend_from_slice(contents);
        data.extend_from_slice(&existing);
        self.api.upload(Self::key(path)?, data)
    }

    fn append(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut data = self.read_or_empty(path)?;
        data.extend_from_slice(contents);
        self.api.upload(Self::key(path)?, data)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.api.delete(Self::key(path)?)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.api.copy(Self::key(from)?, Self::key(to)?)
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.api.move_object(Self::key(from)?, Self::key(to)?)
    }

    fn size(&self, path: &str) -> Result<u64> {
        Ok(self.api.stat(Self::key(path)?)?.fsize)
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        put_time(self.api.stat(Self::key(path)?)?.put_time)
    }

    fn files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        Ok(self.list(directory, "/"))
    }

    fn all_files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        Ok(self.list(directory, ""))
    }

    fn directories(&self, _directory: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn all_directories(&self, _directory: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn make_directory(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Delete every object under the prefix.
    ///
    /// Keys are removed in batches; keys that could not be removed are
    /// reported together in [`Error::BatchDelete`]. A failed request or a
    /// missing per-key status marks the affected keys as failed, and later
    /// batches are still attempted.
    fn delete_directory(&self, directory: &str) -> Result<()> {
        let dir = path::directory(directory);
        if dir.is_empty() {
            return Err(Error::InvalidInput(
                "Refusing to delete the bucket root".to_string(),
            ));
        }

        let (items, error) = self.list_pages(&path::prefix(dir), "");
        if let Some(e) = error {
            return Err(e);
        }

        let keys: Vec<String> = items.into_iter().map(|item| item.key).collect();
        let mut failed = Vec::new();

        for chunk in keys.chunks(MAX_PAGE_SIZE) {
            let statuses = match self.api.batch_delete(chunk) {
                Ok(statuses) => statuses,
                Err(e) => {
                    let code = match &e {
                        Error::Remote { code, .. } => *code,
                        _ => 0,
                    };
                    for key in chunk {
                        self.record_failure(&mut failed, key, code, e.to_string());
                    }
                    continue;
                }
            };

            for (index, key) in chunk.iter().enumerate() {
                match statuses.get(index) {
                    Some(status) if status.is_success() => {}
                    Some(status) => {
                        self.record_failure(&mut failed, key, status.code, status.message())
                    }
                    None => self.record_failure(
                        &mut failed,
                        key,
                        0,
                        "no status returned for key".to_string(),
                    ),
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::BatchDelete {
                total: keys.len(),
                failed,
            })
        }
    }
}

/// Convert a `putTime` value (100ns since the unix epoch).
fn put_time(ticks: i64) -> Result<DateTime<Utc>> {
    let seconds = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(seconds, nanos)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("Invalid putTime {}", ticks)))
}

/// Driver constructor for `qiniu` disks.
pub fn create_qiniu_filesystem(name: &str, config: &DiskConfig) -> Result<Arc<dyn Filesystem>> {
    let settings: QiniuConfig = config.parse(name)?;
    Ok(Arc::new(QiniuFilesystem::new(name, settings)?))
}
