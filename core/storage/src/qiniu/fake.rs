//! In-process bucket used to exercise the backend without a network.

use chrono::Utc;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vdisk_common::{Error, Result};

use super::client::{BatchData, BatchStatus, BucketApi, ListItem, ListPage, ObjectStat};
use crate::filesystem::ByteReader;

#[derive(Default)]
struct State {
    objects: BTreeMap<String, (Vec<u8>, i64)>,
    pages_served: usize,
    fail_page: Option<usize>,
    failing_deletes: HashSet<String>,
    fetched: Vec<String>,
    batch_sizes: Vec<usize>,
    fail_batch: Option<usize>,
    truncate_batches: bool,
}

/// Shared handle to a fake bucket; clones see the same objects.
#[derive(Clone)]
pub(crate) struct FakeBucket {
    domain: String,
    state: Arc<Mutex<State>>,
}

impl FakeBucket {
    pub(crate) fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim_end_matches('/').to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the listing request with this zero-based index.
    pub(crate) fn fail_page(&self, index: usize) {
        let mut state = self.state();
        state.fail_page = Some(state.pages_served + index);
    }

    /// Report a failure for this key in every batch delete.
    pub(crate) fn fail_delete(&self, key: &str) {
        self.state().failing_deletes.insert(key.to_string());
    }

    /// Fail the batch delete request with this zero-based index.
    pub(crate) fn fail_batch(&self, index: usize) {
        let mut state = self.state();
        state.fail_batch = Some(state.batch_sizes.len() + index);
    }

    /// Process and answer only the first key of every batch delete.
    pub(crate) fn truncate_batches(&self) {
        self.state().truncate_batches = true;
    }

    /// URLs passed to `fetch` and `open`, in order.
    pub(crate) fn fetched(&self) -> Vec<String> {
        self.state().fetched.clone()
    }

    /// Number of keys in each batch delete request.
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_sizes.clone()
    }

    fn missing(key: &str) -> Error {
        Error::NotFound(format!("no such file or directory: {}", key))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.fetched.push(url.to_string());

        let path = url
            .strip_prefix(&self.domain)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::InvalidInput(format!("Foreign URL: {}", url)))?;
        let path = path.split('?').next().unwrap_or_default();
        let key = percent_decode_str(path).decode_utf8_lossy().into_owned();

        state
            .objects
            .get(&key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Self::missing(&key))
    }
}

impl BucketApi for FakeBucket {
    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let state = self.state();
        let (data, put_time) = state.objects.get(key).ok_or_else(|| Self::missing(key))?;
        Ok(ObjectStat {
            fsize: data.len() as u64,
            hash: String::new(),
            mime_type: "application/octet-stream".to_string(),
            put_time: *put_time,
        })
    }

    fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let put_time = Utc::now().timestamp() * 10_000_000;
        self.state().objects.insert(key.to_string(), (data, put_time));
        Ok(())
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.download(url)
    }

    fn open(&self, url: &str) -> Result<ByteReader> {
        Ok(Box::new(Cursor::new(self.download(url)?)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.state()
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::missing(key))
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state();
        let object = state.objects.get(from).cloned().ok_or_else(|| Self::missing(from))?;
        state.objects.insert(to.to_string(), object);
        Ok(())
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state();
        let object = state.objects.remove(from).ok_or_else(|| Self::missing(from))?;
        state.objects.insert(to.to_string(), object);
        Ok(())
    }

    fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        limit: usize,
    ) -> Result<ListPage> {
        let mut state = self.state();
        let index = state.pages_served;
        state.pages_served += 1;
        if state.fail_page == Some(index) {
            return Err(Error::Network("connection reset".to_string()));
        }

        let mut common_prefixes = Vec::new();
        let matching: Vec<ListItem> = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| {
                if delimiter.is_empty() {
                    return true;
                }
                match key[prefix.len()..].find(delimiter) {
                    Some(at) => {
                        let folded = key[..prefix.len() + at + delimiter.len()].to_string();
                        if !common_prefixes.contains(&folded) {
                            common_prefixes.push(folded);
                        }
                        false
                    }
                    None => true,
                }
            })
            .map(|(key, (data, put_time))| ListItem {
                key: key.clone(),
                fsize: data.len() as u64,
                put_time: *put_time,
                hash: String::new(),
                mime_type: String::new(),
            })
            .collect();

        let start: usize = if marker.is_empty() {
            0
        } else {
            marker
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Bad marker: {}", marker)))?
        };
        let end = (start + limit).min(matching.len());
        let next = if end < matching.len() {
            end.to_string()
        } else {
            String::new()
        };

        Ok(ListPage {
            items: matching[start.min(end)..end].to_vec(),
            common_prefixes,
            marker: next,
        })
    }

    fn batch_delete(&self, keys: &[String]) -> Result<Vec<BatchStatus>> {
        let mut state = self.state();
        let index = state.batch_sizes.len();
        state.batch_sizes.push(keys.len());
        if state.fail_batch == Some(index) {
            return Err(Error::Remote {
                code: 503,
                message: "service unavailable".to_string(),
            });
        }

        let answered = if state.truncate_batches {
            &keys[..keys.len().min(1)]
        } else {
            keys
        };

        Ok(answered
            .iter()
            .map(|key| {
                if state.failing_deletes.contains(key) {
                    return BatchStatus {
                        code: 599,
                        data: Some(BatchData {
                            error: Some("service unavailable".to_string()),
                        }),
                    };
                }
                match state.objects.remove(key) {
                    Some(_) => BatchStatus {
                        code: 200,
                        data: None,
                    },
                    None => BatchStatus {
                        code: 612,
                        data: Some(BatchData {
                            error: Some("no such file or directory".to_string()),
                        }),
                    },
                }
            })
            .collect())
    }
}
