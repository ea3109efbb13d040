use std::collections::BTreeMap;
use std::sync::RwLock;

use failure::ResultExt;

use crate::{Error, Result};

// All main errors that can happen when talking to the store
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum KvErrKind {
    #[fail(display = "key '{}' does not exist", _0)]
    KeyDoesNotExist(String),

    #[fail(display = "unexpected HTTP status {} from {}", _0, _1)]
    UnexpectedHttpStatus(reqwest::StatusCode, String),

    #[fail(display = "could not access URL '{}'", _0)]
    Url(reqwest::Url),
}

/// Check an error against the one kind queries are allowed to swallow
pub fn is_key_not_found(err: &Error) -> bool {
    match err.downcast_ref::<KvErrKind>() {
        Some(KvErrKind::KeyDoesNotExist(_)) => true,
        _ => false,
    }
}

/// Operations the registry needs from its backing store
///
/// Keys are slash delimited absolute paths, values scalar text. The store is
/// the single source of truth; implementations hold no per-key state beyond
/// what the backend itself stores.
pub trait KvStore: Send + Sync {
    /// Read the value stored at a single key
    fn get(&self, key: &str) -> Result<String>;

    /// Write a scalar value at a key
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key, or a whole subtree when `recursive` is set
    fn delete(&self, key: &str, recursive: bool) -> Result<()>;

    /// Map every key below `prefix` to its value
    fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>>;
}

/// A single entry from the consul KV HTTP API
///
/// Values come back base64 encoded and are absent for folder keys.
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl KvEntry {
    fn decoded(&self) -> Result<String> {
        match &self.value {
            Some(v) => Ok(String::from_utf8(base64::decode(v)?)?),
            None => Ok(String::new()),
        }
    }
}

/// Client for a consul style hierarchical KV store
pub struct Consul {
    /// Our HTTP client. This can be configured to mock out the network.
    client: reqwest::blocking::Client,
    /// Base URL of the KV API, e.g. `http://127.0.0.1:8500/v1/kv`
    endpoint: reqwest::Url,
}

impl Consul {
    pub fn new(endpoint: &str) -> Result<Consul> {
        let endpoint = reqwest::Url::parse(endpoint.trim_end_matches('/'))?;
        Ok(Consul {
            client: reqwest::blocking::Client::new(),
            endpoint,
        })
    }

    fn url(&self, key: &str, query: Option<&str>) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/{}", self.endpoint, key.trim_matches('/')))?;
        url.set_query(query);
        Ok(url)
    }

    // The actual HTTP GET logic, shared by `get` and `recurse`
    fn fetch(&self, key: &str, recurse: bool) -> Result<Vec<KvEntry>> {
        let url = self.url(key, if recurse { Some("recurse") } else { None })?;
        debug!("GET {}", url);

        let res = self.client.get(url.clone())
            .send()
            .context(KvErrKind::Url(url.clone()))?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KvErrKind::KeyDoesNotExist(key.trim_matches('/').to_string()).into());
        }
        if !res.status().is_success() {
            return Err(KvErrKind::UnexpectedHttpStatus(res.status(), url.to_string()).into());
        }

        let body = res.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl KvStore for Consul {
    fn get(&self, key: &str) -> Result<String> {
        let entries = self.fetch(key, false)?;
        match entries.first() {
            Some(entry) => entry.decoded(),
            None => Err(KvErrKind::KeyDoesNotExist(key.trim_matches('/').to_string()).into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let url = self.url(key, None)?;
        debug!("PUT {}", url);

        let res = self.client.put(url.clone())
            .body(value.to_string())
            .send()
            .context(KvErrKind::Url(url.clone()))?;

        if !res.status().is_success() {
            return Err(KvErrKind::UnexpectedHttpStatus(res.status(), url.to_string()).into());
        }
        Ok(())
    }

    fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let url = self.url(key, if recursive { Some("recurse") } else { None })?;
        debug!("DELETE {}", url);

        let res = self.client.delete(url.clone())
            .send()
            .context(KvErrKind::Url(url.clone()))?;

        if !res.status().is_success() {
            return Err(KvErrKind::UnexpectedHttpStatus(res.status(), url.to_string()).into());
        }
        Ok(())
    }

    fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let entries = self.fetch(prefix, true)?;
        let mut subtree = BTreeMap::new();
        for entry in &entries {
            subtree.insert(entry.key.clone(), entry.decoded()?);
        }
        Ok(subtree)
    }
}

/// In-memory store with the same observable behaviour as `Consul`
///
/// The test double for everything above the gateway, and handy for tooling
/// that wants to dry-run an instantiation without a backend.
#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Snapshot of every stored key, for assertions
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Result<String> {
        let key = key.trim_matches('/');
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(key)
            .cloned()
            .ok_or_else(|| KvErrKind::KeyDoesNotExist(key.to_string()).into())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(key.trim_matches('/').to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let key = key.trim_matches('/');
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        if recursive {
            let below = format!("{}/", key);
            data.retain(|k, _| k != key && !k.starts_with(&below));
        } else {
            data.remove(key);
        }
        Ok(())
    }

    fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let prefix = prefix.trim_matches('/');
        let below = format!("{}/", prefix);
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let subtree: BTreeMap<String, String> = data.iter()
            .filter(|(k, _)| k.as_str() == prefix || k.starts_with(&below))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if subtree.is_empty() {
            return Err(KvErrKind::KeyDoesNotExist(prefix.to_string()).into());
        }
        Ok(subtree)
    }
}
