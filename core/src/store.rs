use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::job::{Job, JobId};

/// Filesystem-backed key/value store used as the default KV engine.
#[derive(Clone)]
pub struct FsKv {
    root: PathBuf,
}

/// In-process key/value store. Contents die with the process.
#[derive(Clone, Default)]
pub struct MemKv {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

/// Minimal key/value interface over byte keys and values.
pub trait Kv: Clone + Send + Sync + 'static {
    /// Get value bytes for `key`, if present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Set value bytes for `key`. Returns once the write is durable.
    fn put(&self, key: &[u8], val: &[u8]) -> Result<()>;
    /// Delete `key`; returns `true` if a value existed.
    fn delete(&self, key: &[u8]) -> Result<bool>;
}

/// Serde helpers layered on top of any [`Kv`] implementation.
pub trait KvSerde: Kv {
    /// Deserialize type `T` stored at `key` using `bincode`.
    fn get_t<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => {
                let v = bincode::deserialize::<T>(&bytes).with_context(|| "bincode deserialize")?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }
    /// Serialize `val` with `bincode` and store at `key`.
    fn put_t<T: Serialize>(&self, key: &[u8], val: &T) -> Result<()> {
        let buf = bincode::serialize(val).with_context(|| "bincode serialize")?;
        self.put(key, &buf)
    }
    /// JSON variant of [`get_t`](Self::get_t), for types with tagged enums
    /// or free-form values that bincode cannot describe.
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).with_context(|| "json deserialize")?)),
            None => Ok(None),
        }
    }
    fn put_json<T: Serialize>(&self, key: &[u8], val: &T) -> Result<()> {
        let buf = serde_json::to_vec(val).with_context(|| "json serialize")?;
        self.put(key, &buf)
    }
}
impl<T: Kv> KvSerde for T {}

/// Default KV type exported by this crate (FS-backed).
pub type DefaultKv = FsKv;

/// Open an FS-backed KV rooted at `dir` (created if missing).
pub fn open_default<P: AsRef<Path>>(dir: P) -> Result<DefaultKv> {
    let root = dir.as_ref().to_path_buf();
    fs::create_dir_all(&root).with_context(|| format!("create kv dir {}", root.display()))?;
    Ok(FsKv { root })
}

/// Build a namespaced key as bytes: `"{ns}:{key}"`.
pub fn ns(ns: &str, key: &str) -> Vec<u8> {
    let mut s = String::with_capacity(ns.len() + 1 + key.len());
    s.push_str(ns);
    s.push(':');
    s.push_str(key);
    s.into_bytes()
}

/* --------------------- impl FsKv --------------------- */

impl FsKv {
    fn path_for(&self, key: &[u8]) -> PathBuf {
        // Windows-safe: map arbitrary bytes to a hex file name.
        let mut name = String::with_capacity(key.len() * 2);
        for &b in key {
            name.push(hex_digit(b >> 4));
            name.push(hex_digit(b & 0xF));
        }
        self.root.join(name)
    }
}

fn hex_digit(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '?',
    }
}

impl Kv for FsKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    fn put(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        // Write temp, fsync, then rename over the old value.
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(val).with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all().with_context(|| format!("sync {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/* --------------------- impl MemKv --------------------- */

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn put(&self, key: &[u8], val: &[u8]) -> Result<()> {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_vec(), val.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.lock().unwrap_or_else(|e| e.into_inner()).remove(key).is_some())
    }
}

/* --------------------- job store --------------------- */

/// Durable job persistence used by the scheduler.
pub trait JobStore: Send + Sync + 'static {
    /// Persist `job`. Returns once the write is durable.
    fn save(&self, job: &Job) -> Result<()>;
    fn load(&self, id: &str) -> Result<Option<Job>>;
    /// Non-terminal jobs whose next due time is at or before `before`, earliest first.
    fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<Job>>;
    /// Remove a job; returns `true` if it existed.
    fn delete(&self, id: &str) -> Result<bool>;
    /// Every stored job, in registry order.
    fn list(&self) -> Result<Vec<Job>>;
}

/// [`JobStore`] over any [`Kv`]: one JSON document per job plus an id registry.
#[derive(Clone)]
pub struct KvJobStore<K: Kv> {
    kv: K,
    registry_lock: Arc<Mutex<()>>,
}

fn registry_key() -> Vec<u8> {
    ns("jobs", "registry")
}

fn job_key(id: &str) -> Vec<u8> {
    ns("jobs", &format!("{id}:job"))
}

impl<K: Kv> KvJobStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv, registry_lock: Arc::new(Mutex::new(())) }
    }

    fn ids(&self) -> Result<Vec<JobId>> {
        Ok(self.kv.get_t::<Vec<JobId>>(&registry_key())?.unwrap_or_default())
    }
}

impl KvJobStore<MemKv> {
    pub fn in_memory() -> Self {
        Self::new(MemKv::new())
    }
}

impl<K: Kv> JobStore for KvJobStore<K> {
    fn save(&self, job: &Job) -> Result<()> {
        self.kv
            .put_json(&job_key(job.id()), job)
            .with_context(|| format!("save job {}", job.id()))?;

        let _guard = self.registry_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = self.ids()?;
        if !ids.iter().any(|i| i == job.id()) {
            ids.push(job.id().to_string());
            self.kv.put_t(&registry_key(), &ids)?;
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Job>> {
        let job: Option<Job> = self.kv.get_json(&job_key(id)).with_context(|| format!("load job {id}"))?;
        if let Some(job) = &job {
            job.trigger().validate().with_context(|| format!("job {id} has an invalid trigger"))?;
            job.recipient().validate().with_context(|| format!("job {id} has an invalid recipient"))?;
        }
        Ok(job)
    }

    fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .list()?
            .into_iter()
            .filter(|j| !j.state().is_terminal() && j.next_due().is_some_and(|d| d <= before))
            .collect();
        due.sort_by_key(|j| j.next_due());
        Ok(due)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.registry_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = self.ids()?;
        let before = ids.len();
        ids.retain(|i| i != id);
        if ids.len() != before {
            self.kv.put_t(&registry_key(), &ids)?;
        }
        let existed = self.kv.delete(&job_key(id))?;
        Ok(existed || ids.len() != before)
    }

    /// Unreadable documents are logged and skipped.
    fn list(&self) -> Result<Vec<Job>> {
        let mut out = Vec::new();
        for id in self.ids()? {
            match self.load(&id) {
                Ok(Some(job)) => out.push(job),
                Ok(None) => warn!(job_id = %id, "registry entry without job document"),
                Err(e) => warn!(job_id = %id, "skipping unreadable job: {e:#}"),
            }
        }
        Ok(out)
    }
}
