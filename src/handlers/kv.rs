//! Key-value store and its HTTP handler
//!
//! `POST` bodies are `key=value&key=value` forms; every pair is stored and
//! the response reports how many. Values are read back with
//! `GET <prefix>/<key>` or `GET <prefix>?key=<key>`.
//!
//! `FileStore` persists to an append-only log, one record per line:
//!
//! ```text
//! <crc32 hex>\t<percent-encoded key>\t<percent-encoded value>\n
//! ```
//!
//! The checksum covers everything after the first tab. The log is replayed
//! on open, later records overriding earlier ones.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use crc32fast::Hasher;
use dashmap::DashMap;
use http::StatusCode;
use tracing::{debug, info, warn};

use crate::error::{HandlerError, StoreError};
use crate::http::{Handler, Method, Request, Response};
use crate::{PylonError, Result};

/// Storage behind the key-value handler
pub trait Store: Send + Sync {
    /// Look up a key
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Insert or replace a key
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidKey` for an empty key and
    /// `StoreError::Io` if the write cannot be persisted
    fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;

    /// Number of keys
    fn len(&self) -> usize;

    /// Whether the store holds no keys
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get lookup hit count
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get lookup miss count
    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        if let Some(value) = self.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(value.clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Store persisted to an append-only log
pub struct FileStore {
    entries: MemoryStore,
    log: Mutex<File>,
    path: PathBuf,
}

impl FileStore {
    /// Open or create a log and replay it
    ///
    /// # Errors
    ///
    /// Returns `PylonError::CorruptedData` if a complete record fails its
    /// checksum, and `PylonError::Io` if the file cannot be read or opened.
    /// A torn final record left by a crash is dropped with a warning.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = MemoryStore::new();

        let valid_len = if path.exists() {
            replay(path, &entries)?
        } else {
            0
        };

        let log = OpenOptions::new().create(true).append(true).open(path)?;
        if log.metadata()?.len() > valid_len {
            log.set_len(valid_len)?;
        }

        info!("Opened store {} ({} keys)", path.display(), entries.len());

        Ok(Self {
            entries,
            log: Mutex::new(log),
            path: path.to_path_buf(),
        })
    }

    /// Path of the log
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        self.entries.get(key)
    }

    /// Append the record and flush it before the map sees the new value.
    /// Blocks the calling thread for the duration of the write.
    fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        // log order and map order must agree, so both happen under the lock
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.write_all(encode_record(key, value).as_bytes())?;
        log.flush()?;
        self.entries.put(key, value)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

enum RecordError {
    Malformed,
    Checksum { expected: u32, actual: u32 },
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn encode_record(key: &str, value: &str) -> String {
    let payload = format!(
        "{}\t{}",
        urlencoding::encode(key),
        urlencoding::encode(value)
    );
    format!("{:08x}\t{payload}\n", checksum(payload.as_bytes()))
}

fn decode_record(line: &[u8]) -> std::result::Result<(String, String), RecordError> {
    let line = std::str::from_utf8(line).map_err(|_| RecordError::Malformed)?;
    let (crc, payload) = line.split_once('\t').ok_or(RecordError::Malformed)?;
    let expected = u32::from_str_radix(crc, 16).map_err(|_| RecordError::Malformed)?;

    let actual = checksum(payload.as_bytes());
    if actual != expected {
        return Err(RecordError::Checksum { expected, actual });
    }

    let (key, value) = payload.split_once('\t').ok_or(RecordError::Malformed)?;
    let key = urlencoding::decode(key).map_err(|_| RecordError::Malformed)?;
    let value = urlencoding::decode(value).map_err(|_| RecordError::Malformed)?;

    Ok((key.into_owned(), value.into_owned()))
}

/// Load every record into `entries`, returning the length of the valid prefix
fn replay(path: &Path, entries: &MemoryStore) -> Result<u64> {
    let data = std::fs::read(path)?;
    let mut offset = 0;
    let mut line_no = 0u64;

    while offset < data.len() {
        line_no += 1;
        let Some(len) = data[offset..].iter().position(|&b| b == b'\n') else {
            warn!(
                "Dropping torn record at line {} of {}",
                line_no,
                path.display()
            );
            break;
        };

        match decode_record(&data[offset..offset + len]) {
            Ok((key, value)) => {
                entries.entries.insert(key, value);
            }
            Err(RecordError::Checksum { expected, actual }) => {
                return Err(PylonError::CorruptedData {
                    offset: line_no,
                    expected,
                    actual,
                });
            }
            Err(RecordError::Malformed) => {
                return Err(PylonError::Other(format!(
                    "Malformed record at line {} of {}",
                    line_no,
                    path.display()
                )));
            }
        }

        offset += len + 1;
    }

    debug!("Replayed {} records from {}", line_no, path.display());
    Ok(offset as u64)
}

/// Why a form body was refused
#[derive(Debug, PartialEq, Eq)]
pub enum FormError {
    /// A pair has no `=`
    MissingSeparator(String),
    /// A pair has an empty key
    EmptyKey,
    /// Body or an escape is not UTF-8
    InvalidEncoding,
}

/// Decode an `application/x-www-form-urlencoded` body
///
/// # Errors
///
/// Returns `FormError` if any pair is malformed
pub fn parse_form(body: &[u8]) -> std::result::Result<Vec<(String, String)>, FormError> {
    let body = std::str::from_utf8(body).map_err(|_| FormError::InvalidEncoding)?;
    let body = body.trim_end_matches(['\r', '\n']);

    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| FormError::MissingSeparator(pair.to_string()))?;
            let key = decode_component(key)?;
            if key.is_empty() {
                return Err(FormError::EmptyKey);
            }
            Ok((key, decode_component(value)?))
        })
        .collect()
}

fn decode_component(raw: &str) -> std::result::Result<String, FormError> {
    let raw: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };

    urlencoding::decode(&raw)
        .map(Cow::into_owned)
        .map_err(|_| FormError::InvalidEncoding)
}

/// Handler exposing a [`Store`] under a path prefix
pub struct KvHandler {
    store: Arc<dyn Store>,
    prefix: String,
}

impl KvHandler {
    /// Serve `store` below `prefix`
    #[must_use]
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self { store, prefix }
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn requested_key(&self, request: &Request) -> Option<String> {
        let rest = request.path().strip_prefix(self.prefix.as_str())?;
        if let Some(key) = rest.strip_prefix('/').filter(|key| !key.is_empty()) {
            return urlencoding::decode(key).ok().map(Cow::into_owned);
        }

        let query = request.query()?;
        parse_form(query.as_bytes())
            .ok()?
            .into_iter()
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value)
    }

    /// Store every pair of a form body. Pairs are committed one at a time
    /// in body order, so a failure partway leaves the earlier pairs stored.
    async fn put_all(&self, request: &Request) -> std::result::Result<Response, HandlerError> {
        let body = request.body().map_or(&[][..], |b| &b[..]);
        let pairs = match parse_form(body) {
            Ok(pairs) => pairs,
            Err(e) => {
                debug!("Rejecting form body: {:?}", e);
                return Ok(Response::bad_request());
            }
        };

        let count = pairs.len();
        // file-backed puts block on write and flush
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            pairs
                .iter()
                .try_for_each(|(key, value)| store.put(key, value))
        })
        .await
        .map_err(|e| HandlerError::Other(format!("store task failed: {e}")))??;

        Ok(Response::text(StatusCode::OK, format!("stored {count}")))
    }

    fn lookup(&self, request: &Request) -> std::result::Result<Response, HandlerError> {
        let Some(key) = self.requested_key(request) else {
            return Ok(Response::bad_request());
        };

        match self.store.get(&key)? {
            Some(value) => Ok(Response::text(StatusCode::OK, value)),
            None => Ok(Response::not_found()),
        }
    }
}

#[async_trait]
impl Handler for KvHandler {
    async fn handle(&self, request: &Request) -> std::result::Result<Response, HandlerError> {
        match request.method() {
            Method::Post => self.put_all(request).await,
            Method::Get | Method::Head => self.lookup(request),
            Method::Unsupported(_) => Ok(Response::bad_request()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HTTP_11;
    use tempfile::TempDir;

    fn handler() -> (Arc<MemoryStore>, KvHandler) {
        let store = Arc::new(MemoryStore::new());
        let handler = KvHandler::new(store.clone(), "/kv");
        (store, handler)
    }

    fn post(body: &'static str) -> Request {
        Request::new(Method::Post, "/kv", HTTP_11).with_body(body)
    }

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target, HTTP_11)
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();

        assert!(store.is_empty());
        store.put("a", "1").unwrap();
        store.put("a", "2").unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.hits(), 1);
        assert_eq!(store.misses(), 1);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.put("", "x"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_parse_form() {
        let pairs = parse_form(b"key1=value1&name=a+b%21&empty=").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("key1".to_string(), "value1".to_string()),
                ("name".to_string(), "a b!".to_string()),
                ("empty".to_string(), String::new()),
            ]
        );

        assert_eq!(parse_form(b"").unwrap(), vec![]);
        assert_eq!(
            parse_form(b"a=1&oops"),
            Err(FormError::MissingSeparator("oops".to_string()))
        );
        assert_eq!(parse_form(b"=1"), Err(FormError::EmptyKey));
        assert_eq!(parse_form(&[0xff, b'=', b'1']), Err(FormError::InvalidEncoding));
    }

    #[tokio::test]
    async fn test_post_then_get() {
        let (store, handler) = handler();

        let response = handler.handle(&post("key1=value1&key2=value2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"stored 2");
        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value1"));

        let response = handler.handle(&get("/kv/key2")).await.unwrap();
        assert_eq!(response.body().as_ref(), b"value2");

        let response = handler.handle(&get("/kv?key=key1")).await.unwrap();
        assert_eq!(response.body().as_ref(), b"value1");
    }

    /// Memory store whose disk is full for one key
    struct FullDisk {
        inner: MemoryStore,
        refused: &'static str,
    }

    impl Store for FullDisk {
        fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
            if key == self.refused {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            self.inner.put(key, value)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[tokio::test]
    async fn test_failed_put_keeps_earlier_pairs() {
        let store = Arc::new(FullDisk {
            inner: MemoryStore::new(),
            refused: "second",
        });
        let handler = KvHandler::new(store.clone(), "/kv");

        let result = handler.handle(&post("first=1&second=2&third=3")).await;

        assert!(matches!(result, Err(HandlerError::Store(StoreError::Io(_)))));
        assert_eq!(store.get("first").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("third").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_and_bad_requests() {
        let (_store, handler) = handler();

        let response = handler.handle(&get("/kv/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handler.handle(&get("/kv")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handler.handle(&post("novalue")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("key1", "value1").unwrap();
            store.put("tab\tkey", "line\nvalue").unwrap();
            store.put("key1", "value2").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value2"));
        assert_eq!(
            store.get("tab\tkey").unwrap().as_deref(),
            Some("line\nvalue")
        );
    }

    #[test]
    fn test_file_store_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.log");

        let mut data = encode_record("a", "1");
        data.push_str("deadbeef\tb\t2"); // no newline
        std::fs::write(&path, &data).unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len(), 1);
            store.put("c", "3").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_file_store_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.log");

        let mut data = encode_record("a", "1");
        data.push_str(&encode_record("b", "2").replacen("\t2", "\t3", 1));
        std::fs::write(&path, data).unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(
            result,
            Err(PylonError::CorruptedData { offset: 2, .. })
        ));
    }
}
