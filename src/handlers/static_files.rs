//! Static files below a document root

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{FileError, HandlerError};
use crate::http::{Handler, Request, Response};

/// File served for directory targets
pub const INDEX_FILE: &str = "index.html";

/// Longest path component a filesystem will hold
const MAX_SEGMENT: usize = 255;

/// Serves files below a root directory
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Serve files below `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Document root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Contents of the file a request target names
    ///
    /// # Errors
    ///
    /// `FileError::NotFound` when nothing is there, `FileError::Forbidden`
    /// for targets leaving the root, `FileError::Io` for read failures
    pub async fn get(&self, target: &str) -> Result<Bytes, FileError> {
        self.load(target).await.map(|(_, contents)| contents)
    }

    async fn load(&self, target: &str) -> Result<(PathBuf, Bytes), FileError> {
        let mut path = self.resolve(target)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(self.lookup_error(&path, e).await),
        };
        if metadata.is_dir() {
            path.push(INDEX_FILE);
        }

        // symlinks may still point outside
        let canonical = tokio::fs::canonicalize(&path).await?;
        let root = tokio::fs::canonicalize(&self.root).await?;
        if !canonical.starts_with(&root) {
            return Err(FileError::Forbidden);
        }

        let contents = tokio::fs::read(&canonical).await?;
        Ok((canonical, Bytes::from(contents)))
    }

    /// Classify a failed lookup. A regular file used as a directory
    /// (`/index.html/x`) names nothing, like a missing file.
    async fn lookup_error(&self, path: &Path, e: std::io::Error) -> FileError {
        if e.kind() == std::io::ErrorKind::NotFound {
            return FileError::NotFound;
        }
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.starts_with(&self.root) || ancestor == self.root.as_path() {
                break;
            }
            if let Ok(metadata) = tokio::fs::metadata(ancestor).await {
                if metadata.is_file() {
                    return FileError::NotFound;
                }
            }
        }
        FileError::Io(e)
    }

    /// Map a request target onto a path below the root
    fn resolve(&self, target: &str) -> Result<PathBuf, FileError> {
        let path = target.split(['?', '#']).next().unwrap_or_default();
        let decoded = urlencoding::decode(path).map_err(|_| FileError::NotFound)?;

        if decoded.contains('\0') {
            return Err(FileError::Forbidden);
        }

        let mut resolved = self.root.clone();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(FileError::Forbidden),
                segment if segment.contains('\\') => return Err(FileError::Forbidden),
                segment if segment.len() > MAX_SEGMENT => return Err(FileError::NotFound),
                segment => resolved.push(segment),
            }
        }

        Ok(resolved)
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, request: &Request) -> Result<Response, HandlerError> {
        let (path, contents) = match self.load(request.target()).await {
            Ok(found) => found,
            Err(FileError::NotFound) => return Ok(Response::not_found()),
            Err(FileError::Forbidden) => {
                debug!("Refusing {}", request.target());
                return Ok(Response::empty(StatusCode::FORBIDDEN));
            }
            Err(FileError::Io(e)) => return Err(HandlerError::Io(e)),
        };

        let etag = etag(&contents);
        if request.headers().get("if-none-match") == Some(etag.as_str()) {
            return Ok(Response::empty(StatusCode::NOT_MODIFIED).with_header("ETag", etag));
        }

        Ok(Response::new(StatusCode::OK, contents)
            .with_header("Content-Type", content_type(&path))
            .with_header("ETag", etag))
    }
}

/// Quoted hex prefix of the body's SHA-256
fn etag(contents: &[u8]) -> String {
    let digest = Sha256::digest(contents);
    format!("\"{}\"", hex::encode(&digest[..8]))
}

/// Guess a content type from the file extension
#[must_use]
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
