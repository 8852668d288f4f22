//! Handlers served by the binary and the route table built from config

mod echo;
mod kv;
mod static_files;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

pub use echo::Echo;
pub use kv::{parse_form, FileStore, FormError, KvHandler, MemoryStore, Store};
pub use static_files::{content_type, StaticFiles, INDEX_FILE};

use crate::config::{Config, HandlerConfig};
use crate::http::{Handler, Method, PathMatcher, Router};
use crate::Result;

/// Open a store, file-backed when a log path is given
///
/// # Errors
///
/// Returns an error if the log cannot be opened or replayed
pub fn open_store(data_file: Option<&Path>) -> Result<Arc<dyn Store>> {
    Ok(match data_file {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    })
}

/// Default table: KV under `/kv`, echo at `/echo`, files below `root` for
/// everything else
///
/// # Errors
///
/// Returns an error if the store cannot be opened
pub fn default_router(root: &Path, data_file: Option<&Path>) -> Result<Router> {
    let kv: Arc<dyn Handler> = Arc::new(KvHandler::new(open_store(data_file)?, "/kv"));
    let files: Arc<dyn Handler> = Arc::new(StaticFiles::new(root));

    Ok(Router::new()
        .route_shared(Method::Get, PathMatcher::Prefix("/kv".into()), Arc::clone(&kv))
        .route_shared(Method::Post, PathMatcher::Exact("/kv".into()), kv)
        .route(Method::Post, PathMatcher::Exact("/echo".into()), Echo)
        .route_shared(Method::Get, PathMatcher::Prefix("/".into()), Arc::clone(&files))
        .route_shared(Method::Head, PathMatcher::Prefix("/".into()), files))
}

/// Build the route table from config, falling back to [`default_router`]
/// when no routes are configured.
///
/// KV routes naming the same log share one store; KV routes without a log
/// use `data_file`.
///
/// # Errors
///
/// Returns an error if a store cannot be opened
pub fn build_router(config: &Config, root: &Path, data_file: Option<&Path>) -> Result<Router> {
    if config.routes.is_empty() {
        info!("No routes configured, using defaults");
        return default_router(root, data_file);
    }

    let mut stores: HashMap<Option<PathBuf>, Arc<dyn Store>> = HashMap::new();
    let mut router = Router::new();

    for route in &config.routes {
        let handler: Arc<dyn Handler> = match &route.handler {
            HandlerConfig::Static { root } => Arc::new(StaticFiles::new(root)),
            HandlerConfig::Kv { data_file: file } => {
                let file = file.clone().or_else(|| data_file.map(Path::to_path_buf));
                let store = match stores.get(&file) {
                    Some(store) => Arc::clone(store),
                    None => {
                        let store = open_store(file.as_deref())?;
                        stores.insert(file, Arc::clone(&store));
                        store
                    }
                };
                // exact routes take the key from the query string
                Arc::new(KvHandler::new(store, route.path.clone()))
            }
            HandlerConfig::Echo => Arc::new(Echo),
        };

        info!("Route {} {} ({:?})", route.method, route.path, route.matching);
        router = router.route_shared(
            Method::from_token(&route.method),
            PathMatcher::from_config(route.matching, route.path.clone()),
            handler,
        );
    }

    Ok(router)
}
