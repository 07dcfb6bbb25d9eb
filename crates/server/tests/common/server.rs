//! Server test utilities.

use super::backend::FakeBackend;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use pigment_core::config::{AppConfig, CacheConfig};
use pigment_server::plugin::PluginRegistry;
use pigment_server::{AppState, create_router};
use pigment_storage::{FilesystemStore, SourceStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A response, fully buffered.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub backend: Arc<FakeBackend>,
    /// Where source blobs are written with [`TestServer::put`].
    pub sources: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Filesystem sources, a cache, no signing.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, PluginRegistry::new(), None).await
    }

    pub async fn with_plugins(plugins: PluginRegistry) -> Self {
        Self::build(|_| {}, plugins, None).await
    }

    pub async fn with_store(store: Arc<dyn SourceStore>) -> Self {
        Self::build(|_| {}, PluginRegistry::new(), Some(store)).await
    }

    async fn build<F>(
        modifier: F,
        plugins: PluginRegistry,
        store: Option<Arc<dyn SourceStore>>,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let sources = temp_dir.path().join("sources");

        let mut config = AppConfig::for_testing(&sources);
        config.cache = Some(CacheConfig::new(temp_dir.path().join("cache")));
        modifier(&mut config);

        let store = match store {
            Some(store) => store,
            None => Arc::new(
                FilesystemStore::new(&sources, None)
                    .await
                    .expect("Failed to create source store"),
            ),
        };
        let cache = pigment_cache::from_config(config.cache.as_ref())
            .await
            .expect("Failed to open cache");

        pigment_server::metrics::register_metrics();

        let backend = Arc::new(FakeBackend::new());
        let state = AppState::new(config, store, cache, backend.clone(), plugins)
            .expect("Failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            backend,
            sources,
            _temp_dir: temp_dir,
        }
    }

    /// Store a source blob under `hash`.
    pub fn put(&self, hash: &str, bytes: &[u8]) {
        std::fs::create_dir_all(&self.sources).expect("Failed to create sources directory");
        std::fs::write(self.sources.join(hash), bytes).expect("Failed to write source");
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request("GET", uri, &[]).await
    }

    pub async fn get_with(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("GET", uri, headers).await
    }

    pub async fn request(&self, method: &str, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }
}
