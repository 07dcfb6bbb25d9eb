//! Fake image collaborators.

use pigment_core::{BlobHash, Operation, Transformations};
use pigment_server::backend::{Backend, BackendError, BackendResult, Identity, RenderOptions, SourceImage};
use pigment_server::plugin::{MimeMatcher, Plugin};
use pigment_storage::sniff::sniff;
use pigment_storage::{LocalBlob, SourceStore, StorageError, StorageResult};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempPath;
use time::OffsetDateTime;

/// Backend that "renders" by writing the target mime and the operation list.
///
/// Sources are identified by magic bytes. A source containing `alpha` is
/// transparent and one containing `rotated` carries EXIF orientation 6.
#[allow(dead_code)]
pub struct FakeBackend {
    formats: Vec<&'static str>,
    transforms: AtomicUsize,
}

#[allow(dead_code)]
impl FakeBackend {
    pub fn new() -> Self {
        Self::with_formats(vec!["image/webp", "image/jpeg", "image/png"])
    }

    pub fn with_formats(formats: Vec<&'static str>) -> Self {
        Self {
            formats,
            transforms: AtomicUsize::new(0),
        }
    }

    pub fn transform_calls(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    fn identify(&self, path: &Path) -> BackendResult<Identity> {
        let bytes = std::fs::read(path)?;
        let mime = sniff(&bytes).ok_or_else(|| BackendError::UnexpectedOutput {
            program: "identify",
            output: "unknown image".to_string(),
        })?;
        let contains = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
        Ok(Identity {
            mime: mime.to_string(),
            opaque: !contains(b"alpha"),
            orientation: contains(b"rotated").then_some(6),
            width: 100,
            height: 80,
        })
    }

    fn transform(
        &self,
        _source: &SourceImage,
        operations: &[Operation],
        options: &RenderOptions,
    ) -> BackendResult<TempPath> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", options.format.extension))
            .tempfile()?;
        let ops = Transformations::from(operations.to_vec()).encode();
        write!(file, "rendered {} {}", options.format.mime, ops)?;
        Ok(file.into_temp_path())
    }

    fn supports(&self, mime: &str) -> bool {
        self.formats.contains(&mime)
    }
}

/// PDF plugin stand-in: writes a PNG naming the requested page.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakePdfPlugin {
    pub pages: Mutex<Vec<String>>,
}

impl Plugin for FakePdfPlugin {
    fn name(&self) -> &'static str {
        "fake-pdf"
    }

    fn mime_types(&self) -> Vec<MimeMatcher> {
        vec![MimeMatcher::exact("application/pdf")]
    }

    fn operations(&self) -> &'static [(&'static str, char)] {
        &[("page", 'R')]
    }

    fn transform(
        &self,
        _source: &Path,
        plugin_ops: &[Operation],
        _all: &Transformations,
    ) -> BackendResult<TempPath> {
        let page = plugin_ops
            .iter()
            .find_map(|op| match op {
                Operation::Extension { value, .. } => Some(value.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "1".to_string());
        self.pages.lock().unwrap().push(page.clone());

        let mut file = tempfile::Builder::new().suffix(".png").tempfile()?;
        file.write_all(b"\x89PNG\r\n\x1a\n")?;
        write!(file, "page {page}")?;
        Ok(file.into_temp_path())
    }
}

/// Remote store whose fetches always time out.
#[allow(dead_code)]
pub struct TimeoutStore;

#[async_trait::async_trait]
impl SourceStore for TimeoutStore {
    fn is_local(&self) -> bool {
        false
    }

    async fn fetch_to_local(&self, hash: &BlobHash) -> StorageResult<LocalBlob> {
        Err(StorageError::Timeout(hash.to_string()))
    }

    async fn last_modified(&self, hash: &BlobHash) -> StorageResult<OffsetDateTime> {
        Err(StorageError::Timeout(hash.to_string()))
    }

    async fn mime_type(&self, _hash: &BlobHash) -> StorageResult<Option<String>> {
        Ok(None)
    }
}
