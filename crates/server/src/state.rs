//! Application state shared across handlers.

use crate::backend::Backend;
use crate::plugin::PluginRegistry;
use pigment_cache::CacheStore;
use pigment_core::config::AppConfig;
use pigment_core::{ImageFormat, Operation};
use pigment_signer::{HmacSigner, SignerError};
use pigment_storage::SourceStore;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Where source blobs live.
    pub store: Arc<dyn SourceStore>,
    /// Rendered-output cache, when configured.
    pub cache: Option<Arc<CacheStore>>,
    pub backend: Arc<dyn Backend>,
    pub plugins: Arc<PluginRegistry>,
    /// Request signer, when an HMAC key is configured.
    pub signer: Option<Arc<HmacSigner>>,
    /// Negotiable formats the backend can write, most preferred first.
    pub formats: Arc<Vec<&'static ImageFormat>>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Fails when the HMAC configuration names an optional operation that
    /// neither the core grammar nor a registered plugin knows.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SourceStore>,
        cache: Option<Arc<CacheStore>>,
        backend: Arc<dyn Backend>,
        plugins: PluginRegistry,
    ) -> Result<Self, SignerError> {
        let signer = match &config.hmac {
            Some(hmac) => {
                let resolve = |name: &str| {
                    Operation::letter_for_name(name)
                        .or_else(|| plugins.letter_for_name(name))
                        .or_else(|| single_letter(name))
                };
                Some(Arc::new(HmacSigner::from_config(hmac, resolve)?))
            }
            None => None,
        };

        let formats: Vec<&'static ImageFormat> = ImageFormat::negotiable()
            .filter(|format| backend.supports(format.mime))
            .collect();
        if formats.is_empty() {
            tracing::warn!("backend supports none of the negotiable output formats");
        }

        Ok(Self {
            config: Arc::new(config),
            store,
            cache,
            backend,
            plugins: Arc::new(plugins),
            signer,
            formats: Arc::new(formats),
        })
    }

    /// Letters decoded as plugin extensions.
    pub fn extension_letters(&self) -> Vec<char> {
        self.plugins.letters()
    }
}

/// Optional operations may also be given as their token letter.
fn single_letter(name: &str) -> Option<char> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() => Some(c),
        _ => None,
    }
}
