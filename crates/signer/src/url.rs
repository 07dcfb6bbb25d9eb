//! Client-side URL generation.

use crate::signer::{HmacSigner, RequestData};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use pigment_core::Transformations;

/// Characters left as-is in path segments; everything else is escaped and
/// spaces become `+`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b' ');

fn escape(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string().replace(' ', "+")
}

/// What to render for one URL.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub transformations: Transformations,
    pub filename: Option<String>,
    /// Output extension without the dot.
    pub format: Option<String>,
}

impl ImageRequest {
    pub fn new(transformations: Transformations) -> Self {
        Self {
            transformations,
            ..Self::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into().trim_start_matches('.').to_string());
        self
    }
}

/// Builds request paths and URLs, signing them when a signer is set.
#[derive(Debug, Clone, Default)]
pub struct UrlBuilder {
    host: Option<String>,
    signer: Option<HmacSigner>,
}

impl UrlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sign generated paths with the signer's first attribute set.
    pub fn with_signer(mut self, signer: HmacSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// `/<transforms>/<hash>[/<filename>][.<format>]`
    pub fn path(&self, hash: &str, request: &ImageRequest) -> String {
        let mut transforms = request.transformations.encode();
        let format = request.format.as_deref().unwrap_or("");

        let mut tail = hash.to_string();
        if let Some(filename) = &request.filename {
            tail.push('/');
            tail.push_str(&escape(filename));
        }
        if !format.is_empty() {
            tail.push('.');
            tail.push_str(format);
        }

        if let Some(signer) = &self.signer {
            let signature = signer.sign(&RequestData {
                hash,
                transformations: &transforms,
                format,
            });
            transforms = format!("H{signature}{transforms}");
        }

        if transforms.is_empty() {
            format!("/{tail}")
        } else {
            format!("/{}/{tail}", escape(&transforms))
        }
    }

    /// Path prefixed with the configured host, if any.
    pub fn url(&self, hash: &str, request: &ImageRequest) -> String {
        let path = self.path(hash, request);
        match &self.host {
            Some(host) => format!("{}{path}", host.trim_end_matches('/')),
            None => path,
        }
    }
}
