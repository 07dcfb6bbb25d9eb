//! The image request pipeline.
//!
//! `/[<transforms>/]<hash>[/<filename>][.<ext>]` is served in stages: route,
//! authorize, expire, conditional GET, format resolution, cache lookup,
//! fetch and dispatch, transform, cache store, respond. Any stage may end
//! the request early.

use crate::backend::{BackendResult, Identity, RenderOptions, SourceImage};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES, CACHE_WRITE_FAILURES, TRANSFORM_DURATION,
    record_request,
};
use crate::negotiate::{parse_accept, select_format};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED, VARY,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use pigment_cache::{CacheResult, CacheStore};
use pigment_core::token::strip_leading;
use pigment_core::{
    BlobHash, Error as CoreError, ImageFormat, Operation, OutputOptions, Transformations,
    http_date,
};
use pigment_signer::RequestData;
use pigment_storage::sniff::{SNIFF_LEN, sniff};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::TempPath;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

static ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:([A-Z][^/]*)/)?([0-9a-z\-]+)(?:/[^/]+?)?(\.\w+)?$")
        .expect("route pattern is valid")
});

const FROM_CACHE: HeaderName = HeaderName::from_static("from-cache");
const CONTENT_DPR: HeaderName = HeaderName::from_static("content-dpr");
const OCTET_STREAM: &str = "application/octet-stream";

/// A matched image path, percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Token segment, including any leading `H` signature.
    pub transformations: String,
    pub hash: String,
    /// Extension without the dot.
    pub extension: Option<String>,
}

pub fn parse_route(path: &str) -> Option<Route> {
    let caps = ROUTE_RE.captures(path)?;
    let decode = |s: &str| {
        percent_decode_str(s)
            .decode_utf8()
            .ok()
            .map(|d| d.into_owned())
    };
    Some(Route {
        transformations: match caps.get(1) {
            Some(m) => decode(m.as_str())?,
            None => String::new(),
        },
        hash: caps.get(2)?.as_str().to_string(),
        extension: caps.get(3).map(|m| m.as_str()[1..].to_string()),
    })
}

/// Fallback handler serving every image path.
pub async fn render(State(state): State<AppState>, req: Request) -> Response {
    let (parts, _body) = req.into_parts();
    let response = match pipeline(&state, &parts.method, parts.uri.path(), &parts.headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    record_request(response.status());
    response
}

async fn pipeline(
    state: &AppState,
    method: &Method,
    path: &str,
    request_headers: &HeaderMap,
) -> ApiResult<Response> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed);
    }

    let route = parse_route(path).ok_or(ApiError::NotFound)?;
    let hash = BlobHash::parse(&route.hash).map_err(|_| ApiError::NotFound)?;
    let extension = route.extension.as_deref().unwrap_or("");

    let transform_string = authorize(state, &route, extension)?;
    let now = OffsetDateTime::now_utc();
    let transform_string = check_expiry(transform_string, now)?;
    let mut transformations =
        Transformations::decode(transform_string, &state.extension_letters())?;

    let mut headers = HeaderMap::new();
    if let Some(cache_control) = &state.config.server.cache_control {
        insert(&mut headers, CACHE_CONTROL, cache_control);
    }

    if state.config.server.last_modified_header {
        let last_modified = http_date::truncate(state.store.last_modified(&hash).await?);
        let since = header_str(request_headers, IF_MODIFIED_SINCE).and_then(http_date::parse);
        if since.is_some_and(|since| since >= last_modified) {
            return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
        }
        insert(&mut headers, LAST_MODIFIED, &http_date::format(last_modified));
    }

    let mut vary = Vec::new();
    let explicit = match route.extension.as_deref() {
        Some(ext) => Some(
            ImageFormat::from_extension(ext)
                .filter(|f| state.backend.supports(f.mime))
                .ok_or(ApiError::UnsupportedMediaType)?,
        ),
        None => {
            vary.push("Accept");
            None
        }
    };

    let accepts = match header_str(request_headers, ACCEPT) {
        Some(accept) if explicit.is_none() => {
            let accepts = parse_accept(accept, &state.formats);
            if accepts.is_empty() {
                return Err(ApiError::UnsupportedMediaType);
            }
            accepts
        }
        _ => Vec::new(),
    };

    let dpr_header = state.config.server.dpr_header.as_str();
    if transformations.resize().is_some() {
        vary.push(dpr_header);
        let requested = header_str(request_headers, dpr_header).map(str::trim);
        if let Some((raw, dpr)) = requested
            .and_then(|raw| raw.parse::<f64>().ok().map(|dpr| (raw, dpr)))
            .filter(|(_, dpr)| dpr.is_finite() && *dpr > 0.0 && *dpr != 1.0)
        {
            transformations.scale_resize(dpr);
            insert(&mut headers, CONTENT_DPR, raw);
        }
    }
    if !vary.is_empty() {
        insert(&mut headers, VARY, &vary.join(", "));
    }

    let key = transformations.cache_key();
    let options = transformations.output_options();
    let negotiation = Negotiation {
        explicit,
        accepts: &accepts,
        transparent: options.transparent,
        usable: &state.formats,
    };

    if let Some(cache) = &state.cache {
        match lookup(cache, &hash, &key, &negotiation, now).await {
            Ok(Some((path, format))) => {
                CACHE_HITS.inc();
                insert(&mut headers, FROM_CACHE, "1");
                return stream_file(&path, format.mime, headers).await;
            }
            Ok(None) => CACHE_MISSES.inc(),
            Err(e) => {
                warn!(error = %e, "cache lookup failed, rendering");
                CACHE_MISSES.inc();
            }
        }
        insert(&mut headers, FROM_CACHE, "0");
    }

    let blob = state.store.fetch_to_local(&hash).await?;
    let mime = source_mime(state, &hash, blob.path()).await?;
    debug!(%mime, "fetched source");

    let rasterized: Option<TempPath> = match state.plugins.find(&mime) {
        Some(plugin) => {
            let source = blob.path().to_path_buf();
            let all = transformations.clone();
            Some(
                blocking(move || {
                    let plugin_ops = plugin.extract(&all);
                    plugin.transform(&source, &plugin_ops, &all)
                })
                .await?,
            )
        }
        None if mime.starts_with("image/") => None,
        None => return Err(ApiError::UnsupportedSource(mime)),
    };
    let raster = match &rasterized {
        Some(path) => path.to_path_buf(),
        None => blob.path().to_path_buf(),
    };

    let identity: Identity = {
        let backend = state.backend.clone();
        let path = raster.clone();
        blocking(move || backend.identify(&path)).await?
    };
    let format = negotiation
        .resolve(identity.transparent())
        .ok_or(ApiError::UnsupportedMediaType)?;

    // Plugin operations were consumed by the plugin.
    let rendering: Vec<Operation> = transformations
        .rendering()
        .filter(|op| !matches!(op, Operation::Extension { .. }))
        .cloned()
        .collect();
    let passthrough = rendering.is_empty()
        && identity.mime.eq_ignore_ascii_case(format.mime)
        && identity.upright();

    let (output, _rendered) = if passthrough {
        debug!("serving source unchanged");
        (raster, None)
    } else {
        let rendered = render_image(state, raster, identity.clone(), rendering, format, options).await?;
        (rendered.to_path_buf(), Some(rendered))
    };

    if let Some(cache) = &state.cache {
        store(cache, &hash, identity.transparent(), &key, format.mime, &output, now).await;
    }

    stream_file(&output, format.mime, headers).await
}

/// Check the `H` signature and return the transform string without it.
fn authorize<'a>(state: &AppState, route: &'a Route, extension: &str) -> ApiResult<&'a str> {
    let (signature, rest) = match strip_leading(&route.transformations, 'H') {
        Some((signature, rest)) => (Some(signature), rest),
        None => (None, route.transformations.as_str()),
    };

    match (&state.signer, signature) {
        (Some(signer), Some(signature)) => {
            let data = RequestData {
                hash: &route.hash,
                transformations: rest,
                format: extension,
            };
            if !signer.verify(signature, &data) {
                debug!("signature mismatch");
                return Err(ApiError::NotFound);
            }
        }
        (None, Some(_)) => return Err(ApiError::NotFound),
        (Some(signer), None) if signer.required() => return Err(ApiError::NotFound),
        _ => {}
    }
    Ok(rest)
}

/// Enforce a leading `E<hex>` expiry and return the rest of the string.
///
/// Only the leading token counts; the remainder is validated afterwards, so
/// an expired URL is `410` even when its other tokens are malformed.
fn check_expiry(transform_string: &str, now: OffsetDateTime) -> ApiResult<&str> {
    let Some((raw, rest)) = strip_leading(transform_string, 'E') else {
        return Ok(transform_string);
    };
    let expires = u64::from_str_radix(raw, 16).map_err(|_| CoreError::InvalidValue {
        name: "expires",
        value: raw.to_string(),
    })?;
    if expires <= u64::try_from(now.unix_timestamp()).unwrap_or(0) {
        debug!(expires, "url expired");
        return Err(ApiError::Gone);
    }
    Ok(rest)
}

/// Inputs of output format selection.
struct Negotiation<'a> {
    explicit: Option<&'static ImageFormat>,
    accepts: &'a [String],
    /// Transparency requested by the transform string.
    transparent: bool,
    usable: &'a [&'static ImageFormat],
}

impl Negotiation<'_> {
    fn resolve(&self, source_transparent: bool) -> Option<&'static ImageFormat> {
        self.explicit.or_else(|| {
            select_format(
                self.accepts,
                source_transparent || self.transparent,
                self.usable,
            )
        })
    }
}

async fn lookup(
    cache: &CacheStore,
    hash: &BlobHash,
    key: &str,
    negotiation: &Negotiation<'_>,
    now: OffsetDateTime,
) -> CacheResult<Option<(PathBuf, &'static ImageFormat)>> {
    let entries = cache.get(hash, key).await?;
    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let Some(format) = negotiation.resolve(first.transparent) else {
        return Ok(None);
    };
    if !entries.iter().any(|e| e.mime == format.mime) {
        return Ok(None);
    }
    let path = cache.use_entry(hash, key, format.mime, now).await?;
    Ok(path.map(|p| (p, format)))
}

/// Store a rendered file. Failures are logged and otherwise ignored.
async fn store(
    cache: &CacheStore,
    hash: &BlobHash,
    transparent: bool,
    key: &str,
    mime: &str,
    path: &Path,
    now: OffsetDateTime,
) {
    match cache.set(hash, transparent, key, mime, path, now).await {
        Ok(outcome) => CACHE_EVICTIONS.inc_by(outcome.evicted),
        Err(e) => {
            warn!(error = %e, "failed to cache rendered image");
            CACHE_WRITE_FAILURES.inc();
        }
    }
}

/// Mime of the fetched source, sniffed when the store does not know it.
async fn source_mime(state: &AppState, hash: &BlobHash, path: &Path) -> ApiResult<String> {
    let recorded = state.store.mime_type(hash).await?;
    if let Some(mime) = recorded.filter(|m| m != OCTET_STREAM) {
        return Ok(mime);
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to open source: {e}")))?;
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read source: {e}")))?;
    Ok(sniff(&head).unwrap_or(OCTET_STREAM).to_string())
}

async fn render_image(
    state: &AppState,
    raster: PathBuf,
    identity: Identity,
    rendering: Vec<Operation>,
    format: &'static ImageFormat,
    output: OutputOptions,
) -> ApiResult<TempPath> {
    let backend = state.backend.clone();
    let timer = TRANSFORM_DURATION.start_timer();
    let rendered = blocking(move || {
        let source = SourceImage {
            path: raster,
            identity,
        };
        backend.transform(&source, &rendering, &RenderOptions { format, output })
    })
    .await;
    timer.observe_duration();
    rendered
}

/// Run a backend or plugin call on the blocking pool.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BackendResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("image task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn stream_file(path: &Path, mime: &str, mut headers: HeaderMap) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to open output: {e}")))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to stat output: {e}")))?
        .len();

    insert(&mut headers, CONTENT_TYPE, mime);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

fn header_str<K: axum::http::header::AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "dropping invalid header value"),
    }
}
