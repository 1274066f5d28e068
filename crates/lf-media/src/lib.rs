// SPDX-License-Identifier: MIT OR Apache-2.0
//! Media discovery, content-addressed upload, and reference resolution.
//!
//! Event bodies may carry base64 data URIs inline (an image in a
//! generation's `input`, for instance). Before such a body is enqueued, this
//! crate walks it, pulls every data URI out, uploads the bytes once per
//! distinct SHA-256 digest, and replaces the original value in place with a
//! [`lf_core::MediaReference`] string.
//!
//! [`resolve_references`] runs the reverse direction for read-side
//! consumers: given a value pulled back from the API, it finds every
//! reference string and swaps it back for an inline base64 data URI.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine;
use lf_core::MediaReference;
use lf_error::LangfuseError;
use lf_http::{Transport, TransportResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// How deep [`discover`] will recurse into nested objects/arrays before
/// giving up on a branch. Guards against pathological or adversarially deep
/// input without needing cycle detection (`serde_json::Value` is a tree).
pub const MAX_DISCOVERY_DEPTH: usize = 10;

/// The source tag recorded in a rendered [`MediaReference`] for data
/// discovered as an inline base64 data URI.
pub const SOURCE_BASE64_DATA_URI: &str = "base64_data_uri";

/// The source tag recorded for data discovered as a synthesized audio data
/// URI (an `{input_audio: {...}}` or `{audio: {...}}` leaf).
pub const SOURCE_BYTES: &str = "bytes";

/// One step into a JSON value: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A path from the root of an event body down to a discovered media leaf.
pub type JsonPath = Vec<PathSegment>;

/// One piece of media found while walking a JSON value.
#[derive(Debug, Clone)]
pub struct DiscoveredMedia {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub path: JsonPath,
    /// The `source` tag this leaf's upload reference should carry.
    pub source: &'static str,
}

/// Walk `value` up to `max_depth` levels deep, collecting every string leaf
/// that parses as a `data:<mime>;base64,<payload>` URI.
pub fn discover(value: &Value, max_depth: usize) -> Vec<DiscoveredMedia> {
    let mut out = Vec::new();
    walk(value, &mut Vec::new(), 0, max_depth, &mut out);
    out
}

fn walk(value: &Value, path: &mut JsonPath, depth: usize, max_depth: usize, out: &mut Vec<DiscoveredMedia>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::String(s) => {
            if let Some((content_type, bytes)) = parse_data_uri(s) {
                out.push(DiscoveredMedia { content_type, bytes, path: path.clone(), source: SOURCE_BASE64_DATA_URI });
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                walk(item, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        Value::Object(map) => {
            if let Some(leaf) = parse_audio_leaf(map, "input_audio").or_else(|| parse_audio_leaf(map, "audio")) {
                out.push(DiscoveredMedia { path: path.clone(), ..leaf });
                return;
            }
            for (k, v) in map {
                path.push(PathSegment::Key(k.clone()));
                walk(v, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Recognize `{<key>: {data: <base64>, format?: <str>}}` (the OpenAI-style
/// inline audio shape) and synthesize a `DiscoveredMedia` for it, the way
/// §4.4 of the spec describes for `input_audio`/`audio` leaves.
fn parse_audio_leaf(map: &serde_json::Map<String, Value>, key: &str) -> Option<DiscoveredMedia> {
    let inner = map.get(key)?.as_object()?;
    let data = inner.get("data")?.as_str()?;
    let format = inner.get("format").and_then(Value::as_str).unwrap_or("wav");
    let bytes = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    Some(DiscoveredMedia {
        content_type: format!("audio/{format}"),
        bytes,
        path: Vec::new(),
        source: SOURCE_BYTES,
    })
}

/// Parse a `data:<mime>;base64,<payload>` URI into its MIME type and decoded
/// bytes. Returns `None` for anything else, including malformed base64.
pub fn parse_data_uri(s: &str) -> Option<(String, Vec<u8>)> {
    let rest = s.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let content_type = header.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload).ok()?;
    Some((content_type.to_string(), bytes))
}

/// The content-addressed identity of a media blob: the hex-encoded SHA-256
/// digest of its bytes. Two leaves with identical bytes resolve to the same
/// id and are uploaded only once.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Write `replacement` into `value` at `path`, replacing whatever was there.
/// A path that no longer resolves (the value was mutated between discovery
/// and replacement) is a silent no-op — the caller has already decided how
/// to report that as a warning upstream.
pub fn replace_at_path(value: &mut Value, path: &[PathSegment]) -> Option<&mut Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Object(map)) => map.get_mut(k)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The outcome of successfully uploading (or deduplicating) one media leaf.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub media_id: String,
    pub reference: MediaReference,
}

#[derive(serde::Deserialize)]
struct MediaUploadResponse {
    #[serde(rename = "mediaId")]
    media_id: String,
    #[serde(rename = "uploadUrl")]
    upload_url: Option<String>,
}

/// Run the full upload protocol for one discovered leaf:
/// 1. `POST /api/public/media` to register the digest and get a media id,
///    plus an upload URL if the backend doesn't already have this content.
/// 2. If an upload URL came back, `PUT` the bytes to it, timing the call.
/// 3. `PATCH /api/public/media/{id}` to report the upload outcome.
///
/// Only step 1 can fail the whole call: once a `mediaId` has been assigned,
/// the reference is returned regardless of what happens in steps 2-3 — a
/// failed PUT or PATCH leaves the reference recorded but the status
/// unreported, per §4.4.
pub async fn upload(
    transport: &dyn Transport,
    trace_id: &str,
    observation_id: Option<&str>,
    field: &str,
    media: &DiscoveredMedia,
) -> Result<UploadOutcome, LangfuseError> {
    let sha256_b64 = base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&media.bytes));
    let register_body = json!({
        "contentType": media.content_type,
        "contentLength": media.bytes.len(),
        "sha256Hash": sha256_b64,
        "traceId": trace_id,
        "observationId": observation_id,
        "field": field,
    });
    let response = transport.post_json("/api/public/media", &register_body).await?;
    let parsed: MediaUploadResponse = serde_json::from_value(response.body)
        .map_err(|e| LangfuseError::serialization("malformed media registration response").with_source(e))?;

    if let Some(upload_url) = &parsed.upload_url {
        let headers = vec![("x-amz-checksum-sha256".to_string(), sha256_b64.clone())];
        let started = std::time::Instant::now();
        let put_result = transport
            .put_bytes(upload_url, &media.content_type, media.bytes.clone(), &headers)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let _ = report_status(transport, &parsed.media_id, elapsed_ms, &put_result).await;
    }

    Ok(UploadOutcome {
        reference: MediaReference::new(media.content_type.clone(), parsed.media_id.clone(), media.source),
        media_id: parsed.media_id,
    })
}

#[derive(serde::Deserialize)]
struct MediaGetResponse {
    url: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
}

/// Resolve every well-formed `@@@langfuseMedia:...@@@` reference found (up
/// to [`MAX_DISCOVERY_DEPTH`] levels deep) inside `value` back into an
/// inline base64 data URI, the reverse of [`upload`]. Each distinct media
/// id is fetched at most once; a reference whose fetch fails is left
/// untouched in place and a warning is published on `bus` (§4.4).
pub async fn resolve_references(transport: &dyn Transport, bus: &lf_core::EventBus, value: &mut Value) {
    let mut paths = Vec::new();
    collect_reference_paths(value, &mut Vec::new(), 0, MAX_DISCOVERY_DEPTH, &mut paths);

    let mut cache: std::collections::HashMap<String, Option<String>> = std::collections::HashMap::new();
    for path in &paths {
        let Some(current) = replace_at_path(value, path) else { continue };
        let Value::String(s) = current else { continue };
        let occurrences = MediaReference::find_all(s);
        if occurrences.is_empty() {
            continue;
        }
        let mut rewritten = String::with_capacity(s.len());
        let mut last = 0;
        for (range, reference) in occurrences {
            rewritten.push_str(&s[last..range.start]);
            if !cache.contains_key(&reference.media_id) {
                let resolved = fetch_data_uri(transport, &reference).await;
                if resolved.is_none() {
                    bus.warning(format!(
                        "failed to resolve media reference {} ({})",
                        reference.media_id, reference.content_type
                    ));
                }
                cache.insert(reference.media_id.clone(), resolved);
            }
            match cache.get(&reference.media_id).expect("just inserted") {
                Some(data_uri) => rewritten.push_str(data_uri),
                None => rewritten.push_str(&s[range.clone()]),
            }
            last = range.end;
        }
        rewritten.push_str(&s[last..]);
        *s = rewritten;
    }
}

async fn fetch_data_uri(transport: &dyn Transport, reference: &MediaReference) -> Option<String> {
    let path = format!("/api/public/media/{}", reference.media_id);
    let response = transport.get(&path, &[]).await.ok()?;
    let parsed: MediaGetResponse = serde_json::from_value(response.body).ok()?;
    let (header_content_type, bytes) = transport.get_bytes(&parsed.url).await.ok()?;
    let content_type = parsed
        .content_type
        .or(header_content_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Some(format!("data:{content_type};base64,{encoded}"))
}

fn collect_reference_paths(value: &Value, path: &mut JsonPath, depth: usize, max_depth: usize, out: &mut Vec<JsonPath>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::String(s) => {
            if !MediaReference::find_all(s).is_empty() {
                out.push(path.clone());
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                collect_reference_paths(item, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                path.push(PathSegment::Key(k.clone()));
                collect_reference_paths(v, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        _ => {}
    }
}

async fn report_status(
    transport: &dyn Transport,
    media_id: &str,
    upload_time_ms: u64,
    put_result: &Result<TransportResponse, LangfuseError>,
) -> Result<(), LangfuseError> {
    let path = format!("/api/public/media/{media_id}");
    let body = match put_result {
        Ok(response) => json!({
            "uploadedAt": chrono::Utc::now().to_rfc3339(),
            "uploadHttpStatus": response.status,
            "uploadHttpError": Value::Null,
            "uploadTimeMs": upload_time_ms,
        }),
        Err(err) => json!({
            "uploadedAt": chrono::Utc::now().to_rfc3339(),
            "uploadHttpStatus": 0,
            "uploadHttpError": err.to_string(),
            "uploadTimeMs": upload_time_ms,
        }),
    };
    transport.patch_json(&path, &body).await.map(|_| ())
}
