//! HTTP fetch helpers: conditional requests, a disk-backed JSON cache, and
//! a jittered backoff fetcher for endpoints without revalidation support.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Revalidation metadata for one cached remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Outcome of a conditional text fetch. On a 304 the body is empty, the
/// prior metadata passes through unchanged, and `changed` is false.
#[derive(Debug, Clone)]
pub struct FetchedText {
    pub body: String,
    pub meta: CacheMeta,
    pub changed: bool,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// GET `url`, revalidating against `cache` when prior metadata exists.
pub async fn fetch_text(client: &Client, url: &str, cache: Option<&CacheMeta>) -> Result<FetchedText> {
    let mut request = client.get(url);
    if let Some(meta) = cache {
        if let Some(etag) = &meta.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &meta.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let response = request.send().await.with_context(|| format!("GET {url}"))?;
    if let Some(unchanged) = resolve_not_modified(response.status(), cache) {
        return Ok(unchanged);
    }
    let response = response
        .error_for_status()
        .with_context(|| format!("GET {url}"))?;
    let meta = meta_from_headers(response.headers());
    let body = response
        .text()
        .await
        .with_context(|| format!("reading body of {url}"))?;
    Ok(FetchedText {
        body,
        meta,
        changed: true,
    })
}

/// Conditional fetch layered over an on-disk copy. A changed response
/// refreshes the disk copy; a 304 serves it. If the remote says unchanged
/// but the disk copy is gone, one unconditional fetch repairs the cache.
pub async fn fetch_json_cached(
    client: &Client,
    url: &str,
    cache_path: &Path,
    cache: Option<&CacheMeta>,
) -> Result<(Value, CacheMeta)> {
    let fetched = fetch_text(client, url, cache).await?;
    if fetched.changed {
        write_cache_file(cache_path, &fetched.body)?;
        let value = serde_json::from_str(&fetched.body).with_context(|| format!("parsing {url}"))?;
        return Ok((value, fetched.meta));
    }

    if !cache_path.exists() {
        let fresh = fetch_text(client, url, None).await?;
        write_cache_file(cache_path, &fresh.body)?;
        let value = serde_json::from_str(&fresh.body).with_context(|| format!("parsing {url}"))?;
        return Ok((value, fresh.meta));
    }

    let body = std::fs::read_to_string(cache_path)
        .with_context(|| format!("reading cache file {}", cache_path.display()))?;
    let value = serde_json::from_str(&body)
        .with_context(|| format!("parsing cache file {}", cache_path.display()))?;
    Ok((value, fetched.meta))
}

/// Plain GET with exponential backoff and uniform jitter, for feeds that do
/// not support revalidation. `retries` is the number of re-attempts after
/// the first try.
pub async fn fetch_with_backoff(
    client: &Client,
    url: &str,
    retries: u32,
    base_delay: Duration,
) -> Result<String, FetchError> {
    let mut last_error = None;
    for attempt in 0..=retries {
        match try_fetch(client, url).await {
            Ok(body) => return Ok(body),
            Err(err) => {
                log::warn!(
                    "fetch attempt {}/{} for {url} failed: {err:#}",
                    attempt + 1,
                    retries + 1
                );
                last_error = Some(err);
            }
        }
        if attempt < retries {
            let delay = base_delay * 2u32.pow(attempt);
            let jitter = base_delay.mul_f64(rand::thread_rng().gen_range(0.0..0.5));
            tokio::time::sleep(delay + jitter).await;
        }
    }
    Err(FetchError::RetriesExhausted {
        url: url.to_string(),
        attempts: retries + 1,
        source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt was made")),
    })
}

async fn try_fetch(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

fn resolve_not_modified(status: StatusCode, cache: Option<&CacheMeta>) -> Option<FetchedText> {
    if status != StatusCode::NOT_MODIFIED {
        return None;
    }
    let prior = cache?;
    Some(FetchedText {
        body: String::new(),
        meta: prior.clone(),
        changed: false,
    })
}

fn meta_from_headers(headers: &HeaderMap) -> CacheMeta {
    CacheMeta {
        etag: header_string(headers, ETAG),
        last_modified: header_string(headers, LAST_MODIFIED),
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn write_cache_file(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }
    }
    std::fs::write(path, body).with_context(|| format!("writing cache file {}", path.display()))
}
