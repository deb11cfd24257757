//! Remote fetch: download a URL straight to a local file.
//!
//! For `https` URLs a supplied CA bundle replaces the system trust store and a
//! supplied certificate/key pair is presented as the client identity.

use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors that can occur while fetching a URL
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid CA bundle: {0}")]
    InvalidCa(#[source] reqwest::Error),

    #[error("invalid client certificate or key: {0}")]
    InvalidIdentity(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("failed writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// TLS material supplied by the caller, all PEM encoded and possibly empty
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchTls<'a> {
    pub ca: &'a [u8],
    pub cert: &'a [u8],
    pub key: &'a [u8],
}

/// Build an HTTP client for `url` using the caller's TLS material.
fn build_client(url: &reqwest::Url, tls: FetchTls<'_>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder().use_rustls_tls();

    if url.scheme() == "https" {
        if !tls.ca.is_empty() {
            let certs =
                reqwest::Certificate::from_pem_bundle(tls.ca).map_err(FetchError::InvalidCa)?;
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if !tls.cert.is_empty() && !tls.key.is_empty() {
            let mut pem = Vec::with_capacity(tls.cert.len() + tls.key.len() + 1);
            pem.extend_from_slice(tls.cert);
            pem.push(b'\n');
            pem.extend_from_slice(tls.key);
            let identity =
                reqwest::Identity::from_pem(&pem).map_err(FetchError::InvalidIdentity)?;
            builder = builder.identity(identity);
        }
    }

    Ok(builder.build()?)
}

/// Download `url` into `dst`, returning the number of bytes written.
///
/// The destination is created (or truncated) only after the server has
/// answered with a success status.
pub async fn fetch_to_file(dst: &Path, url: &str, tls: FetchTls<'_>) -> Result<u64, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    let client = build_client(&parsed, tls)?;
    debug!(url = %parsed, dst = %dst.display(), "fetching");

    let mut response = client.get(parsed).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let write_err = |source| FetchError::Write {
        path: dst.display().to_string(),
        source,
    };
    let mut file = File::create(dst).await.map_err(write_err)?;
    let mut count: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        count += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;

    debug!(bytes = count, dst = %dst.display(), "fetch complete");
    Ok(count)
}
