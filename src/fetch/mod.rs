//! Raster tile fetching.
//!
//! The pipeline consumes tile bytes through the [`TileFetcher`] trait so
//! transports stay pluggable (HTTP servers, archives, test fixtures). The
//! bundled [`HttpTileFetcher`] covers the common case: a `{z}/{x}/{y}` URL
//! template served over HTTP.

use crate::coord::TileKey;
use crate::error::ContourError;
use bytes::Bytes;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw bytes of one raster tile plus HTTP freshness metadata when the
/// transport provides it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTile {
    /// Encoded raster bytes (PNG or WebP)
    pub data: Bytes,
    /// `Expires` response header, verbatim
    pub expires: Option<String>,
    /// `Cache-Control` response header, verbatim
    pub cache_control: Option<String>,
}

impl FetchedTile {
    /// Wrap bare bytes with no freshness metadata.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            expires: None,
            cache_control: None,
        }
    }
}

/// Source of raster tile bytes.
///
/// Implementations must resolve promptly when `cancel` fires; failures
/// are surfaced verbatim to the caller through the cache layer.
pub trait TileFetcher: Send + Sync + 'static {
    /// Fetch the bytes for one tile.
    fn fetch(
        &self,
        key: TileKey,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<FetchedTile, ContourError>> + Send;
}

/// Expand a `{z}/{x}/{y}` URL template for a tile.
pub fn tile_url(template: &str, key: TileKey) -> String {
    template
        .replace("{z}", &key.z.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{y}", &key.y.to_string())
}

/// HTTP fetcher backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
    url_template: String,
}

impl HttpTileFetcher {
    /// Create a fetcher for a URL template containing `{z}`, `{x}` and
    /// `{y}` placeholders.
    ///
    /// The client keeps connections warm across the burst of nine
    /// neighbor fetches a contour request issues.
    pub fn new(url_template: impl Into<String>) -> Result<Self, ContourError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ContourError::FetchFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    /// The configured URL template.
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    async fn fetch_inner(&self, key: TileKey) -> Result<FetchedTile, ContourError> {
        let url = tile_url(&self.url_template, key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ContourError::FetchFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "tile fetch returned error status");
            return Err(ContourError::FetchFailed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let expires = header("expires");
        let cache_control = header("cache-control");

        let data = response
            .bytes()
            .await
            .map_err(|e| ContourError::FetchFailed(format!("failed to read response: {e}")))?;
        debug!(url = %url, bytes = data.len(), "tile fetched");

        Ok(FetchedTile {
            data,
            expires,
            cache_control,
        })
    }
}

impl TileFetcher for HttpTileFetcher {
    async fn fetch(
        &self,
        key: TileKey,
        cancel: CancellationToken,
    ) -> Result<FetchedTile, ContourError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ContourError::Cancelled),
            result = self.fetch_inner(key) => result,
        }
    }
}
