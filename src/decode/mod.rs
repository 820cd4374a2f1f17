//! Raster-to-elevation decoding.
//!
//! Mirrors the fetch side: a [`DemDecoder`] trait the pipeline consumes,
//! plus the bundled [`RasterDemDecoder`] that turns PNG or WebP bytes
//! into a [`DemTile`] via the `image` crate and the configured elevation
//! encoding.

use crate::dem::{DemTile, Encoding};
use crate::error::ContourError;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Decodes raster tile bytes into an elevation grid.
pub trait DemDecoder: Send + Sync + 'static {
    /// Decode one tile's bytes.
    fn decode(
        &self,
        data: Bytes,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Arc<DemTile>, ContourError>> + Send;
}

/// Image-codec-backed decoder.
///
/// Decoding is CPU work, so it runs on the blocking pool rather than
/// stalling the reactor; a tile decode is a few milliseconds of pixel
/// churn on typical 256 or 512 pixel tiles.
#[derive(Debug, Clone, Copy)]
pub struct RasterDemDecoder {
    encoding: Encoding,
}

impl RasterDemDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// The elevation encoding this decoder applies.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl DemDecoder for RasterDemDecoder {
    async fn decode(
        &self,
        data: Bytes,
        cancel: CancellationToken,
    ) -> Result<Arc<DemTile>, ContourError> {
        if cancel.is_cancelled() {
            return Err(ContourError::Cancelled);
        }
        let encoding = self.encoding;
        let task = tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&data)
                .map_err(|e| ContourError::DecodeFailed(format!("raster decode failed: {e}")))?;
            let rgba = image.to_rgba8();
            let (width, height) = (rgba.width() as usize, rgba.height() as usize);
            trace!(width, height, "raster decoded");
            DemTile::from_rgba(rgba.as_raw(), width, height, encoding).map(Arc::new)
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(ContourError::Cancelled),
            joined = task => joined
                .map_err(|e| ContourError::DecodeFailed(format!("decode task failed: {e}")))?,
        }
    }
}
