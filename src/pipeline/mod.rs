//! The contour tile pipeline.
//!
//! Orchestrates one request end to end: resolve the overzoom source,
//! fetch the center tile and its eight neighbors, stitch them into one
//! continuous height field, upsample and grid-align it, trace isolines,
//! and encode the result as a vector tile.
//!
//! # Caching
//!
//! Three single-flight caches stack up, coarse over fine:
//!
//! ```text
//! contour request ──► contour cache (encoded tile bytes)
//!                          │ miss
//!                          ▼
//!                    dem cache (decoded elevation grids)
//!                          │ miss
//!                          ▼
//!                    raw cache (fetched tile bytes) ──► TileFetcher
//! ```
//!
//! Keys for the two lower caches are tile coordinates only, never request
//! options, so concurrent contour requests with different level sets
//! share fetches and decodes. Each cache coalesces concurrent misses into
//! one producer, and cancellation is reference-counted per entry, so
//! abandoning one map view never aborts work another view still needs.

use crate::cache::AsyncCache;
use crate::coord::TileKey;
use crate::decode::DemDecoder;
use crate::dem::DemTile;
use crate::error::ContourError;
use crate::fetch::{FetchedTile, TileFetcher};
use crate::heightfield::HeightTile;
use crate::isoline::generate_isolines;
use crate::mvt::{Feature, GeomType, Layer, TileData, Value};
use crate::options::ContourOptions;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Construction parameters for a [`ContourPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Highest zoom the tile source provides; deeper requests overzoom.
    pub maxzoom: u8,
    /// Deadline for each raster tile fetch.
    pub timeout: Duration,
    /// Capacity of each of the three caches, in entries.
    pub cache_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            maxzoom: 12,
            timeout: Duration::from_secs(10),
            cache_size: 100,
        }
    }
}

/// On-demand contour tile engine over a tile fetcher and raster decoder.
///
/// Cloning is cheap and clones share the caches.
#[derive(Debug)]
pub struct ContourPipeline<F, D> {
    fetcher: Arc<F>,
    decoder: Arc<D>,
    config: PipelineConfig,
    raw_cache: AsyncCache<TileKey, Arc<FetchedTile>>,
    dem_cache: AsyncCache<TileKey, Arc<DemTile>>,
    contour_cache: AsyncCache<String, Bytes>,
}

impl<F, D> Clone for ContourPipeline<F, D> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            decoder: Arc::clone(&self.decoder),
            config: self.config.clone(),
            raw_cache: self.raw_cache.clone(),
            dem_cache: self.dem_cache.clone(),
            contour_cache: self.contour_cache.clone(),
        }
    }
}

impl<F: TileFetcher, D: DemDecoder> ContourPipeline<F, D> {
    pub fn new(fetcher: F, decoder: D, config: PipelineConfig) -> Self {
        let cache_size = config.cache_size;
        Self {
            fetcher: Arc::new(fetcher),
            decoder: Arc::new(decoder),
            config,
            raw_cache: AsyncCache::new(cache_size),
            dem_cache: AsyncCache::new(cache_size),
            contour_cache: AsyncCache::new(cache_size),
        }
    }

    /// Fetch one raster tile's bytes through the raw cache.
    ///
    /// The fetch runs under the configured timeout; expiry cancels the
    /// in-flight transfer and fails with [`ContourError::TimedOut`].
    pub async fn fetch_tile(
        &self,
        key: TileKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<FetchedTile>, ContourError> {
        let fetcher = Arc::clone(&self.fetcher);
        let timeout = self.config.timeout;
        self.raw_cache
            .get(&key, cancel, move |key, token| async move {
                match tokio::time::timeout(timeout, fetcher.fetch(key, token.clone())).await {
                    Ok(result) => result.map(Arc::new),
                    Err(_) => {
                        token.cancel();
                        Err(ContourError::TimedOut)
                    }
                }
            })
            .await
    }

    /// Fetch and decode one raster tile through the layered caches.
    pub async fn fetch_and_parse_tile(
        &self,
        key: TileKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<DemTile>, ContourError> {
        let this = self.clone();
        self.dem_cache
            .get(&key, cancel, move |key, token| async move {
                let fetched = this.fetch_tile(key, &token).await?;
                this.decoder.decode(fetched.data.clone(), token).await
            })
            .await
    }

    /// Decoded height field for one request-zoom tile, cropped out of its
    /// overzoom source when the request is deeper than the source.
    async fn fetch_dem(
        &self,
        key: TileKey,
        options: &ContourOptions,
        cancel: &CancellationToken,
    ) -> Result<HeightTile, ContourError> {
        let source = key.source(options.overzoom, self.config.maxzoom);
        let dem = self.fetch_and_parse_tile(source.key, cancel).await?;
        Ok(HeightTile::from_raw(dem).split(source.sub_z, source.sub_x, source.sub_y))
    }

    /// Build (or serve from cache) the contour vector tile for `key`.
    ///
    /// An empty level set and a missing center tile both yield an empty
    /// tile as a successful response: "no contours here" is not an error.
    pub async fn fetch_contour_tile(
        &self,
        key: TileKey,
        options: &ContourOptions,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ContourError> {
        if options.levels.is_empty() {
            return Ok(Bytes::new());
        }
        let cache_key = format!("{key}/{}", options.cache_key_fragment());
        let this = self.clone();
        let options = options.clone();
        self.contour_cache
            .get(&cache_key, cancel, move |_, token| {
                let span = info_span!("contour_tile", tile = %key);
                async move { this.build_contour_tile(key, &options, &token).await }
                    .instrument(span)
            })
            .await
    }

    async fn build_contour_tile(
        &self,
        key: TileKey,
        options: &ContourOptions,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ContourError> {
        // All nine neighbor fetches go out at once; completion order does
        // not matter for the output.
        let neighbor_futures = (-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (dx, dy))).map(
            |(dx, dy)| async move {
                match key.neighbor(dx, dy) {
                    Some(neighbor) => self
                        .fetch_dem(neighbor, options, cancel)
                        .await
                        .map(Some),
                    None => Ok(None),
                }
            },
        );
        let neighbors = join_all(neighbor_futures)
            .await
            .into_iter()
            .collect::<Result<Vec<Option<HeightTile>>, ContourError>>()?;
        let neighbors: [Option<HeightTile>; 9] =
            neighbors.try_into().expect("nine neighbor slots");

        let Some(stitched) = HeightTile::combine_neighbors(neighbors) else {
            return Ok(Bytes::new());
        };
        if cancel.is_cancelled() {
            return Ok(Bytes::new());
        }

        // Coarse sources upsample one factor of two at a time: the
        // pixel-center alignment of repeated doubling differs from one
        // big jump, and the repeated form is the correct one.
        let mut field = if stitched.width() >= options.subsample_below {
            stitched.materialize(2)
        } else {
            let mut tile = stitched;
            while tile.width() < options.subsample_below {
                tile = tile.subsample_pixel_centers(2).materialize(2);
            }
            tile
        };
        field = field
            .average_pixel_centers_to_grid(1)
            .scale_elevation(options.multiplier as f32)
            .materialize(1);

        let interval = options.levels[0];
        let isolines = generate_isolines(interval, &field, options.extent, options.buffer);
        debug!(tile = %key, interval, contours = isolines.len(), "isolines traced");

        let features = isolines
            .into_iter()
            .map(|(multiple, geometry)| {
                let elevation = multiple as f64 * interval;
                // The level tag is the greatest index whose spacing
                // divides this elevation, or zero.
                let level = options
                    .levels
                    .iter()
                    .enumerate()
                    .map(|(i, spacing)| if elevation % spacing == 0.0 { i } else { 0 })
                    .max()
                    .unwrap_or(0);
                Feature {
                    geom_type: GeomType::LineString,
                    geometry,
                    properties: vec![
                        (options.elevation_key.clone(), Value::from_f64(elevation)),
                        (options.level_key.clone(), Value::Uint(level as u64)),
                    ],
                }
            })
            .collect();

        let tile = TileData {
            extent: options.extent,
            layers: vec![(options.contour_layer.clone(), Layer { features })],
        };
        Ok(tile.encode())
    }
}
