//! isolayer - on-demand contour vector tiles from raster elevation tiles
//!
//! Given a tiled web-map coordinate and a set of elevation levels, this
//! library fetches the matching raster elevation tile plus its eight
//! neighbors, reconstructs a continuous height field across tile seams,
//! traces isolines through it with a multi-threshold marching-squares
//! sweep, and emits the result as a Mapbox vector tile.
//!
//! # High-Level API
//!
//! ```ignore
//! use isolayer::coord::TileKey;
//! use isolayer::decode::RasterDemDecoder;
//! use isolayer::dem::Encoding;
//! use isolayer::fetch::HttpTileFetcher;
//! use isolayer::options::ContourOptions;
//! use isolayer::pipeline::{ContourPipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let fetcher = HttpTileFetcher::new("https://tiles.example.com/{z}/{x}/{y}.png")?;
//! let decoder = RasterDemDecoder::new(Encoding::Terrarium);
//! let pipeline = ContourPipeline::new(fetcher, decoder, PipelineConfig::default());
//!
//! let options = ContourOptions {
//!     levels: vec![100.0, 500.0],
//!     ..ContourOptions::default()
//! };
//! let tile = pipeline
//!     .fetch_contour_tile(TileKey::new(11, 327, 791), &options, &CancellationToken::new())
//!     .await?;
//! ```

pub mod cache;
pub mod coord;
pub mod decode;
pub mod dem;
pub mod error;
pub mod fetch;
pub mod heightfield;
pub mod isoline;
pub mod logging;
pub mod mvt;
pub mod options;
pub mod pipeline;

pub use error::ContourError;

/// Version of the isolayer library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
