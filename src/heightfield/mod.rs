//! Lazy, composable height fields over decoded elevation rasters.
//!
//! A [`HeightTile`] is a virtual 2-D grid: a width, a height, and a way to
//! sample an elevation at integer coordinates. Transformations (neighbor
//! stitching, cropping, upsampling, averaging, scaling) are O(1) to
//! construct; they wrap the source tile and compute samples on demand.
//! Sampling cost grows with the depth of the chain, so pipelines call
//! [`HeightTile::materialize`] at chosen points to snapshot the chain into
//! a dense array.
//!
//! NaN is the "missing" marker throughout: sampling outside a tile's
//! domain, a nodata pixel, or a hole in a stitched neighborhood all come
//! back as NaN, and every transformation preserves that convention.

use crate::dem::{is_valid_elevation, DemTile};
use std::sync::Arc;

/// A virtual elevation grid with lazily composed transformations.
#[derive(Debug, Clone)]
pub struct HeightTile {
    width: u32,
    height: u32,
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    /// Validity-filtered view of a decoded raster.
    Raw(Arc<DemTile>),
    /// 3x3 neighborhood stitched around a center tile, row-major nw..se.
    Neighbors(Box<[Option<HeightTile>; 9]>),
    /// Sub-tile crop: translates coordinates into the source.
    Split { inner: Box<HeightTile>, dx: i32, dy: i32 },
    /// Bilinear upsample treating samples as pixel centers.
    Subsample { inner: Box<HeightTile>, factor: u32 },
    /// Pixel-center to grid-vertex averaging.
    Average { inner: Box<HeightTile>, radius: i32 },
    /// Elevation multiplier (unit conversion).
    Scale { inner: Box<HeightTile>, multiplier: f32 },
    /// Dense snapshot with `buffer` extra samples on every side.
    Dense {
        buffer: i32,
        stride: i32,
        data: Arc<Vec<f32>>,
    },
}

impl HeightTile {
    /// Width of the virtual grid in samples.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the virtual grid in samples.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Lift a decoded raster into a height tile.
    ///
    /// Out-of-range coordinates and elevations outside the valid band
    /// sample as NaN.
    pub fn from_raw(dem: Arc<DemTile>) -> HeightTile {
        HeightTile {
            width: dem.width as u32,
            height: dem.height as u32,
            source: Source::Raw(dem),
        }
    }

    /// Stitch a 3x3 neighborhood into one continuous field.
    ///
    /// `neighbors` is row-major `[nw, n, ne, w, center, e, sw, s, se]`.
    /// Returns `None` when the center is missing; the shape is the
    /// center's. Sampling up to one full tile outside the center delegates
    /// to the matching neighbor (NaN when that neighbor is missing);
    /// coordinates beyond the 3x3 block are NaN, never wrapped.
    pub fn combine_neighbors(neighbors: [Option<HeightTile>; 9]) -> Option<HeightTile> {
        let center = neighbors[4].as_ref()?;
        Some(HeightTile {
            width: center.width,
            height: center.height,
            source: Source::Neighbors(Box::new(neighbors)),
        })
    }

    /// Crop to the `(sub_x, sub_y)` sub-tile at crop depth `sub_z`.
    ///
    /// The result has shape `(width >> sub_z, height >> sub_z)` and
    /// delegates samples to the matching region of the source. `sub_x` and
    /// `sub_y` must be below `2^sub_z`.
    pub fn split(self, sub_z: u8, sub_x: u32, sub_y: u32) -> HeightTile {
        if sub_z == 0 {
            return self;
        }
        debug_assert!(sub_x < (1 << sub_z) && sub_y < (1 << sub_z));
        let width = self.width >> sub_z;
        let height = self.height >> sub_z;
        HeightTile {
            width,
            height,
            source: Source::Split {
                dx: (width * sub_x) as i32,
                dy: (height * sub_y) as i32,
                inner: Box::new(self),
            },
        }
    }

    /// Upsample by `factor` using bilinear interpolation.
    ///
    /// Samples are treated as pixel centers: output `(x, y)` reads the
    /// source at `x / factor - (0.5 - 1 / (2 * factor))`, so the upsampled
    /// grid stays centered over the source grid. When one of a pair of
    /// source samples is NaN the interpolation falls back to the other.
    pub fn subsample_pixel_centers(self, factor: u32) -> HeightTile {
        debug_assert!(factor >= 1);
        HeightTile {
            width: self.width * factor,
            height: self.height * factor,
            source: Source::Subsample {
                inner: Box::new(self),
                factor,
            },
        }
    }

    /// Average pixel centers onto the pixel-corner grid.
    ///
    /// The result has shape `(width + 1, height + 1)`; each grid vertex is
    /// the mean of the valid samples in the `2*radius` square of pixel
    /// centers around it, or NaN when none are valid. This shifts the
    /// coordinate reference from pixel centers to top-left corners, which
    /// is the alignment the isoline tracer expects.
    pub fn average_pixel_centers_to_grid(self, radius: u32) -> HeightTile {
        debug_assert!(radius >= 1);
        HeightTile {
            width: self.width + 1,
            height: self.height + 1,
            source: Source::Average {
                inner: Box::new(self),
                radius: radius as i32,
            },
        }
    }

    /// Multiply every elevation by `multiplier` (NaN stays NaN).
    pub fn scale_elevation(self, multiplier: f32) -> HeightTile {
        if multiplier == 1.0 {
            return self;
        }
        HeightTile {
            width: self.width,
            height: self.height,
            source: Source::Scale {
                inner: Box::new(self),
                multiplier,
            },
        }
    }

    /// Snapshot the transformation chain into a dense array.
    ///
    /// Precomputes every sample over `[-buffer, width + buffer) x
    /// [-buffer, height + buffer)`; the returned tile answers samples with
    /// an array read. This is the only operation that allocates
    /// proportionally to area.
    pub fn materialize(self, buffer: u32) -> HeightTile {
        let buffer = buffer as i32;
        let stride = self.width as i32 + 2 * buffer;
        let rows = self.height as i32 + 2 * buffer;
        let mut data = Vec::with_capacity((stride * rows) as usize);
        for y in -buffer..self.height as i32 + buffer {
            for x in -buffer..self.width as i32 + buffer {
                data.push(self.sample(x, y));
            }
        }
        HeightTile {
            width: self.width,
            height: self.height,
            source: Source::Dense {
                buffer,
                stride,
                data: Arc::new(data),
            },
        }
    }

    /// Elevation at `(x, y)`, NaN when missing or out of domain.
    ///
    /// Coordinates may be negative or exceed the shape when the tile is a
    /// composition that defines values there (stitched neighborhoods,
    /// buffered snapshots).
    pub fn sample(&self, x: i32, y: i32) -> f32 {
        match &self.source {
            Source::Raw(dem) => {
                if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
                    return f32::NAN;
                }
                let value = dem.get(x as usize, y as usize);
                if is_valid_elevation(value) {
                    value
                } else {
                    f32::NAN
                }
            }
            Source::Neighbors(neighbors) => {
                let w = self.width as i32;
                let h = self.height as i32;
                if x < -w || x >= 2 * w || y < -h || y >= 2 * h {
                    return f32::NAN;
                }
                let (mut x, mut y) = (x, y);
                let mut idx = 0;
                if y < 0 {
                    y += h;
                } else if y < h {
                    idx += 3;
                } else {
                    y -= h;
                    idx += 6;
                }
                if x < 0 {
                    x += w;
                } else if x < w {
                    idx += 1;
                } else {
                    x -= w;
                    idx += 2;
                }
                match &neighbors[idx] {
                    Some(tile) => tile.sample(x, y),
                    None => f32::NAN,
                }
            }
            Source::Split { inner, dx, dy } => inner.sample(x + dx, y + dy),
            Source::Subsample { inner, factor } => {
                let f = *factor as f64;
                let u = x as f64 / f - (0.5 - 1.0 / (2.0 * f));
                let v = y as f64 / f - (0.5 - 1.0 / (2.0 * f));
                let x0 = u.floor() as i32;
                let y0 = v.floor() as i32;
                let fx = (u - x0 as f64) as f32;
                let fy = (v - y0 as f64) as f32;
                let top = lerp_skip_nan(inner.sample(x0, y0), inner.sample(x0 + 1, y0), fx);
                let bottom =
                    lerp_skip_nan(inner.sample(x0, y0 + 1), inner.sample(x0 + 1, y0 + 1), fx);
                lerp_skip_nan(top, bottom, fy)
            }
            Source::Average { inner, radius } => {
                let mut sum = 0.0f32;
                let mut count = 0u32;
                for sy in (y - radius)..(y + radius) {
                    for sx in (x - radius)..(x + radius) {
                        let value = inner.sample(sx, sy);
                        if !value.is_nan() {
                            sum += value;
                            count += 1;
                        }
                    }
                }
                if count == 0 {
                    f32::NAN
                } else {
                    sum / count as f32
                }
            }
            Source::Scale { inner, multiplier } => inner.sample(x, y) * multiplier,
            Source::Dense {
                buffer,
                stride,
                data,
            } => {
                let col = x + buffer;
                let row = y + buffer;
                if col < 0 || row < 0 || col >= *stride || row >= self.height as i32 + 2 * buffer {
                    return f32::NAN;
                }
                data[(row * stride + col) as usize]
            }
        }
    }
}

/// Linear interpolation that falls back to the valid side when one sample
/// is NaN; NaN when both are.
#[inline]
fn lerp_skip_nan(a: f32, b: f32, t: f32) -> f32 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a + (b - a) * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::DemTile;

    fn raw(width: usize, height: usize, data: Vec<f32>) -> HeightTile {
        HeightTile::from_raw(Arc::new(DemTile {
            width,
            height,
            data,
        }))
    }

    /// Nine 2x2 tiles whose values form the 6x6 matrix 0..36 row-major.
    fn stitched_neighborhood() -> HeightTile {
        let mut neighbors: Vec<Option<HeightTile>> = Vec::with_capacity(9);
        for tile_row in 0..3 {
            for tile_col in 0..3 {
                let base = tile_row * 12 + tile_col * 2;
                let data = vec![
                    base as f32,
                    (base + 1) as f32,
                    (base + 6) as f32,
                    (base + 7) as f32,
                ];
                neighbors.push(Some(raw(2, 2, data)));
            }
        }
        let neighbors: [Option<HeightTile>; 9] = neighbors.try_into().unwrap();
        HeightTile::combine_neighbors(neighbors).unwrap()
    }

    #[test]
    fn test_from_raw_bounds_and_validity() {
        let tile = raw(2, 2, vec![1.0, 2.0, 40_000.0, f32::NAN]);
        assert_eq!(tile.sample(0, 0), 1.0);
        assert_eq!(tile.sample(1, 0), 2.0);
        assert!(tile.sample(0, 1).is_nan(), "out-of-band value is missing");
        assert!(tile.sample(1, 1).is_nan());
        assert!(tile.sample(-1, 0).is_nan());
        assert!(tile.sample(0, 2).is_nan());
    }

    #[test]
    fn test_combine_neighbors_seam_continuity() {
        let combined = stitched_neighborhood();
        assert_eq!(combined.width(), 2);
        assert_eq!(combined.height(), 2);

        // Spot checks from every ring position.
        assert_eq!(combined.sample(-1, -1), 7.0);
        assert_eq!(combined.sample(0, -1), 8.0);
        assert_eq!(combined.sample(-1, 0), 13.0);
        assert_eq!(combined.sample(2, 2), 28.0);
        assert_eq!(combined.sample(0, 2), 26.0);

        // Full sweep: every coordinate of the 3x3 block matches the 6x6
        // matrix the tiles were cut from.
        for y in -2..4 {
            for x in -2..4 {
                let expected = ((y + 2) * 6 + (x + 2)) as f32;
                assert_eq!(combined.sample(x, y), expected, "at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_combine_neighbors_outside_block_is_nan() {
        let combined = stitched_neighborhood();
        assert!(combined.sample(-3, 0).is_nan());
        assert!(combined.sample(4, 0).is_nan());
        assert!(combined.sample(0, -3).is_nan());
        assert!(combined.sample(0, 4).is_nan());
    }

    #[test]
    fn test_combine_neighbors_missing_center() {
        let mut neighbors: [Option<HeightTile>; 9] = Default::default();
        neighbors[0] = Some(raw(2, 2, vec![1.0; 4]));
        assert!(HeightTile::combine_neighbors(neighbors).is_none());
    }

    #[test]
    fn test_combine_neighbors_missing_edge_is_nan() {
        let mut neighbors: [Option<HeightTile>; 9] = Default::default();
        neighbors[4] = Some(raw(2, 2, vec![1.0, 2.0, 3.0, 4.0]));
        let combined = HeightTile::combine_neighbors(neighbors).unwrap();
        assert_eq!(combined.sample(0, 0), 1.0);
        assert!(combined.sample(-1, 0).is_nan());
        assert!(combined.sample(0, 2).is_nan());
    }

    #[test]
    fn test_split_translates_samples() {
        let tile = raw(4, 4, (0..16).map(|v| v as f32).collect());
        let quadrant = tile.split(1, 1, 1);
        assert_eq!(quadrant.width(), 2);
        assert_eq!(quadrant.height(), 2);
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(quadrant.sample(x, y), ((y + 2) * 4 + x + 2) as f32);
            }
        }
    }

    #[test]
    fn test_split_zero_is_identity() {
        let tile = raw(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let same = tile.split(0, 0, 0);
        assert_eq!(same.sample(1, 1), 4.0);
    }

    #[test]
    fn test_subsample_doubles_shape_and_interpolates() {
        let tile = raw(2, 2, vec![0.0, 4.0, 8.0, 12.0]);
        let up = tile.subsample_pixel_centers(2);
        assert_eq!(up.width(), 4);
        assert_eq!(up.height(), 4);
        // Output (1, 1) reads source (0.25, 0.25): bilinear of all four.
        let expected = 0.75 * (0.75 * 0.0 + 0.25 * 4.0) + 0.25 * (0.75 * 8.0 + 0.25 * 12.0);
        assert!((up.sample(1, 1) - expected).abs() < 1e-5);
        // Corners extrapolate past the source grid edge and clamp to the
        // nearest valid sample through the NaN fallback.
        assert_eq!(up.sample(0, 0), 0.0);
        assert_eq!(up.sample(3, 3), 12.0);
    }

    #[test]
    fn test_subsample_nan_fallback() {
        let tile = raw(2, 2, vec![2.0, f32::NAN, f32::NAN, f32::NAN]);
        let up = tile.subsample_pixel_centers(2);
        // Interior interpolation points all fall back to the one valid
        // sample; regions with no valid source at all stay NaN.
        assert_eq!(up.sample(1, 1), 2.0);
        assert_eq!(up.sample(2, 1), 2.0);
        assert!(up.sample(3, 3).is_nan());
    }

    #[test]
    fn test_average_to_grid() {
        let combined = stitched_neighborhood();
        let grid = combined.average_pixel_centers_to_grid(1);
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 3);
        assert_eq!(grid.sample(0, 0), (7.0 + 8.0 + 13.0 + 14.0) / 4.0);
        assert_eq!(grid.sample(2, 2), (21.0 + 22.0 + 27.0 + 28.0) / 4.0);
    }

    #[test]
    fn test_average_skips_nan() {
        let tile = raw(2, 2, vec![1.0, f32::NAN, 3.0, f32::NAN]);
        let grid = tile.average_pixel_centers_to_grid(1);
        // Vertex (1, 1) sees {1, NaN, 3, NaN}: mean of the valid pair.
        assert_eq!(grid.sample(1, 1), 2.0);
        // Vertex fed only by NaN samples stays NaN.
        let empty = raw(2, 2, vec![f32::NAN; 4]).average_pixel_centers_to_grid(1);
        assert!(empty.sample(1, 1).is_nan());
    }

    #[test]
    fn test_upsample_then_average_matches_direct_average_interior() {
        let data: Vec<f32> = (0..16).map(|v| (v * v) as f32 * 0.5).collect();
        let direct = raw(4, 4, data.clone()).average_pixel_centers_to_grid(1);
        let upsampled = raw(4, 4, data)
            .subsample_pixel_centers(2)
            .average_pixel_centers_to_grid(1);
        for y in 1..4 {
            for x in 1..4 {
                let a = direct.sample(x, y);
                let b = upsampled.sample(x * 2, y * 2);
                assert!(
                    (a - b).abs() < 1e-4,
                    "grid vertex ({x}, {y}): direct {a} vs upsampled {b}"
                );
            }
        }
    }

    #[test]
    fn test_scale_elevation() {
        let tile = raw(2, 2, vec![1.0, 2.0, f32::NAN, 4.0]);
        let scaled = tile.scale_elevation(3.28084);
        assert!((scaled.sample(1, 0) - 6.56168).abs() < 1e-4);
        assert!(scaled.sample(0, 1).is_nan());
    }

    #[test]
    fn test_scale_by_one_is_identity() {
        let tile = raw(1, 1, vec![7.0]).scale_elevation(1.0);
        assert_eq!(tile.sample(0, 0), 7.0);
    }

    #[test]
    fn test_materialize_matches_lazy_chain() {
        let combined = stitched_neighborhood();
        let lazy = combined.clone().average_pixel_centers_to_grid(1);
        let dense = combined.average_pixel_centers_to_grid(1).materialize(1);
        for y in -1..4 {
            for x in -1..4 {
                let a = lazy.sample(x, y);
                let b = dense.sample(x, y);
                if a.is_nan() {
                    assert!(b.is_nan(), "at ({x}, {y})");
                } else {
                    assert_eq!(a, b, "at ({x}, {y})");
                }
            }
        }
        // Outside the buffered snapshot everything is NaN.
        assert!(dense.sample(-2, 0).is_nan());
        assert!(dense.sample(0, 4).is_nan());
    }
}
