//! Decoded elevation rasters and the RGBA-to-meters formulas.

use crate::error::ContourError;
use std::fmt;
use std::str::FromStr;

/// Lowest elevation in meters still considered a real measurement.
pub const MIN_VALID_ELEVATION: f32 = -12_000.0;

/// Highest elevation in meters still considered a real measurement.
pub const MAX_VALID_ELEVATION: f32 = 9_000.0;

/// Returns true when `value` is a usable elevation sample.
///
/// Values outside the valid band (or NaN) come from nodata pixels and are
/// treated as missing by the height-field layer.
#[inline]
pub fn is_valid_elevation(value: f32) -> bool {
    value >= MIN_VALID_ELEVATION && value <= MAX_VALID_ELEVATION
}

/// How elevations are packed into the RGB channels of a raster tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Mapbox Terrain-RGB: `ele = -10000 + (R*65536 + G*256 + B) * 0.1`
    Mapbox,
    /// Terrarium (AWS terrain tiles): `ele = R*256 + G + B/256 - 32768`
    Terrarium,
}

impl Encoding {
    /// Elevation in meters for one RGB pixel.
    #[inline]
    pub fn decode_pixel(&self, r: u8, g: u8, b: u8) -> f32 {
        match self {
            Encoding::Mapbox => {
                -10_000.0 + (r as f32 * 65_536.0 + g as f32 * 256.0 + b as f32) * 0.1
            }
            Encoding::Terrarium => r as f32 * 256.0 + g as f32 + b as f32 / 256.0 - 32_768.0,
        }
    }
}

impl FromStr for Encoding {
    type Err = ContourError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mapbox" => Ok(Encoding::Mapbox),
            "terrarium" => Ok(Encoding::Terrarium),
            other => Err(ContourError::InvalidInput(format!(
                "unknown elevation encoding: {other}"
            ))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Mapbox => write!(f, "mapbox"),
            Encoding::Terrarium => write!(f, "terrarium"),
        }
    }
}

/// A decoded elevation raster: row-major meters, immutable once produced.
///
/// The decoder writes the raw computed value for every pixel; filtering of
/// out-of-band elevations happens when the tile is lifted into a
/// [`crate::heightfield::HeightTile`].
#[derive(Debug, Clone, PartialEq)]
pub struct DemTile {
    /// Raster width in pixels
    pub width: usize,
    /// Raster height in pixels
    pub height: usize,
    /// `width * height` elevations in meters, row-major
    pub data: Vec<f32>,
}

impl DemTile {
    /// Decode an RGBA byte buffer into elevations.
    ///
    /// `rgba` must hold `4 * width * height` bytes; the alpha channel is
    /// ignored.
    pub fn from_rgba(
        rgba: &[u8],
        width: usize,
        height: usize,
        encoding: Encoding,
    ) -> Result<DemTile, ContourError> {
        let expected = width * height * 4;
        if rgba.len() != expected {
            return Err(ContourError::DecodeFailed(format!(
                "raster byte length {} does not match {}x{} RGBA ({} expected)",
                rgba.len(),
                width,
                height,
                expected
            )));
        }
        let data = rgba
            .chunks_exact(4)
            .map(|px| encoding.decode_pixel(px[0], px[1], px[2]))
            .collect();
        Ok(DemTile {
            width,
            height,
            data,
        })
    }

    /// Elevation at `(x, y)`, without validity filtering.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapbox_formula() {
        // Exhaustive over one channel at a time, spot values for the rest.
        assert_eq!(Encoding::Mapbox.decode_pixel(0, 0, 0), -10_000.0);
        for b in 0..=255u8 {
            let expected = -10_000.0 + b as f32 * 0.1;
            assert_eq!(Encoding::Mapbox.decode_pixel(0, 0, b), expected);
        }
        for g in 0..=255u8 {
            let expected = -10_000.0 + g as f32 * 256.0 * 0.1;
            assert_eq!(Encoding::Mapbox.decode_pixel(0, g, 0), expected);
        }
        for r in 0..=255u8 {
            let expected = -10_000.0 + r as f32 * 65_536.0 * 0.1;
            assert_eq!(Encoding::Mapbox.decode_pixel(r, 0, 0), expected);
        }
        // 0 m sea level: 1 * 65536 + 134 * 256 + 160 = 100000
        assert_eq!(Encoding::Mapbox.decode_pixel(1, 134, 160), 0.0);
    }

    #[test]
    fn test_terrarium_formula() {
        assert_eq!(Encoding::Terrarium.decode_pixel(128, 0, 0), 0.0);
        assert_eq!(Encoding::Terrarium.decode_pixel(0, 0, 0), -32_768.0);
        assert_eq!(Encoding::Terrarium.decode_pixel(127, 255, 0), -1.0);
        for b in 0..=255u8 {
            let expected = b as f32 / 256.0 - 32_768.0;
            assert_eq!(Encoding::Terrarium.decode_pixel(0, 0, b), expected);
        }
        // 843.5 m: r=131, g=75, b=128
        assert_eq!(Encoding::Terrarium.decode_pixel(131, 75, 128), 843.5);
    }

    #[test]
    fn test_encoding_round_trips_through_str() {
        for enc in [Encoding::Mapbox, Encoding::Terrarium] {
            assert_eq!(enc.to_string().parse::<Encoding>().unwrap(), enc);
        }
        assert!("webp".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_from_rgba_alpha_ignored() {
        let rgba = [128, 0, 0, 255, 128, 0, 64, 0];
        let dem = DemTile::from_rgba(&rgba, 2, 1, Encoding::Terrarium).unwrap();
        assert_eq!(dem.get(0, 0), 0.0);
        assert_eq!(dem.get(1, 0), 0.25);
    }

    #[test]
    fn test_from_rgba_rejects_bad_length() {
        let err = DemTile::from_rgba(&[0u8; 7], 2, 1, Encoding::Mapbox).unwrap_err();
        assert!(matches!(err, ContourError::DecodeFailed(_)));
    }

    #[test]
    fn test_validity_band() {
        assert!(is_valid_elevation(0.0));
        assert!(is_valid_elevation(MIN_VALID_ELEVATION));
        assert!(is_valid_elevation(MAX_VALID_ELEVATION));
        assert!(!is_valid_elevation(MAX_VALID_ELEVATION + 0.5));
        assert!(!is_valid_elevation(MIN_VALID_ELEVATION - 0.5));
        assert!(!is_valid_elevation(f32::NAN));
    }
}
