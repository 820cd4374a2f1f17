//! Contour request options and their canonical wire encoding.
//!
//! Two layers of options exist. [`GlobalOptions`] configure a contour
//! source: a `thresholds` table mapping zoom levels to contour intervals
//! plus the per-feature naming and geometry knobs. A request for one tile
//! resolves them to [`ContourOptions`] via [`GlobalOptions::options_for_zoom`],
//! which picks the levels entry with the greatest zoom at or below the
//! request zoom.
//!
//! The canonical string encoding keeps cache keys and protocol URLs
//! stable: keys sort lexicographically, values are percent-encoded,
//! global options join with `&` and per-tile options with `,`, and the
//! thresholds table packs as `z1*v1[*v2..]~z2*..`.

use crate::error::ContourError;
use std::collections::BTreeMap;

/// Options resolved for one tile request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourOptions {
    /// Contour level spacings in meters (post-multiplier), sorted
    /// ascending. Tracing uses `levels[0]`; the remaining entries only
    /// upgrade a contour's level tag by divisibility (index order carries
    /// that meaning). Empty levels short-circuit to an empty tile.
    pub levels: Vec<f64>,
    /// Elevation multiplier applied before tracing (e.g. meters to feet).
    pub multiplier: f64,
    /// Fetch from `z - overzoom` and crop instead of fetching `z`.
    pub overzoom: u8,
    /// Cells of overlap into neighboring tiles kept in the output.
    pub buffer: u32,
    /// Vector tile integer coordinate range.
    pub extent: u32,
    /// Name of the emitted vector tile layer.
    pub contour_layer: String,
    /// Feature property key for the contour's elevation.
    pub elevation_key: String,
    /// Feature property key for the contour's level tag.
    pub level_key: String,
    /// Upsample the stitched tile by successive factors of two until it is
    /// at least this wide, so coarse sources still give smooth lines.
    pub subsample_below: u32,
}

impl Default for ContourOptions {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            multiplier: 1.0,
            overzoom: 0,
            buffer: 1,
            extent: crate::mvt::DEFAULT_EXTENT,
            contour_layer: "contours".to_string(),
            elevation_key: "ele".to_string(),
            level_key: "level".to_string(),
            subsample_below: 100,
        }
    }
}

impl ContourOptions {
    /// Canonical per-tile serialization: sorted `key=value` pairs joined
    /// with commas. Used as the option part of contour cache keys.
    pub fn cache_key_fragment(&self) -> String {
        let levels = self
            .levels
            .iter()
            .map(|l| format_number(*l))
            .collect::<Vec<_>>()
            .join(",");
        let pairs: BTreeMap<&str, String> = BTreeMap::from([
            ("buffer", self.buffer.to_string()),
            ("contourLayer", self.contour_layer.clone()),
            ("elevationKey", self.elevation_key.clone()),
            ("extent", self.extent.to_string()),
            ("levelKey", self.level_key.clone()),
            ("levels", levels),
            ("multiplier", format_number(self.multiplier)),
            ("overzoom", self.overzoom.to_string()),
            ("subsampleBelow", self.subsample_below.to_string()),
        ]);
        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", encode_component(&value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Options configuring a contour source across all zooms.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOptions {
    /// Contour level spacings by minimum zoom. A request resolves the
    /// entry with the greatest zoom at or below its own; requests below
    /// every entry get no levels at all.
    pub thresholds: BTreeMap<u8, Vec<f64>>,
    pub multiplier: f64,
    pub overzoom: u8,
    pub buffer: u32,
    pub extent: u32,
    pub contour_layer: String,
    pub elevation_key: String,
    pub level_key: String,
    pub subsample_below: u32,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        let individual = ContourOptions::default();
        Self {
            thresholds: BTreeMap::new(),
            multiplier: individual.multiplier,
            overzoom: individual.overzoom,
            buffer: individual.buffer,
            extent: individual.extent,
            contour_layer: individual.contour_layer,
            elevation_key: individual.elevation_key,
            level_key: individual.level_key,
            subsample_below: individual.subsample_below,
        }
    }
}

impl GlobalOptions {
    /// Resolve the per-tile options for a request at `zoom`.
    pub fn options_for_zoom(&self, zoom: u8) -> ContourOptions {
        let levels = self
            .thresholds
            .range(..=zoom)
            .next_back()
            .map(|(_, levels)| levels.clone())
            .unwrap_or_default();
        ContourOptions {
            levels,
            multiplier: self.multiplier,
            overzoom: self.overzoom,
            buffer: self.buffer,
            extent: self.extent,
            contour_layer: self.contour_layer.clone(),
            elevation_key: self.elevation_key.clone(),
            level_key: self.level_key.clone(),
            subsample_below: self.subsample_below,
        }
    }

    /// Canonical serialization: sorted `key=value` pairs joined with `&`.
    pub fn encode(&self) -> String {
        let thresholds = self
            .thresholds
            .iter()
            .map(|(zoom, levels)| {
                let mut parts = vec![zoom.to_string()];
                parts.extend(levels.iter().map(|l| format_number(*l)));
                parts.join("*")
            })
            .collect::<Vec<_>>()
            .join("~");
        let pairs: BTreeMap<&str, String> = BTreeMap::from([
            ("buffer", self.buffer.to_string()),
            ("contourLayer", self.contour_layer.clone()),
            ("elevationKey", self.elevation_key.clone()),
            ("extent", self.extent.to_string()),
            ("levelKey", self.level_key.clone()),
            ("multiplier", format_number(self.multiplier)),
            ("overzoom", self.overzoom.to_string()),
            ("subsampleBelow", self.subsample_below.to_string()),
            ("thresholds", thresholds),
        ]);
        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", encode_component(&value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Parse the canonical serialization back into options.
    ///
    /// Unknown keys are rejected; absent keys take their defaults.
    pub fn decode(encoded: &str) -> Result<GlobalOptions, ContourError> {
        let mut options = GlobalOptions::default();
        if encoded.is_empty() {
            return Ok(options);
        }
        for part in encoded.split('&') {
            let (key, raw) = part.split_once('=').ok_or_else(|| {
                ContourError::InvalidInput(format!("malformed option pair: {part}"))
            })?;
            let value = decode_component(raw)?;
            match key {
                "thresholds" => options.thresholds = decode_thresholds(&value)?,
                "multiplier" => options.multiplier = parse_number(key, &value)?,
                "overzoom" => options.overzoom = parse_int(key, &value)?,
                "buffer" => options.buffer = parse_int(key, &value)?,
                "extent" => options.extent = parse_int(key, &value)?,
                "subsampleBelow" => options.subsample_below = parse_int(key, &value)?,
                "contourLayer" => options.contour_layer = value,
                "elevationKey" => options.elevation_key = value,
                "levelKey" => options.level_key = value,
                other => {
                    return Err(ContourError::InvalidInput(format!(
                        "unknown option: {other}"
                    )))
                }
            }
        }
        Ok(options)
    }
}

fn decode_thresholds(encoded: &str) -> Result<BTreeMap<u8, Vec<f64>>, ContourError> {
    let mut thresholds = BTreeMap::new();
    if encoded.is_empty() {
        return Ok(thresholds);
    }
    for entry in encoded.split('~') {
        let mut parts = entry.split('*');
        let zoom = parse_int::<u8>("thresholds zoom", parts.next().unwrap_or_default())?;
        let levels = parts
            .map(|level| parse_number("thresholds level", level))
            .collect::<Result<Vec<f64>, _>>()?;
        if levels.is_empty() {
            return Err(ContourError::InvalidInput(format!(
                "thresholds entry without levels: {entry}"
            )));
        }
        thresholds.insert(zoom, levels);
    }
    Ok(thresholds)
}

fn parse_number(key: &str, value: &str) -> Result<f64, ContourError> {
    value
        .parse::<f64>()
        .map_err(|_| ContourError::InvalidInput(format!("{key}: not a number: {value}")))
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ContourError> {
    value
        .parse::<T>()
        .map_err(|_| ContourError::InvalidInput(format!("{key}: not an integer: {value}")))
}

/// Format a number the way the canonical encoding expects: integral
/// values without a trailing `.0`.
fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Percent-encode a component: unreserved characters (alphanumerics and
/// `-_.~`) pass through, everything else becomes `%XX`.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn decode_component(value: &str) -> Result<String, ContourError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or_else(|| {
                ContourError::InvalidInput(format!("truncated percent escape in {value}"))
            })?;
            let hex = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    ContourError::InvalidInput(format!("bad percent escape in {value}"))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| ContourError::InvalidInput(format!("non-utf8 escape in {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_global() -> GlobalOptions {
        GlobalOptions {
            thresholds: BTreeMap::from([
                (9, vec![100.0]),
                (11, vec![50.0, 200.0]),
                (13, vec![12.5, 100.0]),
            ]),
            multiplier: 3.28084,
            overzoom: 1,
            buffer: 2,
            extent: 8192,
            contour_layer: "iso".to_string(),
            elevation_key: "height m".to_string(),
            level_key: "index".to_string(),
            subsample_below: 50,
        }
    }

    #[test]
    fn test_encode_is_sorted_and_stable() {
        let encoded = sample_global().encode();
        let keys: Vec<&str> = encoded
            .split('&')
            .map(|pair| pair.split_once('=').unwrap().0)
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert!(encoded.contains("thresholds=9%2A100~11%2A50%2A200~13%2A12.5%2A100"));
        assert!(encoded.contains("elevationKey=height%20m"));
    }

    #[test]
    fn test_round_trip() {
        let options = sample_global();
        let decoded = GlobalOptions::decode(&options.encode()).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_round_trip_defaults() {
        let options = GlobalOptions::default();
        let decoded = GlobalOptions::decode(&options.encode()).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_decode_rejects_unknown_key() {
        assert!(matches!(
            GlobalOptions::decode("shading=fancy"),
            Err(ContourError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_number() {
        assert!(GlobalOptions::decode("multiplier=tall").is_err());
        assert!(GlobalOptions::decode("thresholds=a%2A100").is_err());
    }

    #[test]
    fn test_options_for_zoom_picks_greatest_at_or_below() {
        let options = sample_global();
        assert!(options.options_for_zoom(8).levels.is_empty());
        assert_eq!(options.options_for_zoom(9).levels, vec![100.0]);
        assert_eq!(options.options_for_zoom(10).levels, vec![100.0]);
        assert_eq!(options.options_for_zoom(11).levels, vec![50.0, 200.0]);
        assert_eq!(options.options_for_zoom(14).levels, vec![12.5, 100.0]);
        // Non-threshold fields carry over unchanged.
        assert_eq!(options.options_for_zoom(14).extent, 8192);
        assert_eq!(options.options_for_zoom(14).contour_layer, "iso");
    }

    #[test]
    fn test_cache_key_fragment_is_canonical() {
        let a = ContourOptions {
            levels: vec![10.0, 50.0],
            ..ContourOptions::default()
        };
        let b = a.clone();
        assert_eq!(a.cache_key_fragment(), b.cache_key_fragment());
        assert!(a.cache_key_fragment().contains("levels=10%2C50"));

        let c = ContourOptions {
            levels: vec![20.0, 50.0],
            ..ContourOptions::default()
        };
        assert_ne!(a.cache_key_fragment(), c.cache_key_fragment());
    }

    #[test]
    fn test_component_codec() {
        assert_eq!(encode_component("height m"), "height%20m");
        assert_eq!(encode_component("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(decode_component("height%20m").unwrap(), "height m");
        assert!(decode_component("bad%2").is_err());
    }
}
