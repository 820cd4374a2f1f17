//! Mapbox Vector Tile (MVT) v2 encoding.
//!
//! A purpose-built encoder for contour output: LineString features with a
//! small property set. Point and Polygon geometry follow the same command
//! encoding so tiles interchange cleanly, but nothing here attempts the
//! full breadth of the format. [`reader`] provides the matching decoder
//! for the subset this module emits, used for round-trip tests and
//! debugging.

pub mod reader;

use bytes::Bytes;
use std::collections::HashMap;

/// Default MVT integer coordinate range per tile axis.
pub const DEFAULT_EXTENT: u32 = 4096;

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

/// MVT geometry type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

/// A typed MVT property value, mirroring the wire-level `Value` message
/// (exactly one variant set).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    Uint(u64),
    Sint(i64),
    Bool(bool),
}

impl Value {
    /// Classify a number the way tile writers conventionally do: whole
    /// non-negative values as uint, whole negative values as sint,
    /// fractional values as double.
    pub fn from_f64(value: f64) -> Value {
        if value.fract() != 0.0 {
            Value::Double(value)
        } else if value < 0.0 {
            Value::Sint(value as i64)
        } else {
            Value::Uint(value as u64)
        }
    }

    /// Deduplication key: values of different wire types never collide
    /// even when they print alike.
    fn dedup_key(&self) -> String {
        match self {
            Value::String(s) => format!("string:{s}"),
            Value::Float(v) => format!("float:{v}"),
            Value::Double(v) => format!("double:{v}"),
            Value::Int(v) => format!("int:{v}"),
            Value::Uint(v) => format!("uint:{v}"),
            Value::Sint(v) => format!("sint:{v}"),
            Value::Bool(v) => format!("bool:{v}"),
        }
    }
}

/// One feature: a geometry plus ordered key/value properties.
///
/// `geometry` is a list of lines (or rings, for polygons); each line is a
/// flat `[x0, y0, x1, y1, ..]` run of integer tile coordinates, matching
/// the isoline tracer's output shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geom_type: GeomType,
    pub geometry: Vec<Vec<i32>>,
    pub properties: Vec<(String, Value)>,
}

/// A named layer holding features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layer {
    pub features: Vec<Feature>,
}

/// A tile under construction: extent plus ordered named layers.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub extent: u32,
    pub layers: Vec<(String, Layer)>,
}

impl TileData {
    pub fn new(extent: u32) -> Self {
        Self {
            extent,
            layers: Vec::new(),
        }
    }

    /// Serialize to MVT bytes.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        for (name, layer) in &self.layers {
            let body = encode_layer(name, layer, self.extent);
            write_tag(&mut out, 3, WIRE_LEN);
            write_varint(&mut out, body.len() as u64);
            out.extend_from_slice(&body);
        }
        Bytes::from(out)
    }
}

const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;

fn write_tag(buf: &mut Vec<u8>, field: u32, wire: u8) {
    write_varint(buf, ((field << 3) | wire as u32) as u64);
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    write_tag(buf, field, WIRE_VARINT);
    write_varint(buf, value);
}

fn write_len_field(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    write_tag(buf, field, WIRE_LEN);
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

#[inline]
fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    match value {
        Value::String(s) => write_len_field(&mut buf, 1, s.as_bytes()),
        Value::Float(v) => {
            write_tag(&mut buf, 2, 5);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Double(v) => {
            write_tag(&mut buf, 3, 1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int(v) => write_varint_field(&mut buf, 4, *v as u64),
        Value::Uint(v) => write_varint_field(&mut buf, 5, *v),
        Value::Sint(v) => write_varint_field(&mut buf, 6, zigzag(*v)),
        Value::Bool(v) => write_varint_field(&mut buf, 7, *v as u64),
    }
    buf
}

/// Geometry command stream: `command | (count << 3)` words followed by
/// zig-zag deltas, with the cursor persisting across rings of one feature.
fn encode_geometry(feature: &Feature) -> Vec<u8> {
    let mut words: Vec<u32> = Vec::new();
    let mut cx = 0i32;
    let mut cy = 0i32;
    for line in &feature.geometry {
        let count = line.len() / 2;
        if count == 0 {
            continue;
        }
        match feature.geom_type {
            GeomType::Point => {
                words.push(MOVE_TO | ((count as u32) << 3));
                for point in line.chunks_exact(2) {
                    words.push(zigzag((point[0] - cx) as i64) as u32);
                    words.push(zigzag((point[1] - cy) as i64) as u32);
                    cx = point[0];
                    cy = point[1];
                }
            }
            GeomType::LineString | GeomType::Polygon => {
                // Polygons drop the explicit closing point; closepath
                // restores it on decode.
                let closed = feature.geom_type == GeomType::Polygon;
                let emit = if closed && count > 1 { count - 1 } else { count };
                words.push(MOVE_TO | (1 << 3));
                words.push(zigzag((line[0] - cx) as i64) as u32);
                words.push(zigzag((line[1] - cy) as i64) as u32);
                cx = line[0];
                cy = line[1];
                if emit > 1 {
                    words.push(LINE_TO | ((emit as u32 - 1) << 3));
                    for point in line[2..emit * 2].chunks_exact(2) {
                        words.push(zigzag((point[0] - cx) as i64) as u32);
                        words.push(zigzag((point[1] - cy) as i64) as u32);
                        cx = point[0];
                        cy = point[1];
                    }
                }
                if closed {
                    words.push(CLOSE_PATH | (1 << 3));
                }
            }
        }
    }
    let mut buf = Vec::new();
    for word in words {
        write_varint(&mut buf, word as u64);
    }
    buf
}

/// Per-layer key and value tables, deduplicated by insertion order.
#[derive(Default)]
struct LayerTables {
    keys: Vec<String>,
    key_index: HashMap<String, u64>,
    values: Vec<Value>,
    value_index: HashMap<String, u64>,
}

impl LayerTables {
    fn key_id(&mut self, key: &str) -> u64 {
        if let Some(&id) = self.key_index.get(key) {
            return id;
        }
        let id = self.keys.len() as u64;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), id);
        id
    }

    fn value_id(&mut self, value: &Value) -> u64 {
        let dedup = value.dedup_key();
        if let Some(&id) = self.value_index.get(&dedup) {
            return id;
        }
        let id = self.values.len() as u64;
        self.values.push(value.clone());
        self.value_index.insert(dedup, id);
        id
    }
}

fn encode_layer(name: &str, layer: &Layer, extent: u32) -> Vec<u8> {
    let mut tables = LayerTables::default();
    let mut feature_bodies = Vec::with_capacity(layer.features.len());
    for feature in &layer.features {
        let mut body = Vec::new();
        let mut tags = Vec::new();
        for (key, value) in &feature.properties {
            tags.push(tables.key_id(key));
            tags.push(tables.value_id(value));
        }
        let mut packed_tags = Vec::new();
        for tag in tags {
            write_varint(&mut packed_tags, tag);
        }
        write_len_field(&mut body, 2, &packed_tags);
        write_varint_field(&mut body, 3, feature.geom_type as u64);
        write_len_field(&mut body, 4, &encode_geometry(feature));
        feature_bodies.push(body);
    }

    let mut buf = Vec::new();
    write_len_field(&mut buf, 1, name.as_bytes());
    for body in feature_bodies {
        write_len_field(&mut buf, 2, &body);
    }
    for key in &tables.keys {
        write_len_field(&mut buf, 3, key.as_bytes());
    }
    for value in &tables.values {
        write_len_field(&mut buf, 4, &encode_value(value));
    }
    write_varint_field(&mut buf, 5, extent as u64);
    // Version goes last so readers that scan fields in order settle the
    // layer's contents first.
    write_varint_field(&mut buf, 15, 2);
    buf
}
