//! Decoder for the MVT subset the encoder emits.
//!
//! Used by round-trip tests and as a debugging aid; it understands
//! layers, features, key/value tables and the three geometry commands,
//! which covers everything this crate writes.

use super::Value;
use thiserror::Error;

/// Errors raised while parsing tile bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    #[error("truncated varint")]
    TruncatedVarint,
    #[error("field overruns message: {0}")]
    Overrun(&'static str),
    #[error("invalid value message")]
    InvalidValue,
    #[error("invalid geometry command {0}")]
    InvalidCommand(u32),
    #[error("tag references missing table entry")]
    BadTag,
    #[error("invalid utf-8 string")]
    BadString,
}

/// A decoded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub layers: Vec<DecodedLayer>,
}

/// A decoded layer with its raw key/value tables and resolved features.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLayer {
    pub name: String,
    pub extent: u32,
    pub version: u64,
    pub keys: Vec<String>,
    pub values: Vec<Value>,
    pub features: Vec<DecodedFeature>,
}

/// A decoded feature with properties resolved through the layer tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeature {
    pub geom_type: u64,
    pub properties: Vec<(String, Value)>,
    /// Lines (or rings) as flat `[x0, y0, ..]` absolute coordinates;
    /// rings include the restored closing point.
    pub geometry: Vec<Vec<i32>>,
}

/// Parse tile bytes.
pub fn decode(data: &[u8]) -> Result<DecodedTile, ReadError> {
    let mut layers = Vec::new();
    let mut cursor = Cursor::new(data);
    while !cursor.done() {
        let (field, wire) = cursor.tag()?;
        match (field, wire) {
            (3, 2) => layers.push(decode_layer(cursor.sub_message()?)?),
            _ => cursor.skip(wire)?,
        }
    }
    Ok(DecodedTile { layers })
}

fn decode_layer(data: &[u8]) -> Result<DecodedLayer, ReadError> {
    let mut name = String::new();
    let mut extent = super::DEFAULT_EXTENT;
    let mut version = 1;
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut raw_features = Vec::new();

    let mut cursor = Cursor::new(data);
    while !cursor.done() {
        let (field, wire) = cursor.tag()?;
        match (field, wire) {
            (1, 2) => name = cursor.string()?,
            (2, 2) => raw_features.push(cursor.sub_message()?.to_vec()),
            (3, 2) => keys.push(cursor.string()?),
            (4, 2) => values.push(decode_value(cursor.sub_message()?)?),
            (5, 0) => extent = cursor.varint()? as u32,
            (15, 0) => version = cursor.varint()?,
            _ => cursor.skip(wire)?,
        }
    }

    let features = raw_features
        .into_iter()
        .map(|body| decode_feature(&body, &keys, &values))
        .collect::<Result<_, _>>()?;

    Ok(DecodedLayer {
        name,
        extent,
        version,
        keys,
        values,
        features,
    })
}

fn decode_value(data: &[u8]) -> Result<Value, ReadError> {
    let mut cursor = Cursor::new(data);
    let mut value = None;
    while !cursor.done() {
        let (field, wire) = cursor.tag()?;
        value = Some(match (field, wire) {
            (1, 2) => Value::String(cursor.string()?),
            (2, 5) => Value::Float(f32::from_le_bytes(cursor.fixed::<4>()?)),
            (3, 1) => Value::Double(f64::from_le_bytes(cursor.fixed::<8>()?)),
            (4, 0) => Value::Int(cursor.varint()? as i64),
            (5, 0) => Value::Uint(cursor.varint()?),
            (6, 0) => Value::Sint(unzigzag(cursor.varint()?)),
            (7, 0) => Value::Bool(cursor.varint()? != 0),
            _ => return Err(ReadError::InvalidValue),
        });
    }
    value.ok_or(ReadError::InvalidValue)
}

fn decode_feature(
    data: &[u8],
    keys: &[String],
    values: &[Value],
) -> Result<DecodedFeature, ReadError> {
    let mut geom_type = 0;
    let mut properties = Vec::new();
    let mut geometry = Vec::new();

    let mut cursor = Cursor::new(data);
    while !cursor.done() {
        let (field, wire) = cursor.tag()?;
        match (field, wire) {
            (2, 2) => {
                let mut tags = Cursor::new(cursor.sub_message()?);
                while !tags.done() {
                    let key_id = tags.varint()? as usize;
                    let value_id = tags.varint()? as usize;
                    let key = keys.get(key_id).ok_or(ReadError::BadTag)?;
                    let value = values.get(value_id).ok_or(ReadError::BadTag)?;
                    properties.push((key.clone(), value.clone()));
                }
            }
            (3, 0) => geom_type = cursor.varint()?,
            (4, 2) => geometry = decode_geometry(cursor.sub_message()?)?,
            _ => cursor.skip(wire)?,
        }
    }

    Ok(DecodedFeature {
        geom_type,
        properties,
        geometry,
    })
}

fn decode_geometry(data: &[u8]) -> Result<Vec<Vec<i32>>, ReadError> {
    let mut lines: Vec<Vec<i32>> = Vec::new();
    let mut current: Vec<i32> = Vec::new();
    let mut cx = 0i32;
    let mut cy = 0i32;

    let mut cursor = Cursor::new(data);
    while !cursor.done() {
        let word = cursor.varint()? as u32;
        let command = word & 0x7;
        let count = word >> 3;
        match command {
            super::MOVE_TO => {
                for _ in 0..count {
                    if !current.is_empty() {
                        lines.push(std::mem::take(&mut current));
                    }
                    cx += unzigzag(cursor.varint()?) as i32;
                    cy += unzigzag(cursor.varint()?) as i32;
                    current.push(cx);
                    current.push(cy);
                }
            }
            super::LINE_TO => {
                for _ in 0..count {
                    cx += unzigzag(cursor.varint()?) as i32;
                    cy += unzigzag(cursor.varint()?) as i32;
                    current.push(cx);
                    current.push(cy);
                }
            }
            super::CLOSE_PATH => {
                for _ in 0..count {
                    if current.len() >= 2 {
                        current.push(current[0]);
                        current.push(current[1]);
                    }
                }
            }
            other => return Err(ReadError::InvalidCommand(other)),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    Ok(lines)
}

#[inline]
fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Byte cursor with protobuf primitives.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn varint(&mut self) -> Result<u64, ReadError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(ReadError::TruncatedVarint)?;
            self.pos += 1;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(ReadError::TruncatedVarint);
            }
        }
    }

    fn tag(&mut self) -> Result<(u32, u8), ReadError> {
        let word = self.varint()?;
        Ok(((word >> 3) as u32, (word & 0x7) as u8))
    }

    fn sub_message(&mut self) -> Result<&'a [u8], ReadError> {
        let len = self.varint()? as usize;
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ReadError::Overrun("length-delimited field"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn string(&mut self) -> Result<String, ReadError> {
        let bytes = self.sub_message()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReadError::BadString)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(ReadError::Overrun("fixed-width field"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, wire: u8) -> Result<(), ReadError> {
        match wire {
            0 => {
                self.varint()?;
            }
            1 => {
                self.fixed::<8>()?;
            }
            2 => {
                self.sub_message()?;
            }
            5 => {
                self.fixed::<4>()?;
            }
            _ => return Err(ReadError::Overrun("unsupported wire type")),
        }
        Ok(())
    }
}
